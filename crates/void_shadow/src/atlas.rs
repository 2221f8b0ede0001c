//! Shadow Map Atlas
//!
//! One square backing texture whose area is handed out as power-of-two
//! cells of a quad-tree.
//!
//! # Allocation
//!
//! Requests are served best-fit: the smallest empty cell that still holds
//! the request wins, and ties go to the first cell met in a pre-order walk
//! (parent before children, children in quadrant order). The winning cell
//! is then split down along its top-left child until it matches the
//! requested size; the siblings created on the way stay empty.
//!
//! # Release
//!
//! Freeing a cell walks back towards the root, collapsing every parent
//! whose four children are all empty. A fully released atlas ends up as a
//! single empty root again.

use serde::{Serialize, Deserialize};

use crate::cell::{children_base, parent, Cell, CellRect, CellStatus};
use crate::error::{Result, ShadowAtlasError};

/// Quad-tree allocator over one atlas texture
#[derive(Debug)]
pub struct ShadowMapAtlas<T> {
    /// Root side length
    size: u32,

    /// Implicit quad-tree, root at index 0
    cells: Vec<Cell>,

    /// Backing texture, released with the atlas
    render_target: T,

    /// Statistics
    stats: AtlasStats,
}

impl<T> ShadowMapAtlas<T> {
    /// Create an atlas with a single empty root cell
    pub fn new(size: u32, render_target: T) -> Self {
        debug_assert!(size.is_power_of_two(), "atlas size must be a power of two");

        Self {
            size,
            cells: vec![Cell::empty(CellRect::square(0, 0, size))],
            render_target,
            stats: AtlasStats::default(),
        }
    }

    /// Root side length
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Backing texture
    pub fn render_target(&self) -> &T {
        &self.render_target
    }

    /// Number of cell slots materialized so far (including unused ones)
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Get a cell by index
    pub fn get_cell(&self, index: usize) -> Result<&Cell> {
        self.cells.get(index).ok_or(ShadowAtlasError::CellIndexOutOfRange {
            index,
            len: self.cells.len(),
        })
    }

    /// Check if nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.cells[0].is_empty()
    }

    /// Find the smallest empty cell that can hold `requested_size`
    pub fn find_best_cell(&self, requested_size: u32) -> Option<usize> {
        let mut best = None;
        self.search(0, requested_size, &mut best);
        best
    }

    /// Pre-order best-fit search. Returns true once an exact fit is found.
    fn search(&self, index: usize, requested_size: u32, best: &mut Option<usize>) -> bool {
        let cell = &self.cells[index];
        match cell.status {
            CellStatus::Empty => {
                if cell.size < requested_size {
                    return false;
                }
                if best.map_or(true, |best| cell.size < self.cells[best].size) {
                    *best = Some(index);
                }
                cell.size == requested_size
            }
            CellStatus::Subdivided => {
                // Children are half our size; nothing below can fit
                if cell.size / 2 < requested_size {
                    return false;
                }
                let base = children_base(index);
                (base..base + 4).any(|child| self.search(child, requested_size, best))
            }
            CellStatus::Allocated => false,
        }
    }

    /// Allocate a cell of `requested_size` inside the empty cell `start_index`
    ///
    /// Splits `start_index` down its top-left path until the cell size
    /// matches, then marks that cell allocated and returns its index.
    pub fn allocate_cell(&mut self, requested_size: u32, start_index: usize) -> Result<usize> {
        if !requested_size.is_power_of_two() || requested_size > self.size {
            return Err(ShadowAtlasError::invalid_size(requested_size, self.size));
        }

        let start = *self.get_cell(start_index)?;
        if start.status != CellStatus::Empty
            || start.size < requested_size
            || !self.is_reachable(start_index)
        {
            return Err(ShadowAtlasError::InvalidStateTransition {
                index: start_index,
                status: start.status,
            });
        }

        let mut index = start_index;
        while self.cells[index].size > requested_size {
            self.subdivide(index);
            index = children_base(index);
        }

        self.cells[index].status = CellStatus::Allocated;
        self.stats.allocated_cells += 1;
        self.stats.allocated_area += u64::from(requested_size) * u64::from(requested_size);
        self.stats.total_allocations += 1;

        Ok(index)
    }

    /// Check that every ancestor of `index` is subdivided. Slots left behind
    /// by a collapsed parent are not part of the tree.
    fn is_reachable(&self, index: usize) -> bool {
        let mut current = index;
        while let Some(up) = parent(current) {
            if self.cells[up].status != CellStatus::Subdivided {
                return false;
            }
            current = up;
        }
        true
    }

    /// Split an empty cell into four empty children
    fn subdivide(&mut self, index: usize) {
        let base = children_base(index);
        if self.cells.len() < base + 4 {
            // Slots between the old end and `base` belong to parents that
            // were never split; they stay unreferenced.
            self.cells.resize(base + 4, Cell::empty(CellRect::default()));
        }

        let quadrants = self.cells[index].rect.quadrants();
        for (offset, rect) in quadrants.into_iter().enumerate() {
            self.cells[base + offset] = Cell::empty(rect);
        }
        self.cells[index].status = CellStatus::Subdivided;
    }

    /// Release an allocated cell, merging empty siblings upwards
    pub fn free_cell(&mut self, index: usize) -> Result<()> {
        let cell = *self.get_cell(index)?;
        if cell.status != CellStatus::Allocated {
            return Err(ShadowAtlasError::DoubleFree { index });
        }

        self.cells[index].status = CellStatus::Empty;
        self.stats.allocated_cells -= 1;
        self.stats.allocated_area -= u64::from(cell.size) * u64::from(cell.size);
        self.stats.total_frees += 1;

        let mut current = index;
        while let Some(up) = parent(current) {
            if self.cells[up].status != CellStatus::Subdivided || !self.children_empty(up) {
                break;
            }
            self.cells[up].status = CellStatus::Empty;
            current = up;
        }

        Ok(())
    }

    fn children_empty(&self, index: usize) -> bool {
        let base = children_base(index);
        self.cells[base..base + 4].iter().all(Cell::is_empty)
    }

    /// Allocated cells reachable from the root, in pre-order
    pub fn allocated_cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        let mut live = Vec::with_capacity(self.stats.allocated_cells as usize);
        let mut stack = vec![0];
        while let Some(index) = stack.pop() {
            match self.cells[index].status {
                CellStatus::Allocated => live.push(index),
                CellStatus::Subdivided => {
                    let base = children_base(index);
                    stack.extend((base..base + 4).rev());
                }
                CellStatus::Empty => {}
            }
        }
        live.into_iter().map(move |index| (index, &self.cells[index]))
    }

    /// Fraction of the atlas area currently allocated (0-1)
    pub fn utilization(&self) -> f32 {
        let total = u64::from(self.size) * u64::from(self.size);
        self.stats.allocated_area as f32 / total as f32
    }

    /// Get atlas statistics
    pub fn stats(&self) -> &AtlasStats {
        &self.stats
    }
}

impl<T> Drop for ShadowMapAtlas<T> {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::error!(
                "Shadow atlas ({}x{}) destroyed with {} live allocations",
                self.size,
                self.size,
                self.stats.allocated_cells
            );
        }
    }
}

/// Atlas statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasStats {
    /// Cells currently allocated
    pub allocated_cells: u32,

    /// Pixels currently allocated
    pub allocated_area: u64,

    /// Total allocations ever made
    pub total_allocations: u64,

    /// Total releases ever made
    pub total_frees: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atlas(size: u32) -> ShadowMapAtlas<()> {
        ShadowMapAtlas::new(size, ())
    }

    fn alloc(atlas: &mut ShadowMapAtlas<()>, size: u32) -> usize {
        let start = atlas.find_best_cell(size).unwrap();
        atlas.allocate_cell(size, start).unwrap()
    }

    #[test]
    fn test_new_atlas_has_empty_root() {
        let atlas = atlas(1024);
        assert_eq!(atlas.cell_count(), 1);
        assert!(atlas.is_empty());
        let root = atlas.get_cell(0).unwrap();
        assert_eq!(root.size, 1024);
        assert_eq!(root.rect, CellRect::square(0, 0, 1024));
    }

    #[test]
    fn test_allocate_root() {
        let mut atlas = atlas(1024);
        assert_eq!(atlas.find_best_cell(1024), Some(0));
        assert_eq!(atlas.allocate_cell(1024, 0).unwrap(), 0);
        assert_eq!(atlas.cell_count(), 1);
        assert_eq!(atlas.find_best_cell(64), None);
    }

    #[test]
    fn test_allocate_splits_top_left_path() {
        let mut atlas = atlas(1024);
        let index = atlas.allocate_cell(256, 0).unwrap();

        assert_eq!(index, 5);
        assert_eq!(atlas.cell_count(), 9);
        assert_eq!(atlas.get_cell(0).unwrap().status, CellStatus::Subdivided);
        assert_eq!(atlas.get_cell(1).unwrap().status, CellStatus::Subdivided);
        assert_eq!(atlas.get_cell(5).unwrap().rect, CellRect::square(0, 0, 256));

        for sibling in [2, 3, 4, 6, 7, 8] {
            assert_eq!(atlas.get_cell(sibling).unwrap().status, CellStatus::Empty);
        }
        assert_eq!(atlas.get_cell(3).unwrap().rect, CellRect::square(512, 512, 512));
        assert_eq!(atlas.get_cell(8).unwrap().rect, CellRect::square(0, 256, 256));
    }

    #[test]
    fn test_best_fit_prefers_smallest_cell() {
        let mut atlas = atlas(1024);
        assert_eq!(alloc(&mut atlas, 256), 5);

        // 256 cells (6, 7, 8) and 512 cells (2, 3, 4) are free
        assert_eq!(atlas.find_best_cell(256), Some(6));
        assert_eq!(alloc(&mut atlas, 256), 6);
        assert_eq!(atlas.get_cell(2).unwrap().status, CellStatus::Empty);
    }

    #[test]
    fn test_best_fit_smaller_request_uses_smallest_split() {
        let mut atlas = atlas(1024);
        alloc(&mut atlas, 256);

        // 128 fits in a 256 or a 512 cell; the 256 one is split
        let index = alloc(&mut atlas, 128);
        assert_eq!(index, crate::cell::children_base(6));
        assert_eq!(atlas.get_cell(2).unwrap().status, CellStatus::Empty);
    }

    #[test]
    fn test_tie_break_is_first_in_pre_order() {
        let mut atlas = atlas(1024);
        let a = alloc(&mut atlas, 256);
        let b = alloc(&mut atlas, 256);
        assert_eq!((a, b), (5, 6));

        atlas.free_cell(a).unwrap();
        assert_eq!(alloc(&mut atlas, 256), 5);
    }

    #[test]
    fn test_free_collapses_to_root() {
        let mut atlas = atlas(1024);
        let cells: Vec<usize> = (0..4).map(|_| alloc(&mut atlas, 256)).collect();
        assert_eq!(cells, vec![5, 6, 7, 8]);

        for &cell in &cells {
            atlas.free_cell(cell).unwrap();
        }

        assert!(atlas.is_empty());
        assert_eq!(atlas.find_best_cell(1024), Some(0));
        assert_eq!(atlas.allocate_cell(1024, 0).unwrap(), 0);
    }

    #[test]
    fn test_free_stops_at_busy_sibling() {
        let mut atlas = atlas(1024);
        let a = alloc(&mut atlas, 256);
        let b = alloc(&mut atlas, 256);

        atlas.free_cell(a).unwrap();
        assert_eq!(atlas.get_cell(1).unwrap().status, CellStatus::Subdivided);
        assert_eq!(atlas.get_cell(0).unwrap().status, CellStatus::Subdivided);

        atlas.free_cell(b).unwrap();
        assert!(atlas.is_empty());
    }

    #[test]
    fn test_reuse_after_free_returns_same_index() {
        let mut atlas = atlas(4096);
        let first = alloc(&mut atlas, 512);
        atlas.free_cell(first).unwrap();
        assert!(atlas.is_empty());

        let count = atlas.cell_count();
        let second = alloc(&mut atlas, 512);
        assert_eq!(first, second);
        // Collapsed storage is reused, not grown
        assert_eq!(atlas.cell_count(), count);
    }

    #[test]
    fn test_collapsed_children_are_not_searched() {
        let mut atlas = atlas(1024);
        let a = alloc(&mut atlas, 256);
        atlas.free_cell(a).unwrap();

        // Stale 256 slots still exist, but only the root is reachable
        assert_eq!(atlas.find_best_cell(256), Some(0));
        assert_eq!(atlas.allocated_cells().count(), 0);
    }

    #[test]
    fn test_collapsed_children_cannot_be_allocated() {
        let mut atlas = atlas(1024);
        assert_eq!(atlas.allocate_cell(256, 0).unwrap(), 5);
        atlas.free_cell(5).unwrap();

        assert_eq!(
            atlas.allocate_cell(256, 5),
            Err(ShadowAtlasError::InvalidStateTransition { index: 5, status: CellStatus::Empty })
        );
        assert_eq!(
            atlas.allocate_cell(512, 1),
            Err(ShadowAtlasError::InvalidStateTransition { index: 1, status: CellStatus::Empty })
        );
        assert_eq!(atlas.stats().allocated_cells, 0);

        // The whole atlas is still free
        assert_eq!(atlas.find_best_cell(1024), Some(0));
        assert_eq!(atlas.allocate_cell(1024, 0).unwrap(), 0);
        assert_eq!(atlas.allocated_cells().count(), 1);
        assert_eq!(atlas.stats().allocated_area, 1024 * 1024);
    }

    #[test]
    fn test_double_free() {
        let mut atlas = atlas(1024);
        let a = alloc(&mut atlas, 512);
        atlas.free_cell(a).unwrap();
        assert_eq!(atlas.free_cell(a), Err(ShadowAtlasError::DoubleFree { index: a }));
        assert_eq!(atlas.free_cell(0), Err(ShadowAtlasError::DoubleFree { index: 0 }));
    }

    #[test]
    fn test_out_of_range_indices() {
        let mut atlas = atlas(1024);
        assert_eq!(
            atlas.free_cell(9),
            Err(ShadowAtlasError::CellIndexOutOfRange { index: 9, len: 1 })
        );
        assert_eq!(
            atlas.allocate_cell(256, 3),
            Err(ShadowAtlasError::CellIndexOutOfRange { index: 3, len: 1 })
        );
        assert!(atlas.get_cell(1).is_err());
    }

    #[test]
    fn test_allocate_rejects_bad_state_and_size() {
        let mut atlas = atlas(1024);
        let a = alloc(&mut atlas, 256);

        assert_eq!(
            atlas.allocate_cell(256, a),
            Err(ShadowAtlasError::InvalidStateTransition { index: a, status: CellStatus::Allocated })
        );
        assert_eq!(
            atlas.allocate_cell(256, 0),
            Err(ShadowAtlasError::InvalidStateTransition { index: 0, status: CellStatus::Subdivided })
        );
        // 512 does not fit in a 256 cell
        assert!(matches!(
            atlas.allocate_cell(512, 6),
            Err(ShadowAtlasError::InvalidStateTransition { .. })
        ));
        assert_eq!(atlas.allocate_cell(300, 2), Err(ShadowAtlasError::invalid_size(300, 1024)));
        assert_eq!(atlas.allocate_cell(2048, 2), Err(ShadowAtlasError::invalid_size(2048, 1024)));

        // Rejected calls leave the tree alone
        assert_eq!(atlas.stats().allocated_cells, 1);
        assert_eq!(atlas.get_cell(2).unwrap().status, CellStatus::Empty);
    }

    #[test]
    fn test_full_atlas_has_no_candidate() {
        let mut atlas = atlas(512);
        for _ in 0..16 {
            alloc(&mut atlas, 128);
        }
        assert_eq!(atlas.find_best_cell(128), None);
        assert_eq!(atlas.find_best_cell(64), None);
        assert!((atlas.utilization() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_mixed_sizes_never_overlap() {
        let mut atlas = atlas(2048);
        let sizes = [512, 128, 1024, 64, 256, 128, 64, 512, 256, 64];
        let mut live = Vec::new();
        let mut seed = 7u32;

        for round in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let size = sizes[(seed >> 16) as usize % sizes.len()];

            if round % 3 == 2 && !live.is_empty() {
                let victim = live.swap_remove((seed >> 8) as usize % live.len());
                atlas.free_cell(victim).unwrap();
            } else if let Some(start) = atlas.find_best_cell(size) {
                live.push(atlas.allocate_cell(size, start).unwrap());
            }

            let rects: Vec<CellRect> = atlas.allocated_cells().map(|(_, cell)| cell.rect).collect();
            assert_eq!(rects.len(), live.len());
            for (i, a) in rects.iter().enumerate() {
                for b in &rects[i + 1..] {
                    assert!(!a.intersects(b), "{:?} overlaps {:?}", a, b);
                }
            }
        }

        for index in live {
            atlas.free_cell(index).unwrap();
        }
        assert!(atlas.is_empty());
        assert_eq!(atlas.stats().allocated_area, 0);
    }

    #[test]
    fn test_stats_and_utilization() {
        let mut atlas = atlas(1024);
        assert_eq!(atlas.utilization(), 0.0);

        let a = alloc(&mut atlas, 512);
        assert!((atlas.utilization() - 0.25).abs() < 0.001);
        alloc(&mut atlas, 256);
        assert!((atlas.utilization() - 0.3125).abs() < 0.001);

        atlas.free_cell(a).unwrap();
        let stats = atlas.stats();
        assert_eq!(stats.allocated_cells, 1);
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.total_frees, 1);
        assert_eq!(stats.allocated_area, 256 * 256);
    }
}
