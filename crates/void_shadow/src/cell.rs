//! Quad-tree cells
//!
//! Cells are stored in a flat, index-addressed sequence. The root lives at
//! index 0 and the four children of cell `i` occupy `4i + 1 ..= 4i + 4`.

use serde::{Serialize, Deserialize};

/// Allocation state of a cell
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellStatus {
    /// Free, children (if any were ever created) are unused
    #[default]
    Empty,
    /// Handed out to a caller
    Allocated,
    /// Split into four children, at least one of which is in use
    Subdivided,
}

/// Pixel rectangle inside an atlas (top-left origin, exclusive right/bottom)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CellRect {
    /// Create a square rect from its top-left corner
    pub fn square(left: u32, top: u32, size: u32) -> Self {
        Self {
            left,
            top,
            right: left + size,
            bottom: top + size,
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Check if two rects share any pixel
    pub fn intersects(&self, other: &CellRect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// Split into four equal quadrants.
    ///
    /// Order: top-left, top-right, bottom-right, bottom-left.
    pub fn quadrants(&self) -> [CellRect; 4] {
        let half = self.width() / 2;
        let mid_x = self.left + half;
        let mid_y = self.top + half;
        [
            CellRect::square(self.left, self.top, half),
            CellRect::square(mid_x, self.top, half),
            CellRect::square(mid_x, mid_y, half),
            CellRect::square(self.left, mid_y, half),
        ]
    }
}

/// One node of an atlas quad-tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Side length in pixels (power of two)
    pub size: u32,
    /// Region covered by this cell
    pub rect: CellRect,
    /// Allocation state
    pub status: CellStatus,
}

impl Cell {
    /// Create an empty cell covering `rect`
    pub fn empty(rect: CellRect) -> Self {
        Self {
            size: rect.width(),
            rect,
            status: CellStatus::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status == CellStatus::Empty
    }
}

/// Index of the first of the four children of `index`
#[inline]
pub const fn children_base(index: usize) -> usize {
    4 * index + 1
}

/// Index of the parent of `index`. The root has no parent.
#[inline]
pub const fn parent(index: usize) -> Option<usize> {
    if index == 0 {
        None
    } else {
        Some((index - 1) / 4)
    }
}
