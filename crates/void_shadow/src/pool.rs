//! Shadow Map Resource Pool
//!
//! Owns every shadow atlas and hands out square regions of them. All atlas
//! state sits behind one mutex, so allocations and releases from different
//! threads are totally ordered. Growing the pool (creating a new atlas
//! texture) happens with the lock held.

use parking_lot::Mutex;
use serde::{Serialize, Deserialize};

use crate::atlas::ShadowMapAtlas;
use crate::cell::CellRect;
use crate::config::{ShadowAtlasConfig, ShadowResolution};
use crate::error::{Result, ShadowAtlasError};
use crate::texture::{AtlasTextureDesc, AtlasTextureFactory, AtlasTextureUsage};

/// A region handed out by the pool
///
/// Pass it back unchanged to [`ShadowMapResourcePool::release`] when the
/// shadow map is no longer needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShadowMapView {
    /// Index of the atlas (render target) holding the region
    pub atlas_index: u32,

    /// Cell index inside that atlas
    pub cell_index: u32,

    /// Pixel rectangle inside the atlas
    pub rect: CellRect,
}

impl ShadowMapView {
    /// Side length in pixels
    pub fn size(&self) -> u32 {
        self.rect.width()
    }
}

/// Viewport covering one shadow map region
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Clip-space to atlas-UV remap for one region
///
/// `uv = clip.xy * scale + offset`, with `scale_y` negative because UVs
/// grow downwards while clip space grows upwards.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowMapTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ShadowMapTransform {
    /// As `(scale_x, scale_y, offset_x, offset_y)`
    pub fn to_array(self) -> [f32; 4] {
        [self.scale_x, self.scale_y, self.offset_x, self.offset_y]
    }
}

/// Viewport for rendering into `rect`
pub fn viewport_for_rect(rect: &CellRect) -> ShadowViewport {
    ShadowViewport {
        x: rect.left as f32,
        y: rect.top as f32,
        width: rect.width() as f32,
        height: rect.height() as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Transform mapping clip space `[-1, 1]` onto `rect`'s UV sub-rectangle
/// in an atlas of side `atlas_size`
pub fn transformation_for_rect(rect: &CellRect, atlas_size: u32) -> ShadowMapTransform {
    let atlas = atlas_size as f32;
    ShadowMapTransform {
        scale_x: 0.5 * (rect.right - rect.left) as f32 / atlas,
        scale_y: -0.5 * (rect.bottom - rect.top) as f32 / atlas,
        offset_x: 0.5 * (rect.right + rect.left) as f32 / atlas,
        offset_y: 0.5 * (rect.bottom + rect.top) as f32 / atlas,
    }
}

/// Pool-wide statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Atlases (render targets) alive
    pub atlas_count: u32,

    /// Regions currently handed out
    pub allocated_cells: u32,

    /// Pixels currently handed out
    pub allocated_area: u64,

    /// Allocated area over total atlas area (0-1)
    pub utilization: f32,
}

/// Live allocations of one atlas, for debug tooling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtlasSnapshot {
    pub atlas_index: u32,
    pub utilization: f32,
    pub allocations: Vec<ShadowMapView>,
}

/// Live allocations of the whole pool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub atlas_size: u32,
    pub atlases: Vec<AtlasSnapshot>,
}

/// Shadow map allocator over a growable set of atlases
pub struct ShadowMapResourcePool<F: AtlasTextureFactory> {
    config: ShadowAtlasConfig,
    factory: F,
    atlases: Mutex<Vec<ShadowMapAtlas<F::Texture>>>,
}

impl<F: AtlasTextureFactory> ShadowMapResourcePool<F> {
    /// Create an empty pool. No atlas exists until the first request.
    pub fn new(config: ShadowAtlasConfig, factory: F) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            factory,
            atlases: Mutex::new(Vec::new()),
        })
    }

    /// Pool configuration
    pub fn config(&self) -> &ShadowAtlasConfig {
        &self.config
    }

    /// Side length shared by every atlas
    pub fn atlas_size(&self) -> u32 {
        self.config.atlas_size
    }

    /// Texture factory used to grow the pool
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Allocate a region at `resolution` relative to the atlas size
    pub fn get_new_shadow_map(&self, resolution: ShadowResolution) -> Result<ShadowMapView> {
        self.get_new_shadow_map_with_size(resolution.cell_size(self.config.atlas_size))
    }

    /// Allocate a region with a side length of `cell_size` pixels
    ///
    /// Uses the smallest free cell across all atlases, and creates a new
    /// atlas if none can hold the request.
    pub fn get_new_shadow_map_with_size(&self, cell_size: u32) -> Result<ShadowMapView> {
        if let Err(err) = self.config.check_cell_size(cell_size) {
            log::warn!("Rejected shadow map request: {}", err);
            return Err(err);
        }

        let mut atlases = self.atlases.lock();

        // (atlas index, cell index, cell size)
        let mut best: Option<(usize, usize, u32)> = None;
        for (atlas_index, atlas) in atlases.iter().enumerate() {
            let Some(cell_index) = atlas.find_best_cell(cell_size) else {
                continue;
            };
            let found = atlas.get_cell(cell_index)?.size;
            if best.map_or(true, |(_, _, size)| found < size) {
                best = Some((atlas_index, cell_index, found));
            }
            if found == cell_size {
                break;
            }
        }

        let (atlas_index, cell_index) = match best {
            Some((atlas_index, start, _)) => {
                let cell_index = atlases[atlas_index].allocate_cell(cell_size, start)?;
                (atlas_index, cell_index)
            }
            None => {
                let atlas_index = atlases.len();
                let mut atlas = self.create_atlas(atlas_index)?;
                let cell_index = atlas.allocate_cell(cell_size, 0)?;
                atlases.push(atlas);
                (atlas_index, cell_index)
            }
        };

        let rect = atlases[atlas_index].get_cell(cell_index)?.rect;
        let view = ShadowMapView {
            atlas_index: atlas_index as u32,
            cell_index: cell_index as u32,
            rect,
        };
        log::debug!(
            "Allocated {}x{} shadow map in atlas {} (cell {})",
            cell_size,
            cell_size,
            view.atlas_index,
            view.cell_index
        );

        Ok(view)
    }

    fn create_atlas(&self, atlas_index: usize) -> Result<ShadowMapAtlas<F::Texture>> {
        let desc = AtlasTextureDesc {
            label: format!("{}_{}", self.config.label, atlas_index),
            size: self.config.atlas_size,
            format: self.config.format,
            usage: AtlasTextureUsage::ATLAS,
        };

        let texture = self.factory.create_atlas_texture(&desc).map_err(|message| {
            log::warn!("Failed to create shadow atlas '{}': {}", desc.label, message);
            ShadowAtlasError::TextureCreation(message)
        })?;

        log::info!(
            "Created shadow atlas '{}' ({}x{} {:?}, {} bytes)",
            desc.label,
            desc.size,
            desc.size,
            desc.format,
            desc.byte_size()
        );

        Ok(ShadowMapAtlas::new(self.config.atlas_size, texture))
    }

    /// Release a region previously returned by this pool
    pub fn release_shadow_map(&self, atlas_index: u32, cell_index: u32) -> Result<()> {
        let mut atlases = self.atlases.lock();
        let count = atlases.len() as u32;

        let Some(atlas) = atlases.get_mut(atlas_index as usize) else {
            log::warn!("Release of shadow map in unknown atlas {} (have {})", atlas_index, count);
            return Err(ShadowAtlasError::AtlasIndexOutOfRange { index: atlas_index, count });
        };

        if let Err(err) = atlas.free_cell(cell_index as usize) {
            log::warn!("Release of shadow map in atlas {} failed: {}", atlas_index, err);
            return Err(err);
        }

        log::debug!("Released shadow map in atlas {} (cell {})", atlas_index, cell_index);
        Ok(())
    }

    /// Release the region described by `view`
    pub fn release(&self, view: ShadowMapView) -> Result<()> {
        self.release_shadow_map(view.atlas_index, view.cell_index)
    }

    /// Number of atlases (render targets) alive
    pub fn get_render_target_count(&self) -> u32 {
        self.atlases.lock().len() as u32
    }

    /// Backing texture of atlas `index`
    pub fn get_render_target(&self, index: u32) -> Option<F::Texture> {
        self.atlases
            .lock()
            .get(index as usize)
            .map(|atlas| atlas.render_target().clone())
    }

    /// Viewport for rendering into `rect`
    pub fn viewport(&self, rect: &CellRect) -> ShadowViewport {
        viewport_for_rect(rect)
    }

    /// Clip-to-UV transform for `rect` in this pool's atlases
    pub fn transformation(&self, rect: &CellRect) -> ShadowMapTransform {
        transformation_for_rect(rect, self.config.atlas_size)
    }

    /// Number of regions currently handed out
    pub fn allocation_count(&self) -> u32 {
        self.atlases
            .lock()
            .iter()
            .map(|atlas| atlas.stats().allocated_cells)
            .sum()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let atlases = self.atlases.lock();

        let mut stats = PoolStats {
            atlas_count: atlases.len() as u32,
            ..Default::default()
        };
        for atlas in atlases.iter() {
            stats.allocated_cells += atlas.stats().allocated_cells;
            stats.allocated_area += atlas.stats().allocated_area;
        }

        let atlas_area = u64::from(self.config.atlas_size) * u64::from(self.config.atlas_size);
        let total = atlas_area * atlases.len() as u64;
        if total > 0 {
            stats.utilization = stats.allocated_area as f32 / total as f32;
        }
        stats
    }

    /// Capture every live allocation
    pub fn snapshot(&self) -> PoolSnapshot {
        let atlases = self.atlases.lock();

        let atlases = atlases
            .iter()
            .enumerate()
            .map(|(atlas_index, atlas)| AtlasSnapshot {
                atlas_index: atlas_index as u32,
                utilization: atlas.utilization(),
                allocations: atlas
                    .allocated_cells()
                    .map(|(cell_index, cell)| ShadowMapView {
                        atlas_index: atlas_index as u32,
                        cell_index: cell_index as u32,
                        rect: cell.rect,
                    })
                    .collect(),
            })
            .collect();

        PoolSnapshot {
            atlas_size: self.config.atlas_size,
            atlases,
        }
    }
}
