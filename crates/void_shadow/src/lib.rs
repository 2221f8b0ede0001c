//! # void_shadow - Shadow Map Atlas Allocation
//!
//! Packs square, power-of-two shadow maps into a small number of large
//! depth textures ("atlases"):
//! - Quad-tree subdivision per atlas with best-fit allocation
//! - Merge-on-free, so released space can be reused at any size
//! - New atlases created on demand through a backend texture factory
//! - One pool lock serializing every allocation and release
//!
//! ## Example
//!
//! ```ignore
//! use void_shadow::*;
//!
//! let pool = ShadowMapResourcePool::new(ShadowAtlasConfig::default(), factory)?;
//!
//! // Per light
//! let view = pool.get_new_shadow_map(ShadowResolution::Quarter)?;
//! let viewport = pool.viewport(&view.rect);
//! let uv_transform = pool.transformation(&view.rect);
//! let target = pool.get_render_target(view.atlas_index);
//!
//! // When the light goes away
//! pool.release(view)?;
//! ```

pub mod cell;
pub mod atlas;
pub mod config;
pub mod error;
pub mod pool;
pub mod texture;

pub use cell::{Cell, CellRect, CellStatus};
pub use atlas::{ShadowMapAtlas, AtlasStats};
pub use config::{ShadowAtlasConfig, ShadowResolution};
pub use error::{Result, ShadowAtlasError};
pub use pool::{
    ShadowMapResourcePool,
    ShadowMapView,
    ShadowViewport,
    ShadowMapTransform,
    PoolStats,
    PoolSnapshot,
    AtlasSnapshot,
    viewport_for_rect,
    transformation_for_rect,
};
pub use texture::{
    AtlasTextureFactory,
    AtlasTextureDesc,
    AtlasTextureFormat,
    AtlasTextureUsage,
};

#[cfg(feature = "wgpu")]
pub use texture::WgpuAtlasTextureFactory;
