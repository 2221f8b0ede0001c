//! Error types for shadow atlas allocation

use thiserror::Error;

use crate::cell::CellStatus;

/// Result type for shadow atlas operations
pub type Result<T> = std::result::Result<T, ShadowAtlasError>;

/// Errors raised by the shadow atlas allocator
///
/// All of these are contract violations by the caller. The operation that
/// returns one has not modified any atlas or the pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowAtlasError {
    /// Requested cell size is zero, not a power of two, or outside
    /// the `[min_cell_size, atlas_size]` range
    #[error("Invalid shadow map size {size} for atlas of size {atlas_size}")]
    InvalidSize {
        size: u32,
        atlas_size: u32,
    },

    /// Cell index beyond the atlas's cell storage
    #[error("Cell index {index} out of range (cell count {len})")]
    CellIndexOutOfRange {
        index: usize,
        len: usize,
    },

    /// Freeing a cell that is not allocated
    #[error("Cell {index} is not allocated")]
    DoubleFree {
        index: usize,
    },

    /// Allocating from a cell that cannot hold the request
    #[error("Cell {index} cannot be allocated from state {status:?}")]
    InvalidStateTransition {
        index: usize,
        status: CellStatus,
    },

    /// Atlas index beyond the pool's atlas count
    #[error("Atlas index {index} out of range (atlas count {count})")]
    AtlasIndexOutOfRange {
        index: u32,
        count: u32,
    },

    /// Configuration rejected at pool construction
    #[error("Invalid shadow atlas config: {0}")]
    InvalidConfig(String),

    /// Backing texture could not be created
    #[error("Failed to create atlas texture: {0}")]
    TextureCreation(String),
}

impl ShadowAtlasError {
    /// Create an invalid size error
    pub fn invalid_size(size: u32, atlas_size: u32) -> Self {
        ShadowAtlasError::InvalidSize { size, atlas_size }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ShadowAtlasError::InvalidConfig(message.into())
    }
}
