//! Shadow Atlas Configuration
//!
//! Atlas sizing and requested shadow map resolutions, with serde support
//! so the settings can live alongside the rest of the shadow config.

use serde::{Serialize, Deserialize};

use crate::error::{Result, ShadowAtlasError};
use crate::texture::AtlasTextureFormat;

/// Shadow atlas pool configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowAtlasConfig {
    /// Side length of every atlas texture (power of 2)
    pub atlas_size: u32,

    /// Smallest cell the quad-tree may split down to (power of 2)
    pub min_cell_size: u32,

    /// Depth format of atlas textures
    pub format: AtlasTextureFormat,

    /// Debug label prefix for atlas textures
    pub label: String,
}

impl Default for ShadowAtlasConfig {
    fn default() -> Self {
        Self {
            atlas_size: 4096,
            min_cell_size: 64,
            format: AtlasTextureFormat::Depth32Float,
            label: "shadow_atlas".to_string(),
        }
    }
}

impl ShadowAtlasConfig {
    /// Create a config with the given atlas size and default everything else
    pub fn with_atlas_size(atlas_size: u32) -> Self {
        Self {
            atlas_size,
            min_cell_size: 64u32.min(atlas_size),
            ..Default::default()
        }
    }

    /// Create a high-quality configuration
    pub fn high_quality() -> Self {
        Self {
            atlas_size: 8192,
            min_cell_size: 128,
            ..Default::default()
        }
    }

    /// Create a low-quality configuration for performance
    pub fn low_quality() -> Self {
        Self {
            atlas_size: 2048,
            min_cell_size: 32,
            format: AtlasTextureFormat::Depth16Unorm,
            ..Default::default()
        }
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if !self.atlas_size.is_power_of_two() {
            return Err(ShadowAtlasError::invalid_config(format!(
                "atlas_size {} is not a power of two",
                self.atlas_size
            )));
        }
        if !self.min_cell_size.is_power_of_two() {
            return Err(ShadowAtlasError::invalid_config(format!(
                "min_cell_size {} is not a power of two",
                self.min_cell_size
            )));
        }
        if self.min_cell_size > self.atlas_size {
            return Err(ShadowAtlasError::invalid_config(format!(
                "min_cell_size {} exceeds atlas_size {}",
                self.min_cell_size, self.atlas_size
            )));
        }
        if !self.format.is_depth() {
            return Err(ShadowAtlasError::invalid_config(format!(
                "{:?} is not a depth format",
                self.format
            )));
        }
        Ok(())
    }

    /// Check that `size` is a cell size this config can hand out
    pub fn check_cell_size(&self, size: u32) -> Result<()> {
        if size.is_power_of_two() && size >= self.min_cell_size && size <= self.atlas_size {
            Ok(())
        } else {
            Err(ShadowAtlasError::invalid_size(size, self.atlas_size))
        }
    }
}

/// Requested shadow map resolution relative to the atlas size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShadowResolution {
    Full,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
}

impl ShadowResolution {
    /// All resolutions, largest first
    pub const ALL: [ShadowResolution; 7] = [
        Self::Full,
        Self::Half,
        Self::Quarter,
        Self::Eighth,
        Self::Sixteenth,
        Self::ThirtySecond,
        Self::SixtyFourth,
    ];

    /// Power-of-two divisor exponent
    pub fn shift(self) -> u32 {
        match self {
            Self::Full => 0,
            Self::Half => 1,
            Self::Quarter => 2,
            Self::Eighth => 3,
            Self::Sixteenth => 4,
            Self::ThirtySecond => 5,
            Self::SixtyFourth => 6,
        }
    }

    /// Cell side length for an atlas of `atlas_size`
    pub fn cell_size(self, atlas_size: u32) -> u32 {
        atlas_size >> self.shift()
    }
}
