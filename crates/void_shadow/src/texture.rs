//! Atlas Texture Factory
//!
//! Backend-agnostic description of the texture that backs one atlas. The
//! allocator never talks to a graphics API directly; it asks an
//! [`AtlasTextureFactory`] for exactly one texture per atlas and owns the
//! returned handle until the atlas is dropped.

use serde::{Serialize, Deserialize};

/// Texture formats usable for a shadow atlas
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AtlasTextureFormat {
    // Depth/stencil formats
    Depth16Unorm,
    Depth24Plus,
    Depth24PlusStencil8,
    Depth32Float,
    Depth32FloatStencil8,

    // Color formats
    R32Float,
}

impl AtlasTextureFormat {
    /// Check if this is a depth format
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24Plus
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Depth16Unorm => 2,
            Self::Depth24Plus | Self::Depth24PlusStencil8 | Self::Depth32Float | Self::R32Float => 4,
            Self::Depth32FloatStencil8 => 8,
        }
    }
}

/// Texture usage flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtlasTextureUsage(pub u32);

impl AtlasTextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 3);

    /// Usage requested for every atlas: sampled in lighting, rendered in the shadow pass
    pub const ATLAS: Self = Self(Self::TEXTURE_BINDING.0 | Self::RENDER_ATTACHMENT.0);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for AtlasTextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Description of one atlas texture
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtlasTextureDesc {
    /// Debug label
    pub label: String,
    /// Side length in pixels (atlases are square)
    pub size: u32,
    /// Format
    pub format: AtlasTextureFormat,
    /// Usage flags
    pub usage: AtlasTextureUsage,
}

impl AtlasTextureDesc {
    /// Size of the texture in bytes
    pub fn byte_size(&self) -> usize {
        self.size as usize * self.size as usize * self.format.bytes_per_pixel()
    }
}

/// Creates the backing texture for a new atlas
///
/// Called once per atlas, while the pool lock is held. The returned handle
/// is cloned out to callers of `get_render_target`, so it should be cheap
/// to clone (a reference-counted GPU handle, an id, ...). The texture is
/// released when the last handle is dropped.
pub trait AtlasTextureFactory: Send + Sync {
    /// Handle to a created texture
    type Texture: Clone + Send + Sync;

    /// Create a texture matching `desc`
    fn create_atlas_texture(&self, desc: &AtlasTextureDesc) -> Result<Self::Texture, String>;
}

#[cfg(feature = "wgpu")]
pub use self::wgpu_backend::WgpuAtlasTextureFactory;

#[cfg(feature = "wgpu")]
mod wgpu_backend {
    use std::sync::Arc;

    use super::{AtlasTextureDesc, AtlasTextureFactory, AtlasTextureFormat, AtlasTextureUsage};

    /// Atlas texture factory backed by a wgpu device
    pub struct WgpuAtlasTextureFactory {
        device: Arc<wgpu::Device>,
    }

    impl WgpuAtlasTextureFactory {
        pub fn new(device: Arc<wgpu::Device>) -> Self {
            Self { device }
        }
    }

    fn to_wgpu_format(format: AtlasTextureFormat) -> wgpu::TextureFormat {
        match format {
            AtlasTextureFormat::Depth16Unorm => wgpu::TextureFormat::Depth16Unorm,
            AtlasTextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
            AtlasTextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            AtlasTextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            AtlasTextureFormat::Depth32FloatStencil8 => wgpu::TextureFormat::Depth32FloatStencil8,
            AtlasTextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        }
    }

    fn to_wgpu_usage(usage: AtlasTextureUsage) -> wgpu::TextureUsages {
        let mut out = wgpu::TextureUsages::empty();
        if usage.contains(AtlasTextureUsage::COPY_SRC) {
            out |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(AtlasTextureUsage::COPY_DST) {
            out |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(AtlasTextureUsage::TEXTURE_BINDING) {
            out |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(AtlasTextureUsage::RENDER_ATTACHMENT) {
            out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        out
    }

    impl AtlasTextureFactory for WgpuAtlasTextureFactory {
        type Texture = Arc<wgpu::Texture>;

        fn create_atlas_texture(&self, desc: &AtlasTextureDesc) -> Result<Self::Texture, String> {
            let limit = self.device.limits().max_texture_dimension_2d;
            if desc.size > limit {
                return Err(format!(
                    "atlas size {} exceeds device limit {}",
                    desc.size, limit
                ));
            }

            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label.as_str()),
                size: wgpu::Extent3d {
                    width: desc.size,
                    height: desc.size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: to_wgpu_format(desc.format),
                usage: to_wgpu_usage(desc.usage),
                view_formats: &[],
            });

            Ok(Arc::new(texture))
        }
    }
}
