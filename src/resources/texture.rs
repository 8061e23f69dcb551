//! Texture resources.
//!
//! A texture records its sampler state and format at init time; storage is
//! allocated by the first `load`/`alloc` and reallocated by `resize`, which
//! preserves format and sampler state. The GPU id is owned by exactly one
//! texture at a time: [`Texture::transfer`] hands the id to a new wrapper and
//! clears the source's loaded flag, so only one `deinit` releases it.

use glam::Vec4;

use crate::errors::{GlintError, Result};
use crate::renderer::backend::{BackendId, RenderBackend, TextureDesc};

/// Texture storage shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    D2,
    D2Array,
    D3,
}

impl TextureKind {
    fn dimension(self) -> wgpu::TextureDimension {
        match self {
            TextureKind::D2 | TextureKind::D2Array => wgpu::TextureDimension::D2,
            TextureKind::D3 => wgpu::TextureDimension::D3,
        }
    }
}

/// Options for [`Texture::init`].
#[derive(Debug, Clone, Copy)]
pub struct TextureOptions {
    pub kind: TextureKind,
    pub format: wgpu::TextureFormat,
    pub min_filter: wgpu::FilterMode,
    pub mag_filter: wgpu::FilterMode,
    pub wrap: wgpu::AddressMode,
    /// Border color for `ClampToBorder` wrap.
    pub border: Option<Vec4>,
    /// Layer count for array and 3-D textures.
    pub layers: Option<u32>,
    pub multisampled: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            kind: TextureKind::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            min_filter: wgpu::FilterMode::Linear,
            mag_filter: wgpu::FilterMode::Linear,
            wrap: wgpu::AddressMode::ClampToEdge,
            border: None,
            layers: None,
            multisampled: false,
        }
    }
}

#[derive(Debug)]
pub struct Texture {
    opts: TextureOptions,
    width: u32,
    height: u32,
    id: Option<BackendId>,
    loaded: bool,
}

impl Texture {
    /// Records sampler state and format; storage is allocated on first use.
    pub fn init(opts: TextureOptions) -> Result<Self> {
        match opts.kind {
            TextureKind::D2 if opts.layers.is_some() => {
                return Err(GlintError::InvalidArguments("2D texture with layers"));
            }
            TextureKind::D2Array | TextureKind::D3 if opts.layers.is_none() => {
                return Err(GlintError::InvalidArguments("array texture without layers"));
            }
            _ => {}
        }
        if opts.border.is_some() && opts.wrap != wgpu::AddressMode::ClampToBorder {
            return Err(GlintError::InvalidArguments("border color without border wrap"));
        }
        Ok(Self {
            opts,
            width: 0,
            height: 0,
            id: None,
            loaded: false,
        })
    }

    fn desc(&self, width: u32, height: u32) -> TextureDesc {
        TextureDesc {
            dimension: self.opts.kind.dimension(),
            format: self.opts.format,
            width,
            height,
            layers: self.opts.layers.unwrap_or(1),
            samples: if self.opts.multisampled { 4 } else { 1 },
            min_filter: self.opts.min_filter,
            mag_filter: self.opts.mag_filter,
            wrap: self.opts.wrap,
            border: self.opts.border,
        }
    }

    /// Allocates storage without uploading texels (render targets).
    pub fn alloc(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        if self.id.is_some() {
            return Err(GlintError::AlreadyLoaded("texture storage"));
        }
        let id = backend.create_texture(&self.desc(width, height))?;
        self.id = Some(id);
        self.width = width;
        self.height = height;
        self.loaded = true;
        Ok(())
    }

    /// Uploads texels, allocating or reallocating storage as needed.
    pub fn load(
        &mut self,
        backend: &mut dyn RenderBackend,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()> {
        if self.id.is_some() && (format != self.opts.format || width != self.width || height != self.height) {
            // Format or size change: storage is recreated
            self.deinit(backend);
        }
        self.opts.format = format;
        if self.id.is_none() {
            self.alloc(backend, width, height)?;
        }
        let id = self.id.ok_or(GlintError::TextureNotLoaded)?;
        backend.upload_texture(id, width, height, data)?;
        self.loaded = true;
        Ok(())
    }

    /// Reallocates storage at a new size, preserving format and sampler
    /// state. On failure the previous size (and storage) is kept.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        let id = self.id.ok_or(GlintError::TextureNotLoaded)?;
        if width == 0 || height == 0 || width.max(height) > backend.caps().max_texture_size {
            return Err(GlintError::InvalidTextureSize { width, height });
        }
        backend.resize_texture(id, width, height)?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Releases the GPU id, if this texture still owns one.
    pub fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(id) = self.id.take() {
            if self.loaded {
                backend.destroy_texture(id);
            }
        }
        self.loaded = false;
    }

    /// Transfers the GPU id into a new wrapper. The source keeps its
    /// descriptor state but is no longer loaded; its `deinit` becomes a
    /// no-op for the transferred id.
    #[must_use]
    pub fn transfer(&mut self) -> Texture {
        let moved = Texture {
            opts: self.opts,
            width: self.width,
            height: self.height,
            id: self.id.take(),
            loaded: self.loaded,
        };
        self.loaded = false;
        moved
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn id(&self) -> Option<BackendId> {
        self.id
    }

    #[must_use]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.opts.format
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn layers(&self) -> u32 {
        self.opts.layers.unwrap_or(1)
    }

    fn pixel(backend: &mut dyn RenderBackend, texel: [u8; 4]) -> Result<Texture> {
        let mut tex = Texture::init(TextureOptions::default())?;
        tex.load(backend, wgpu::TextureFormat::Rgba8Unorm, 1, 1, &texel)?;
        Ok(tex)
    }

    /// Reusable 1x1 white texture.
    pub fn white_pixel(backend: &mut dyn RenderBackend) -> Result<Texture> {
        Self::pixel(backend, [255, 255, 255, 255])
    }

    /// Reusable 1x1 black texture.
    pub fn black_pixel(backend: &mut dyn RenderBackend) -> Result<Texture> {
        Self::pixel(backend, [0, 0, 0, 255])
    }

    /// Reusable 1x1 transparent texture.
    pub fn transparent_pixel(backend: &mut dyn RenderBackend) -> Result<Texture> {
        Self::pixel(backend, [0, 0, 0, 0])
    }

    /// Decodes a PNG blob and uploads it as RGBA8.
    pub fn from_png(backend: &mut dyn RenderBackend, bytes: &[u8]) -> Result<Texture> {
        let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut tex = Texture::init(TextureOptions::default())?;
        tex.load(backend, wgpu::TextureFormat::Rgba8UnormSrgb, width, height, &rgba)?;
        Ok(tex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{BackendCaps, HeadlessBackend};

    #[test]
    fn test_options_validation() {
        assert!(Texture::init(TextureOptions {
            kind: TextureKind::D2Array,
            layers: None,
            ..TextureOptions::default()
        })
        .is_err());
        assert!(Texture::init(TextureOptions {
            border: Some(Vec4::ONE),
            ..TextureOptions::default()
        })
        .is_err());
        assert!(Texture::init(TextureOptions {
            border: Some(Vec4::ONE),
            wrap: wgpu::AddressMode::ClampToBorder,
            ..TextureOptions::default()
        })
        .is_ok());
    }

    #[test]
    fn test_resize_at_device_maximum() {
        let mut backend = HeadlessBackend::with_caps(BackendCaps {
            max_texture_size: 512,
            ..BackendCaps::default()
        });
        let mut tex = Texture::init(TextureOptions::default()).unwrap();
        tex.alloc(&mut backend, 64, 64).unwrap();

        assert!(tex.resize(&mut backend, 512, 512).is_ok());
        let err = tex.resize(&mut backend, 513, 512).unwrap_err();
        assert!(matches!(err, GlintError::InvalidTextureSize { .. }));
        // Failed resize keeps the previous size
        assert_eq!((tex.width(), tex.height()), (512, 512));
        tex.deinit(&mut backend);
    }

    #[test]
    fn test_transfer_moves_gpu_ownership() {
        let mut backend = HeadlessBackend::new();
        let mut src = Texture::white_pixel(&mut backend).unwrap();
        let mut moved = src.transfer();

        assert!(!src.is_loaded());
        assert!(moved.is_loaded());

        // Only the transferred wrapper releases the id
        src.deinit(&mut backend);
        moved.deinit(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }
}
