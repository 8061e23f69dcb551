//! Framebuffers with configurable attachment sets.
//!
//! A framebuffer owns its attachment textures. `resize` reallocates every
//! attachment; if any reallocation fails the previously resized attachments
//! are restored and the framebuffer keeps its old size.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::errors::{GlintError, Result};
use crate::renderer::backend::{BackendId, RenderBackend};
use crate::resources::texture::{Texture, TextureKind, TextureOptions};

pub const MAX_COLOR_ATTACHMENTS: usize = 6;

bitflags! {
    /// Which attachments a pass renders into.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttachmentConfig: u32 {
        const COLOR0 = 1 << 0;
        const COLOR1 = 1 << 1;
        const COLOR2 = 1 << 2;
        const COLOR3 = 1 << 3;
        const COLOR4 = 1 << 4;
        const COLOR5 = 1 << 5;
        const DEPTH  = 1 << 6;
    }
}

impl AttachmentConfig {
    /// Color attachments 0..n plus depth.
    #[must_use]
    pub fn color_depth(n: u32) -> Self {
        Self::color(n) | AttachmentConfig::DEPTH
    }

    /// Color attachments 0..n.
    #[must_use]
    pub fn color(n: u32) -> Self {
        let n = n.min(MAX_COLOR_ATTACHMENTS as u32);
        AttachmentConfig::from_bits_truncate((1 << n) - 1)
    }

    #[must_use]
    pub fn nr_colors(self) -> usize {
        (self.bits() & 0x3f).count_ones() as usize
    }
}

/// One attachment of a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Color(u32),
    Depth,
}

/// Options for [`Framebuffer::init`].
#[derive(Debug, Clone)]
pub struct FramebufferOptions {
    pub width: u32,
    pub height: u32,
    pub attachments: AttachmentConfig,
    /// One format per color attachment, in attachment order.
    pub color_formats: SmallVec<[wgpu::TextureFormat; MAX_COLOR_ATTACHMENTS]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    /// Layer count; > 1 renders into an array texture (cascades).
    pub layers: u32,
    pub samples: u32,
}

impl Default for FramebufferOptions {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            attachments: AttachmentConfig::COLOR0,
            color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::Rgba8Unorm]),
            depth_format: None,
            layers: 1,
            samples: 1,
        }
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    attachments: AttachmentConfig,
    color: SmallVec<[Texture; 2]>,
    depth: Option<Texture>,
    id: Option<BackendId>,
    width: u32,
    height: u32,
    layers: u32,
}

impl Framebuffer {
    pub fn init(backend: &mut dyn RenderBackend, opts: &FramebufferOptions) -> Result<Self> {
        let nr_colors = opts.attachments.nr_colors();
        if opts.color_formats.len() != nr_colors {
            return Err(GlintError::InvalidArguments("color format count"));
        }
        if opts.attachments.contains(AttachmentConfig::DEPTH) && opts.depth_format.is_none() {
            return Err(GlintError::InvalidArguments("depth attachment without format"));
        }
        if opts.width == 0 || opts.height == 0 {
            return Err(GlintError::InvalidTextureSize {
                width: opts.width,
                height: opts.height,
            });
        }

        let mut fb = Self {
            attachments: opts.attachments,
            color: SmallVec::new(),
            depth: None,
            id: None,
            width: opts.width,
            height: opts.height,
            layers: opts.layers,
        };

        let result = fb.alloc_attachments(backend, opts);
        if let Err(err) = result {
            // Roll back whatever was allocated before the failure
            fb.deinit(backend);
            return Err(err);
        }
        Ok(fb)
    }

    fn attachment_texture(format: wgpu::TextureFormat, layers: u32, samples: u32) -> Result<Texture> {
        let depth = format.is_depth_stencil_format();
        Texture::init(TextureOptions {
            kind: if layers > 1 { TextureKind::D2Array } else { TextureKind::D2 },
            format,
            min_filter: if depth { wgpu::FilterMode::Nearest } else { wgpu::FilterMode::Linear },
            mag_filter: if depth { wgpu::FilterMode::Nearest } else { wgpu::FilterMode::Linear },
            wrap: wgpu::AddressMode::ClampToEdge,
            border: None,
            layers: (layers > 1).then_some(layers),
            multisampled: samples > 1,
        })
    }

    fn alloc_attachments(
        &mut self,
        backend: &mut dyn RenderBackend,
        opts: &FramebufferOptions,
    ) -> Result<()> {
        for &format in &opts.color_formats {
            let mut tex = Self::attachment_texture(format, opts.layers, opts.samples)?;
            tex.alloc(backend, opts.width, opts.height)?;
            self.color.push(tex);
        }
        if let Some(format) = opts.depth_format {
            if opts.attachments.contains(AttachmentConfig::DEPTH) {
                let mut tex = Self::attachment_texture(format, opts.layers, opts.samples)?;
                tex.alloc(backend, opts.width, opts.height)?;
                self.depth = Some(tex);
            }
        }

        let color_ids: SmallVec<[BackendId; MAX_COLOR_ATTACHMENTS]> = self
            .color
            .iter()
            .map(|t| t.id().ok_or(GlintError::TextureNotLoaded))
            .collect::<Result<_>>()?;
        let depth_id = match &self.depth {
            Some(tex) => Some(tex.id().ok_or(GlintError::TextureNotLoaded)?),
            None => None,
        };

        self.id = Some(backend.create_framebuffer(
            &color_ids,
            depth_id,
            opts.width,
            opts.height,
            opts.layers,
        )?);
        Ok(())
    }

    /// Reallocates every attachment at the new size. A request for 0x0 is
    /// rejected without touching the existing storage; a mid-way failure
    /// restores the attachments already resized.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GlintError::InvalidTextureSize { width, height });
        }
        if width == self.width && height == self.height {
            return Ok(());
        }

        let (old_w, old_h) = (self.width, self.height);
        let mut resized = 0usize;
        let mut failure = None;

        for tex in self.color.iter_mut().chain(self.depth.iter_mut()) {
            match tex.resize(backend, width, height) {
                Ok(()) => resized += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            for tex in self
                .color
                .iter_mut()
                .chain(self.depth.iter_mut())
                .take(resized)
            {
                // Restoring to a size that worked before; failure here would
                // leave the FBO inconsistent, so surface it loudly
                if let Err(restore_err) = tex.resize(backend, old_w, old_h) {
                    log::error!("framebuffer restore failed: {restore_err}");
                }
            }
            return Err(err);
        }

        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Copies one color attachment from `src` into `dst`.
    pub fn blit(
        backend: &mut dyn RenderBackend,
        dst: &Framebuffer,
        src: &Framebuffer,
        attachment: u32,
    ) -> Result<()> {
        if attachment as usize >= dst.color.len() || attachment as usize >= src.color.len() {
            return Err(GlintError::InvalidArguments("blit attachment index"));
        }
        let (dst_id, src_id) = match (dst.id, src.id) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(GlintError::FramebufferIncomplete("blit endpoints")),
        };
        backend.blit_color(dst_id, src_id, attachment)
    }

    /// Makes this framebuffer the render target.
    pub fn bind(&self, backend: &mut dyn RenderBackend) -> Result<()> {
        let id = self.id.ok_or(GlintError::FramebufferIncomplete("bind"))?;
        backend.bind_framebuffer(Some(id), self.width, self.height);
        Ok(())
    }

    /// Selects the destination layer of a layered framebuffer.
    pub fn bind_layer(&self, backend: &mut dyn RenderBackend, layer: u32) -> Result<()> {
        let id = self.id.ok_or(GlintError::FramebufferIncomplete("bind"))?;
        if layer >= self.layers {
            return Err(GlintError::InvalidArguments("framebuffer layer"));
        }
        backend.framebuffer_layer(id, layer);
        Ok(())
    }

    #[must_use]
    pub fn texture(&self, attachment: Attachment) -> Option<&Texture> {
        match attachment {
            Attachment::Color(i) => self.color.get(i as usize),
            Attachment::Depth => self.depth.as_ref(),
        }
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
        self.layers
    }

    #[must_use]
    pub fn attachments(&self) -> AttachmentConfig {
        self.attachments
    }

    pub fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(id) = self.id.take() {
            backend.destroy_framebuffer(id);
        }
        for mut tex in self.color.drain(..) {
            tex.deinit(backend);
        }
        if let Some(mut tex) = self.depth.take() {
            tex.deinit(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{BackendCaps, HeadlessBackend};

    fn color_depth_opts(width: u32, height: u32) -> FramebufferOptions {
        FramebufferOptions {
            width,
            height,
            attachments: AttachmentConfig::color_depth(2),
            color_formats: SmallVec::from_slice(&[
                wgpu::TextureFormat::Rgba16Float,
                wgpu::TextureFormat::Rgba8Unorm,
            ]),
            depth_format: Some(wgpu::TextureFormat::Depth32Float),
            layers: 1,
            samples: 1,
        }
    }

    #[test]
    fn test_attachment_mask_helpers() {
        assert_eq!(AttachmentConfig::color(3).nr_colors(), 3);
        assert!(AttachmentConfig::color_depth(1).contains(AttachmentConfig::DEPTH));
        assert_eq!(AttachmentConfig::color_depth(6).nr_colors(), 6);
    }

    #[test]
    fn test_resize_to_zero_is_rejected_in_place() {
        let mut backend = HeadlessBackend::new();
        let mut fb = Framebuffer::init(&mut backend, &color_depth_opts(256, 128)).unwrap();

        assert!(fb.resize(&mut backend, 0, 0).is_err());
        assert_eq!((fb.width(), fb.height()), (256, 128));
        assert!(fb.texture(Attachment::Color(0)).unwrap().is_loaded());
        fb.deinit(&mut backend);
    }

    #[test]
    fn test_resize_failure_restores_previous_size() {
        let mut backend = HeadlessBackend::with_caps(BackendCaps {
            max_texture_size: 1024,
            ..BackendCaps::default()
        });
        let mut fb = Framebuffer::init(&mut backend, &color_depth_opts(256, 128)).unwrap();

        assert!(fb.resize(&mut backend, 2048, 2048).is_err());
        assert_eq!((fb.width(), fb.height()), (256, 128));

        assert!(fb.resize(&mut backend, 512, 512).is_ok());
        assert_eq!(fb.texture(Attachment::Depth).unwrap().width(), 512);
        fb.deinit(&mut backend);
    }

    #[test]
    fn test_init_rolls_back_on_failure() {
        let mut backend = HeadlessBackend::new();
        backend.fail_next_alloc = true;
        assert!(Framebuffer::init(&mut backend, &color_depth_opts(64, 64)).is_err());
        assert_eq!(backend.live_textures(), 0);
    }
}
