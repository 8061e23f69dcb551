//! Render pass configuration.
//!
//! A pass draws either the model queue or a fullscreen quad into its output
//! framebuffer, feeding on sources: the MQ itself, another pass's attachment
//! (sampled directly or blitted into a pass-local input FBO first), or a
//! bare texture. Each source names the sampler it binds to.

use smallvec::SmallVec;

use crate::handle::Shared;
use crate::renderer::backend::RenderBackend;
use crate::resources::framebuffer::{
    Attachment, AttachmentConfig, Framebuffer, MAX_COLOR_ATTACHMENTS,
};
use crate::resources::shader::{SamplerVar, ShaderProgram};
use crate::resources::texture::Texture;

/// Index of a pass within its pipeline.
pub type PassId = usize;

/// How a source's pixels reach the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMethod {
    /// Draw the model queue.
    Render,
    /// Sample the source attachment directly.
    Use,
    /// Blit the source attachment into this pass's input FBO, then sample
    /// that (resolves multisampled attachments).
    Blit,
    /// Bind a bare texture.
    Plug,
}

/// What a source refers to.
#[derive(Clone)]
pub enum SourceKind {
    /// The scene's model queue.
    Mq,
    /// An attachment of an earlier pass.
    Pass { pass: PassId, attachment: Attachment },
    /// A texture owned outside the pipeline.
    Texture(Shared<Texture>),
}

#[derive(Clone)]
pub struct RenderSource {
    pub kind: SourceKind,
    pub method: RenderMethod,
    /// Sampler the resolved texture binds to; ignored for `Render`.
    pub sampler: SamplerVar,
}

impl RenderSource {
    #[must_use]
    pub fn mq() -> Self {
        Self {
            kind: SourceKind::Mq,
            method: RenderMethod::Render,
            sampler: SamplerVar::ModelTex,
        }
    }

    #[must_use]
    pub fn pass(
        pass: PassId,
        attachment: Attachment,
        method: RenderMethod,
        sampler: SamplerVar,
    ) -> Self {
        Self {
            kind: SourceKind::Pass { pass, attachment },
            method,
            sampler,
        }
    }

    #[must_use]
    pub fn plug(tex: Shared<Texture>, sampler: SamplerVar) -> Self {
        Self {
            kind: SourceKind::Texture(tex),
            method: RenderMethod::Plug,
            sampler,
        }
    }
}

/// Per-pass fixed behavior: how a resize request is transformed and how the
/// target is prepared before drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOps {
    /// Square power-of-two target, reverse depth, depth-only clear.
    Shadow,
    /// Scene-sized target, standard depth, color+depth clear.
    Model,
    /// Scaled target, no clear.
    Postproc,
}

impl PassOps {
    /// Transforms a requested size into the pass's actual target size.
    #[must_use]
    pub fn resize(self, scale: f32, width: u32, height: u32) -> (u32, u32) {
        match self {
            PassOps::Shadow => {
                // Snap to the next power of two of the larger side
                if width == height && width.is_power_of_two() {
                    return (width, height);
                }
                let side = width.max(height).max(1).next_power_of_two();
                (side, side)
            }
            PassOps::Model => (width, height),
            PassOps::Postproc => (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            ),
        }
    }

    /// Clears and depth setup before the pass draws.
    pub fn prepare(self, backend: &mut dyn RenderBackend) {
        match self {
            PassOps::Shadow => {
                backend.depth_func(wgpu::CompareFunction::Greater);
                backend.clear(None, Some(0.0));
            }
            PassOps::Model => {
                backend.depth_func(wgpu::CompareFunction::Less);
                backend.clear(Some(glam::Vec4::new(0.0, 0.0, 0.0, 1.0)), Some(1.0));
            }
            PassOps::Postproc => {}
        }
    }
}

/// Options for [`crate::renderer::pipeline::Pipeline::add_pass`].
pub struct PassConfig {
    pub name: &'static str,
    pub sources: Vec<RenderSource>,
    pub attachments: AttachmentConfig,
    pub color_formats: SmallVec<[wgpu::TextureFormat; MAX_COLOR_ATTACHMENTS]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub ops: PassOps,
    /// Program drawing the fullscreen quad (postprocessing passes).
    pub shader: Option<Shared<ShaderProgram>>,
    /// Overrides each drawn model's own program (shadow passes).
    pub shader_override: Option<Shared<ShaderProgram>>,
    pub multisampled: bool,
    pub nr_samples: u32,
    /// Cascade this pass renders, or -1 for non-cascaded passes. A layered
    /// pass (`layers > 1`) renders all cascades itself.
    pub cascade: i32,
    pub layers: u32,
    /// Resize multiplier for `Postproc` ops.
    pub scale: f32,
    /// Tag callers use to pick an early render result.
    pub checkpoint: Option<u32>,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            name: "",
            sources: Vec::new(),
            attachments: AttachmentConfig::COLOR0,
            color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::Rgba8Unorm]),
            depth_format: None,
            ops: PassOps::Postproc,
            shader: None,
            shader_override: None,
            multisampled: false,
            nr_samples: 4,
            cascade: -1,
            layers: 1,
            scale: 1.0,
            checkpoint: None,
        }
    }
}

/// One node of the pipeline graph.
pub struct RenderPass {
    pub(crate) name: &'static str,
    pub(crate) sources: Vec<RenderSource>,
    pub(crate) fbo: Framebuffer,
    /// Input FBOs for `Blit` sources, parallel to `sources`.
    pub(crate) blit_fbo: Vec<Option<Framebuffer>>,
    pub(crate) ops: PassOps,
    pub(crate) shader: Option<Shared<ShaderProgram>>,
    pub(crate) shader_override: Option<Shared<ShaderProgram>>,
    pub(crate) cascade: i32,
    pub(crate) scale: f32,
    pub(crate) checkpoint: Option<u32>,
}

impl RenderPass {
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// A pass attachment texture, for wiring later passes and debug views.
    #[must_use]
    pub fn texture(&self, attachment: Attachment) -> Option<&Texture> {
        self.fbo.texture(attachment)
    }

    #[must_use]
    pub fn checkpoint(&self) -> Option<u32> {
        self.checkpoint
    }

    /// Whether any source draws the model queue.
    #[must_use]
    pub fn draws_mq(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s.kind, SourceKind::Mq))
    }

    pub(crate) fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        for fbo in self.blit_fbo.iter_mut().flatten() {
            fbo.deinit(backend);
        }
        self.blit_fbo.clear();
        self.fbo.deinit(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_resize_snaps_to_pow2() {
        assert_eq!(PassOps::Shadow.resize(1.0, 1920, 1080), (2048, 2048));
        assert_eq!(PassOps::Shadow.resize(1.0, 1024, 1024), (1024, 1024));
        assert_eq!(PassOps::Shadow.resize(1.0, 640, 480), (1024, 1024));
    }

    #[test]
    fn test_postproc_resize_scales() {
        assert_eq!(PassOps::Postproc.resize(0.25, 1920, 1080), (480, 270));
        assert_eq!(PassOps::Postproc.resize(0.25, 2, 2), (1, 1));
        assert_eq!(PassOps::Model.resize(0.25, 1920, 1080), (1920, 1080));
    }
}
