//! The render pipeline: an ordered graph of passes.
//!
//! Per frame, every pass resolves its sources (blit into the pass input FBO,
//! bind an earlier attachment, or plug a bare texture), binds its output
//! framebuffer, prepares it and draws either the model queue or the
//! fullscreen quad. The last pass's color-0 attachment is the frame output;
//! a checkpoint tag lets callers stop at an earlier result.

use glam::Vec3;
use smallvec::SmallVec;

use crate::errors::{GlintError, Result};
use crate::renderer::backend::RenderBackend;
use crate::renderer::draw::{draw_mq, DrawParams, RenderStats};
use crate::renderer::options::RenderOptions;
use crate::renderer::pass::{
    PassConfig, PassId, PassOps, RenderMethod, RenderPass, RenderSource, SourceKind,
};
use crate::resources::framebuffer::{Attachment, AttachmentConfig, Framebuffer, FramebufferOptions};
use crate::resources::mesh::Mesh;
use crate::resources::primitives;
use crate::resources::shader::{ShaderProgram, UniformStore, VertexAttr};
use crate::resources::texture::Texture;
use crate::resources::uniforms::CASCADES_MAX;
use crate::resources::buffer::{Buffer, BufferOptions, BufferRole, BufferUsage};
use crate::scene::mq::Mq;
use crate::scene::view::{Subview, View};

/// Options for [`Pipeline::new`].
pub struct PipelineOptions<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
}

/// Everything a frame render needs from the scene.
pub struct FrameInputs<'a> {
    pub mq: &'a mut Mq,
    pub camera_view: &'a View,
    pub light_view: &'a View,
    pub camera_pos: Vec3,
    pub options: &'a RenderOptions,
}

struct QuadGeometry {
    main: Buffer,
    position: Buffer,
    texcoord: Buffer,
    index: Buffer,
    nr_idx: u32,
}

impl QuadGeometry {
    fn new(backend: &mut dyn RenderBackend, mesh: &Mesh) -> Result<Self> {
        let attrs = [VertexAttr::Position, VertexAttr::TexCoord];
        let flat = mesh.flatten(&attrs)?;
        let main = Buffer::init(
            backend,
            &BufferOptions {
                data: Some(&flat.data),
                stride: flat.stride as u64,
                ..BufferOptions::default()
            },
        )?;
        let view = |backend: &mut dyn RenderBackend, attr: VertexAttr, offset: usize| {
            Buffer::init(
                backend,
                &BufferOptions {
                    format: attr.format(),
                    offset: offset as u64,
                    stride: flat.stride as u64,
                    main: Some(&main),
                    ..BufferOptions::default()
                },
            )
        };
        let position = view(backend, VertexAttr::Position, flat.offsets[0])?;
        let texcoord = view(backend, VertexAttr::TexCoord, flat.offsets[1])?;
        let index = Buffer::init(
            backend,
            &BufferOptions {
                role: BufferRole::ElementArray,
                usage: BufferUsage::Static,
                data: Some(bytemuck::cast_slice(mesh.indices())),
                ..BufferOptions::default()
            },
        )?;
        Ok(Self {
            main,
            position,
            texcoord,
            index,
            nr_idx: mesh.nr_idx() as u32,
        })
    }

    fn bind(&self, backend: &mut dyn RenderBackend) -> Result<u32> {
        self.position.bind(backend, VertexAttr::Position.location())?;
        self.texcoord.bind(backend, VertexAttr::TexCoord.location())?;
        self.index.bind_index(backend, wgpu::IndexFormat::Uint16)?;
        Ok(self.nr_idx)
    }

    fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        self.index.deinit(backend);
        self.texcoord.deinit(backend);
        self.position.deinit(backend);
        self.main.deinit(backend);
    }
}

pub struct Pipeline {
    name: String,
    width: u32,
    height: u32,
    passes: Vec<RenderPass>,
    uniforms: UniformStore,
    quad: QuadGeometry,
    pub stats: RenderStats,
}

impl Pipeline {
    pub fn new(backend: &mut dyn RenderBackend, opts: &PipelineOptions<'_>) -> Result<Self> {
        if opts.width == 0 || opts.height == 0 {
            return Err(GlintError::InvalidArguments("pipeline size"));
        }
        Ok(Self {
            name: opts.name.to_string(),
            width: opts.width,
            height: opts.height,
            passes: Vec::new(),
            uniforms: UniformStore::new(),
            quad: QuadGeometry::new(backend, &primitives::fullscreen_quad_mesh())?,
            stats: RenderStats::default(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn nr_passes(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn pass(&self, id: PassId) -> Option<&RenderPass> {
        self.passes.get(id)
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformStore {
        &mut self.uniforms
    }

    /// The frame output: the last pass's color-0 attachment.
    #[must_use]
    pub fn output(&self) -> Option<&Texture> {
        self.passes.last()?.texture(Attachment::Color(0))
    }

    /// Appends a pass. A pass that cannot allocate its framebuffer is not
    /// added and the error is returned.
    pub fn add_pass(&mut self, backend: &mut dyn RenderBackend, cfg: PassConfig) -> Result<PassId> {
        for source in &cfg.sources {
            if let SourceKind::Pass { pass, .. } = source.kind {
                if pass >= self.passes.len() {
                    return Err(GlintError::InvalidArguments("source pass index"));
                }
            }
        }

        let multisampled = cfg.multisampled && backend.caps().msaa;
        let (width, height) = cfg.ops.resize(cfg.scale, self.width, self.height);

        let mut fbo = Framebuffer::init(
            backend,
            &FramebufferOptions {
                width,
                height,
                attachments: cfg.attachments,
                color_formats: cfg.color_formats.clone(),
                depth_format: cfg.depth_format,
                layers: cfg.layers,
                samples: if multisampled { cfg.nr_samples } else { 1 },
            },
        )?;

        // One input FBO per blit source, matching the source format
        let mut blit_fbo = Vec::with_capacity(cfg.sources.len());
        for source in &cfg.sources {
            if source.method != RenderMethod::Blit {
                blit_fbo.push(None);
                continue;
            }
            let SourceKind::Pass { pass, attachment } = source.kind else {
                blit_fbo.push(None);
                continue;
            };
            let Some(tex) = self.passes[pass].texture(attachment) else {
                blit_fbo.push(None);
                continue;
            };
            let format = tex.format();
            match Framebuffer::init(
                backend,
                &FramebufferOptions {
                    width,
                    height,
                    attachments: AttachmentConfig::COLOR0,
                    color_formats: SmallVec::from_slice(&[format]),
                    depth_format: None,
                    layers: 1,
                    samples: 1,
                },
            ) {
                Ok(input) => blit_fbo.push(Some(input)),
                Err(err) => {
                    for input in blit_fbo.iter_mut().flatten() {
                        input.deinit(backend);
                    }
                    fbo.deinit(backend);
                    return Err(err);
                }
            }
        }

        self.passes.push(RenderPass {
            name: cfg.name,
            sources: cfg.sources,
            fbo,
            blit_fbo,
            ops: cfg.ops,
            shader: cfg.shader,
            shader_override: cfg.shader_override,
            cascade: cfg.cascade,
            scale: cfg.scale,
            checkpoint: cfg.checkpoint,
        });
        Ok(self.passes.len() - 1)
    }

    /// Resizes every pass for a new viewport. A pass whose reallocation
    /// fails keeps its previous size; the first error is reported after the
    /// walk completes instead of aborting it.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GlintError::InvalidTextureSize { width, height });
        }
        self.width = width;
        self.height = height;

        let mut first_error = None;
        for pass in &mut self.passes {
            let (w, h) = pass.ops.resize(pass.scale, width, height);
            if let Err(err) = pass.fbo.resize(backend, w, h) {
                log::warn!("pass '{}' resize to {w}x{h} failed: {err}", pass.name);
                first_error.get_or_insert(err);
                continue;
            }
            for input in pass.blit_fbo.iter_mut().flatten() {
                if let Err(err) = input.resize(backend, w, h) {
                    log::warn!("pass '{}' input resize failed: {err}", pass.name);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resizes the shadow passes to a square side (the debug slider).
    pub fn shadow_resize(&mut self, backend: &mut dyn RenderBackend, side: u32) -> Result<()> {
        let side = side.max(1).next_power_of_two();
        let mut first_error = None;
        for pass in &mut self.passes {
            if pass.ops != PassOps::Shadow {
                continue;
            }
            if let Err(err) = pass.fbo.resize(backend, side, side) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_projview(uniforms: &mut UniformStore, subview: &Subview) {
        let block = uniforms.projview_mut();
        block.proj = subview.proj_mx;
        block.view = subview.view_mx;
        block.inverse_view = subview.inv_view_mx;
    }

    /// Renders the frame, pass by pass. `stop` names a checkpoint to end at
    /// early. Source resolution failures are logged and skip the source,
    /// not the frame.
    pub fn render(
        &mut self,
        backend: &mut dyn RenderBackend,
        frame: &mut FrameInputs<'_>,
        stop: Option<u32>,
    ) {
        self.stats = RenderStats::default();
        let layered = backend.caps().layered_framebuffers;
        let camera_view: &View = frame.camera_view;
        let light_view: &View = frame.light_view;
        let options: &RenderOptions = frame.options;
        let camera_pos = frame.camera_pos;

        for i in 0..self.passes.len() {
            // (a) resolve sources
            for j in 0..self.passes[i].sources.len() {
                let source = &self.passes[i].sources[j];
                match (&source.kind, source.method) {
                    (SourceKind::Mq, _) => {}
                    (SourceKind::Texture(tex), _) => {
                        if let Some(id) = tex.id() {
                            backend.bind_texture(source.sampler, id);
                        }
                    }
                    (&SourceKind::Pass { pass, attachment }, RenderMethod::Blit) => {
                        let Some(input) = self.passes[i].blit_fbo[j].as_ref() else {
                            continue;
                        };
                        let Attachment::Color(color_idx) = attachment else {
                            continue;
                        };
                        if let Err(err) =
                            Framebuffer::blit(backend, input, &self.passes[pass].fbo, color_idx)
                        {
                            log::warn!("pass '{}': blit failed: {err}", self.passes[i].name);
                            continue;
                        }
                        if let Some(id) =
                            input.texture(Attachment::Color(0)).and_then(Texture::id)
                        {
                            backend.bind_texture(source.sampler, id);
                        }
                    }
                    (&SourceKind::Pass { pass, attachment }, _) => {
                        if let Some(id) =
                            self.passes[pass].texture(attachment).and_then(Texture::id)
                        {
                            backend.bind_texture(source.sampler, id);
                        }
                    }
                }
            }

            // (b) + (c) bind the output target and prepare it
            let pass = &self.passes[i];
            if pass.fbo.bind(backend).is_err() {
                continue;
            }
            pass.ops.prepare(backend);

            // (d) draw
            if pass.draws_mq() {
                let override_prog: Option<&ShaderProgram> =
                    pass.shader_override.as_deref();

                if pass.fbo.layers() > 1 && layered {
                    // One layered pass covers all cascades
                    for cascade in 0..CASCADES_MAX {
                        if pass.fbo.bind_layer(backend, cascade as u32).is_err() {
                            continue;
                        }
                        pass.ops.prepare(backend);
                        let subview = &light_view.subview[cascade];
                        Self::set_projview(&mut self.uniforms, subview);
                        draw_mq(
                            backend,
                            frame.mq,
                            &mut self.uniforms,
                            &DrawParams {
                                cull: Some(subview),
                                camera_pos: None,
                                shader_override: override_prog,
                                options,
                            },
                            &mut self.stats,
                        );
                    }
                } else if pass.cascade >= 0 {
                    let subview = &light_view.subview[pass.cascade as usize];
                    Self::set_projview(&mut self.uniforms, subview);
                    draw_mq(
                        backend,
                        frame.mq,
                        &mut self.uniforms,
                        &DrawParams {
                            cull: Some(subview),
                            camera_pos: None,
                            shader_override: override_prog,
                            options,
                        },
                        &mut self.stats,
                    );
                } else {
                    Self::set_projview(&mut self.uniforms, &camera_view.main);
                    draw_mq(
                        backend,
                        frame.mq,
                        &mut self.uniforms,
                        &DrawParams {
                            cull: Some(&camera_view.main),
                            camera_pos: Some(camera_pos),
                            shader_override: override_prog,
                            options,
                        },
                        &mut self.stats,
                    );
                }
            } else if let Some(program) = &self.passes[i].shader {
                program.bind(backend);
                let fbo = &self.passes[i].fbo;
                let postproc = self.uniforms.postproc_mut();
                postproc.width = fbo.width() as f32;
                postproc.height = fbo.height() as f32;
                self.uniforms.update(backend, program);
                if let Ok(nr_idx) = self.quad.bind(backend) {
                    backend.draw_indexed(nr_idx, 1);
                    self.stats.nr_draws += 1;
                }
            }

            if stop.is_some() && self.passes[i].checkpoint == stop {
                break;
            }
        }

        backend.bind_framebuffer(None, self.width, self.height);
    }

    /// Pass output listing for the debug dropdown.
    #[must_use]
    pub fn debug_textures(&self) -> Vec<(String, u32, u32)> {
        self.passes
            .iter()
            .map(|pass| {
                (
                    pass.name.to_string(),
                    pass.fbo.width(),
                    pass.fbo.height(),
                )
            })
            .collect()
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        for pass in &mut self.passes {
            pass.deinit(backend);
        }
        self.passes.clear();
        self.quad.deinit(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    fn pipeline(backend: &mut HeadlessBackend) -> Pipeline {
        Pipeline::new(
            backend,
            &PipelineOptions {
                name: "test",
                width: 1280,
                height: 720,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_first_pass_failure_leaves_no_passes() {
        let mut backend = HeadlessBackend::new();
        let mut pl = pipeline(&mut backend);

        backend.fail_next_alloc = true;
        let result = pl.add_pass(
            &mut backend,
            PassConfig {
                name: "model",
                sources: vec![RenderSource::mq()],
                ops: PassOps::Model,
                ..PassConfig::default()
            },
        );
        assert!(result.is_err());
        assert_eq!(pl.nr_passes(), 0);
        assert!(pl.output().is_none());
        pl.release(&mut backend);
    }

    #[test]
    fn test_resize_protocol() {
        let mut backend = HeadlessBackend::new();
        let mut pl = pipeline(&mut backend);
        pl.add_pass(
            &mut backend,
            PassConfig {
                name: "model",
                sources: vec![RenderSource::mq()],
                ops: PassOps::Model,
                ..PassConfig::default()
            },
        )
        .unwrap();
        pl.add_pass(
            &mut backend,
            PassConfig {
                name: "post",
                scale: 0.5,
                ..PassConfig::default()
            },
        )
        .unwrap();

        // 0x0 is rejected before any pass is touched
        assert!(pl.resize(&mut backend, 0, 0).is_err());

        assert!(pl.resize(&mut backend, 1920, 1080).is_ok());
        let sizes = pl.debug_textures();
        assert_eq!(sizes[0], ("model".to_string(), 1920, 1080));
        assert_eq!(sizes[1], ("post".to_string(), 960, 540));
        pl.release(&mut backend);
    }

    #[test]
    fn test_source_validation() {
        let mut backend = HeadlessBackend::new();
        let mut pl = pipeline(&mut backend);
        let result = pl.add_pass(
            &mut backend,
            PassConfig {
                name: "bad",
                sources: vec![RenderSource::pass(
                    7,
                    Attachment::Color(0),
                    RenderMethod::Use,
                    crate::resources::shader::SamplerVar::ModelTex,
                )],
                ..PassConfig::default()
            },
        );
        assert!(result.is_err());
        pl.release(&mut backend);
    }
}
