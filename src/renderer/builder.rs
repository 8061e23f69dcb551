//! The default render pipeline.
//!
//! Shadow cascades feed the model pass; the model pass's attachments fan out
//! into the bloom chain, edge detection and optional SSAO; everything joins
//! in the combine pass, then contrast. The "combine before blur" checkpoint
//! is the normal frame output; the trailing blur chain produces the blurred
//! variant the menu draws behind itself.

use smallvec::SmallVec;

use crate::errors::Result;
use crate::handle::Shared;
use crate::renderer::backend::RenderBackend;
use crate::renderer::options::RenderOptions;
use crate::renderer::pass::{PassConfig, PassId, PassOps, RenderMethod, RenderSource};
use crate::renderer::pipeline::{Pipeline, PipelineOptions};
use crate::resources::framebuffer::{Attachment, AttachmentConfig};
use crate::resources::shader::{ProgramLibrary, SamplerVar};
use crate::resources::texture::Texture;
use crate::resources::uniforms::CASCADES_MAX;

/// Checkpoint tags of the default pipeline.
pub const CHECKPOINT_COMBINED: u32 = 1;
pub const CHECKPOINT_BLURRED: u32 = 2;

pub struct PipelineBuilderOpts<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub options: &'a RenderOptions,
    pub programs: &'a ProgramLibrary,
}

/// Picks the first renderable HDR color format, falling back to RGBA8.
fn hdr_format(backend: &dyn RenderBackend, options: &RenderOptions) -> wgpu::TextureFormat {
    if !options.hdr {
        return wgpu::TextureFormat::Rgba8Unorm;
    }
    [
        wgpu::TextureFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba32Float,
    ]
    .into_iter()
    .find(|&format| backend.texture_format_supported(format))
    .unwrap_or(wgpu::TextureFormat::Rgba8Unorm)
}

/// Builds the default pipeline. On any pass failure the partial pipeline is
/// torn down and the error returned, leaving no passes behind.
pub fn build_default_pipeline(
    backend: &mut dyn RenderBackend,
    opts: &PipelineBuilderOpts<'_>,
) -> Result<Pipeline> {
    let mut pl = Pipeline::new(
        backend,
        &PipelineOptions {
            name: opts.name,
            width: opts.width,
            height: opts.height,
        },
    )?;

    match build_passes(backend, &mut pl, opts) {
        Ok(()) => Ok(pl),
        Err(err) => {
            pl.release(backend);
            Err(err)
        }
    }
}

fn build_passes(
    backend: &mut dyn RenderBackend,
    pl: &mut Pipeline,
    opts: &PipelineBuilderOpts<'_>,
) -> Result<()> {
    let caps = backend.caps();
    let options = opts.options;
    let programs = opts.programs;

    let model_pass_msaa = options.model_msaa && caps.msaa;
    let model_pass_method = if model_pass_msaa {
        RenderMethod::Blit
    } else {
        RenderMethod::Use
    };
    let edge_shader = if options.edge_sobel { "sobel" } else { "laplace" };
    let edge_msaa_shader = if options.edge_sobel { "sobel-msaa" } else { "laplace" };

    // Shadow: one layered pass, or one pass per cascade without layered
    // attachment support
    let shadow_override = programs.find("shadow")?;
    let mut shadow_passes: SmallVec<[PassId; CASCADES_MAX]> = SmallVec::new();
    if caps.layered_framebuffers {
        shadow_passes.push(pl.add_pass(
            backend,
            PassConfig {
                name: "shadow",
                sources: vec![RenderSource::mq()],
                attachments: AttachmentConfig::DEPTH,
                color_formats: SmallVec::new(),
                depth_format: Some(wgpu::TextureFormat::Depth32Float),
                ops: PassOps::Shadow,
                shader_override: Some(shadow_override.clone()),
                multisampled: options.shadow_msaa,
                layers: CASCADES_MAX as u32,
                cascade: -1,
                ..PassConfig::default()
            },
        )?);
    } else {
        for cascade in 0..CASCADES_MAX {
            shadow_passes.push(pl.add_pass(
                backend,
                PassConfig {
                    name: "shadow",
                    sources: vec![RenderSource::mq()],
                    attachments: AttachmentConfig::DEPTH,
                    color_formats: SmallVec::new(),
                    depth_format: Some(wgpu::TextureFormat::Depth32Float),
                    ops: PassOps::Shadow,
                    shader_override: Some(shadow_override.clone()),
                    multisampled: options.shadow_msaa,
                    cascade: cascade as i32,
                    ..PassConfig::default()
                },
            )?);
        }
    }

    let hdr_fmt = hdr_format(backend, options);

    // Model pass: color, emission, normals, depth-distance, bloom input,
    // view-space normals; plus depth
    let mut model_sources = vec![RenderSource::mq()];
    if caps.layered_framebuffers {
        model_sources.push(RenderSource::pass(
            shadow_passes[0],
            Attachment::Depth,
            RenderMethod::Use,
            SamplerVar::ShadowMap,
        ));
    } else {
        let samplers = [
            SamplerVar::ShadowMap,
            SamplerVar::ShadowMap1,
            SamplerVar::ShadowMap2,
            SamplerVar::ShadowMap3,
        ];
        for (pass, sampler) in shadow_passes.iter().zip(samplers) {
            model_sources.push(RenderSource::pass(
                *pass,
                Attachment::Depth,
                RenderMethod::Use,
                sampler,
            ));
        }
    }

    let model_pass = pl.add_pass(
        backend,
        PassConfig {
            name: "model",
            sources: model_sources,
            attachments: AttachmentConfig::color_depth(6),
            color_formats: SmallVec::from_slice(&[
                hdr_fmt,
                hdr_fmt,
                wgpu::TextureFormat::Rgba8Unorm,
                wgpu::TextureFormat::R32Float,
                hdr_fmt,
                wgpu::TextureFormat::Rgba8Unorm,
            ]),
            depth_format: Some(wgpu::TextureFormat::Depth32Float),
            ops: PassOps::Model,
            multisampled: model_pass_msaa,
            cascade: -1,
            ..PassConfig::default()
        },
    )?;

    // Bloom chain at quarter resolution
    let downsample = pl.add_pass(
        backend,
        PassConfig {
            name: "downsample",
            sources: vec![RenderSource::pass(
                model_pass,
                Attachment::Color(1),
                model_pass_method,
                SamplerVar::ModelTex,
            )],
            color_formats: SmallVec::from_slice(&[hdr_fmt]),
            shader: Some(programs.find("downsample")?),
            scale: 0.25,
            ..PassConfig::default()
        },
    )?;
    let vblur = pl.add_pass(
        backend,
        PassConfig {
            name: "vblur",
            sources: vec![RenderSource::pass(
                downsample,
                Attachment::Color(0),
                RenderMethod::Use,
                SamplerVar::ModelTex,
            )],
            color_formats: SmallVec::from_slice(&[hdr_fmt]),
            shader: Some(programs.find("vblur")?),
            scale: 0.25,
            ..PassConfig::default()
        },
    )?;
    let hblur = pl.add_pass(
        backend,
        PassConfig {
            name: "hblur",
            sources: vec![RenderSource::pass(
                vblur,
                Attachment::Color(0),
                RenderMethod::Use,
                SamplerVar::ModelTex,
            )],
            color_formats: SmallVec::from_slice(&[hdr_fmt]),
            shader: Some(programs.find("hblur")?),
            scale: 0.25,
            ..PassConfig::default()
        },
    )?;
    let bloom = pl.add_pass(
        backend,
        PassConfig {
            name: "bloom",
            sources: vec![
                RenderSource::pass(
                    hblur,
                    Attachment::Color(0),
                    RenderMethod::Use,
                    SamplerVar::ModelTex,
                ),
                RenderSource::pass(
                    model_pass,
                    Attachment::Color(1),
                    model_pass_method,
                    SamplerVar::EmissionMap,
                ),
            ],
            color_formats: SmallVec::from_slice(&[hdr_fmt]),
            shader: Some(programs.find("upsample")?),
            ..PassConfig::default()
        },
    )?;

    // Edge detection over the distance and normal attachments
    let edge = pl.add_pass(
        backend,
        PassConfig {
            name: "edge",
            sources: vec![
                RenderSource::pass(
                    model_pass,
                    Attachment::Color(3),
                    if options.edge_sobel {
                        RenderMethod::Use
                    } else {
                        model_pass_method
                    },
                    SamplerVar::ModelTex,
                ),
                RenderSource::pass(
                    model_pass,
                    Attachment::Color(2),
                    if options.edge_sobel {
                        RenderMethod::Use
                    } else {
                        model_pass_method
                    },
                    SamplerVar::NormalMap,
                ),
            ],
            color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::R8Unorm]),
            shader: Some(programs.find(if model_pass_msaa {
                edge_msaa_shader
            } else {
                edge_shader
            })?),
            ..PassConfig::default()
        },
    )?;

    let smaa_weights = if options.edge_antialiasing {
        Some(pl.add_pass(
            backend,
            PassConfig {
                name: "smaa-weights",
                sources: vec![RenderSource::pass(
                    edge,
                    Attachment::Color(0),
                    RenderMethod::Use,
                    SamplerVar::ModelTex,
                )],
                shader: Some(programs.find("smaa-blend-weights")?),
                ..PassConfig::default()
            },
        )?)
    } else {
        None
    };

    // Optional SSAO over depth + view-space normals, blurred
    let ssao_final = if options.ssao {
        let ssao = pl.add_pass(
            backend,
            PassConfig {
                name: "ssao",
                sources: vec![
                    RenderSource::pass(
                        model_pass,
                        Attachment::Depth,
                        model_pass_method,
                        SamplerVar::ModelTex,
                    ),
                    RenderSource::pass(
                        model_pass,
                        Attachment::Color(5),
                        model_pass_method,
                        SamplerVar::NormalMap,
                    ),
                ],
                color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::R8Unorm]),
                shader: Some(programs.find("ssao")?),
                ..PassConfig::default()
            },
        )?;
        let ssao_vblur = pl.add_pass(
            backend,
            PassConfig {
                name: "ssao-vblur",
                sources: vec![RenderSource::pass(
                    ssao,
                    Attachment::Color(0),
                    RenderMethod::Use,
                    SamplerVar::ModelTex,
                )],
                color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::R8Unorm]),
                shader: Some(programs.find("vblur")?),
                scale: 0.25,
                ..PassConfig::default()
            },
        )?;
        Some(pl.add_pass(
            backend,
            PassConfig {
                name: "ssao-hblur",
                sources: vec![RenderSource::pass(
                    ssao_vblur,
                    Attachment::Color(0),
                    RenderMethod::Use,
                    SamplerVar::ModelTex,
                )],
                color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::R8Unorm]),
                shader: Some(programs.find("hblur")?),
                scale: 0.25,
                ..PassConfig::default()
            },
        )?)
    } else {
        None
    };

    // Combine: scene color + bloom + edges (+ occlusion)
    let mut combine_sources = vec![
        RenderSource::pass(
            model_pass,
            Attachment::Color(0),
            model_pass_method,
            SamplerVar::ModelTex,
        ),
        RenderSource::pass(
            bloom,
            Attachment::Color(0),
            RenderMethod::Use,
            SamplerVar::EmissionMap,
        ),
        RenderSource::pass(
            edge,
            Attachment::Color(0),
            RenderMethod::Use,
            SamplerVar::SobelTex,
        ),
        RenderSource::pass(
            model_pass,
            Attachment::Color(4),
            model_pass_method,
            SamplerVar::NormalMap,
        ),
    ];
    match ssao_final {
        Some(pass) => combine_sources.push(RenderSource::pass(
            pass,
            Attachment::Color(0),
            RenderMethod::Use,
            SamplerVar::ShadowMap,
        )),
        None => {
            let black = Shared::new(Texture::black_pixel(backend)?);
            combine_sources.push(RenderSource::plug(black, SamplerVar::ShadowMap));
        }
    }
    let combine = pl.add_pass(
        backend,
        PassConfig {
            name: "combine",
            sources: combine_sources,
            shader: Some(programs.find("combine")?),
            ..PassConfig::default()
        },
    )?;

    let combined = match smaa_weights {
        Some(weights) => pl.add_pass(
            backend,
            PassConfig {
                name: "smaa-blend",
                sources: vec![
                    RenderSource::pass(
                        combine,
                        Attachment::Color(0),
                        RenderMethod::Use,
                        SamplerVar::ModelTex,
                    ),
                    RenderSource::pass(
                        weights,
                        Attachment::Color(0),
                        RenderMethod::Use,
                        SamplerVar::NormalMap,
                    ),
                ],
                shader: Some(programs.find("smaa-neighborhood-blend")?),
                ..PassConfig::default()
            },
        )?,
        None => combine,
    };

    let contrast = pl.add_pass(
        backend,
        PassConfig {
            name: "contrast",
            sources: vec![RenderSource::pass(
                combined,
                Attachment::Color(0),
                RenderMethod::Use,
                SamplerVar::ModelTex,
            )],
            shader: Some(programs.find("contrast")?),
            checkpoint: Some(CHECKPOINT_COMBINED),
            ..PassConfig::default()
        },
    )?;

    // Extra blur chain for the menu backdrop
    let mut blurred = contrast;
    for (name, shader, scale) in [
        ("menu-downsample", "downsample", 0.25),
        ("menu-vblur", "vblur", 0.25),
        ("menu-hblur", "hblur", 0.25),
    ] {
        blurred = pl.add_pass(
            backend,
            PassConfig {
                name,
                sources: vec![RenderSource::pass(
                    blurred,
                    Attachment::Color(0),
                    RenderMethod::Use,
                    SamplerVar::ModelTex,
                )],
                shader: Some(programs.find(shader)?),
                scale,
                ..PassConfig::default()
            },
        )?;
    }
    pl.add_pass(
        backend,
        PassConfig {
            name: "menu-contrast",
            sources: vec![RenderSource::pass(
                blurred,
                Attachment::Color(0),
                RenderMethod::Use,
                SamplerVar::ModelTex,
            )],
            shader: Some(programs.find("contrast")?),
            checkpoint: Some(CHECKPOINT_BLURRED),
            ..PassConfig::default()
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{BackendCaps, HeadlessBackend};
    use crate::resources::shader::{BlockMask, ShaderProgram, ShaderProgramOptions};

    fn stub_programs(backend: &mut HeadlessBackend) -> ProgramLibrary {
        let mut library = ProgramLibrary::new();
        for name in [
            "shadow",
            "downsample",
            "vblur",
            "hblur",
            "upsample",
            "sobel",
            "combine",
            "contrast",
            "ssao",
        ] {
            library.insert(Shared::new(
                ShaderProgram::new(
                    backend,
                    &ShaderProgramOptions {
                        name,
                        vert: "void main() {}",
                        frag: "void main() {}",
                        geom: None,
                        blocks: BlockMask::POSTPROC,
                    },
                )
                .unwrap(),
            ));
        }
        library
    }

    #[test]
    fn test_default_pipeline_layered() {
        let mut backend = HeadlessBackend::new();
        let programs = stub_programs(&mut backend);
        let options = RenderOptions::default();
        let mut pl = build_default_pipeline(
            &mut backend,
            &PipelineBuilderOpts {
                name: "main",
                width: 1280,
                height: 720,
                options: &options,
                programs: &programs,
            },
        )
        .unwrap();

        // 1 shadow + model + 4 bloom + edge + combine + contrast + 4 menu
        assert_eq!(pl.nr_passes(), 13);
        assert!(pl.output().is_some());
        pl.release(&mut backend);
    }

    #[test]
    fn test_default_pipeline_expands_cascades_without_layers() {
        let mut backend = HeadlessBackend::with_caps(BackendCaps {
            layered_framebuffers: false,
            msaa: false,
            ..BackendCaps::default()
        });
        let programs = stub_programs(&mut backend);
        let options = RenderOptions::default();
        let pl = build_default_pipeline(
            &mut backend,
            &PipelineBuilderOpts {
                name: "main",
                width: 1280,
                height: 720,
                options: &options,
                programs: &programs,
            },
        )
        .unwrap();

        // 4 shadow passes instead of 1
        assert_eq!(pl.nr_passes(), 16);
    }

    #[test]
    fn test_missing_program_fails_cleanly() {
        let mut backend = HeadlessBackend::new();
        let library = ProgramLibrary::new();
        let options = RenderOptions::default();
        let result = build_default_pipeline(
            &mut backend,
            &PipelineBuilderOpts {
                name: "main",
                width: 1280,
                height: 720,
                options: &options,
                programs: &library,
            },
        );
        assert!(result.is_err());
    }
}
