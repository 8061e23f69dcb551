//! The model-queue draw loop.
//!
//! Walks the MQ in render order: per textured model, set render state, bind
//! the program (or the pass override), the vertex attributes and the texture
//! slots; per live entity, cull, pick the LOD, fill the per-draw uniform
//! blocks, upload the dirty referenced subset and emit the draw call.

use glam::Vec3;

use crate::renderer::backend::{RenderBackend, RenderState};
use crate::renderer::options::RenderOptions;
use crate::resources::shader::{ShaderProgram, UniformStore};
use crate::resources::uniforms::JOINTS_MAX;
use crate::scene::entity::{EntityFlags, UpdateKind};
use crate::scene::mq::Mq;
use crate::scene::view::Subview;

/// Per-frame draw counters; tests and the debug overlay read these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub nr_txms: u64,
    pub nr_entities: u64,
    pub nr_culled: u64,
    pub nr_draws: u64,
}

/// Inputs of one [`draw_mq`] invocation.
pub struct DrawParams<'a> {
    /// Frustum to cull against; `None` disables culling.
    pub cull: Option<&'a Subview>,
    /// Camera position; enables distance LOD selection when present.
    pub camera_pos: Option<Vec3>,
    /// Substitute for every model's own program (shadow passes).
    pub shader_override: Option<&'a ShaderProgram>,
    pub options: &'a RenderOptions,
}

pub fn draw_mq(
    backend: &mut dyn RenderBackend,
    mq: &mut Mq,
    uniforms: &mut UniformStore,
    params: &DrawParams<'_>,
    stats: &mut RenderStats,
) {
    let nr_characters = mq.nr_characters;
    let mut characters_seen = 0usize;
    let (models, entities, order) = mq.split();

    for &txm_key in order {
        let Some(txm) = models.get(txm_key) else {
            continue;
        };
        if txm.entities().is_empty() {
            continue;
        }
        let model = txm.model();
        let program: &ShaderProgram = match params.shader_override {
            Some(override_prog) => override_prog,
            None => model.program(),
        };

        backend.set_render_state(RenderState {
            cull_face: model.cull_face,
            alpha_blend: model.alpha_blend,
            depth_test: true,
        });
        program.bind(backend);
        if model.bind_attrs(backend).is_err() {
            continue;
        }
        txm.bind_textures(backend);

        txm.material.write_block(uniforms.material_mut());
        uniforms.lighting_mut().use_normals = i32::from(txm.has_normal_map());

        let mut bound_lod = None;
        let mut nr_idx = 0;

        for &entity_key in txm.entities() {
            let Some(entity) = entities.get_mut(entity_key) else {
                continue;
            };
            if !entity.is_alive() || !entity.is_visible() {
                continue;
            }

            if !entity.flags.contains(EntityFlags::SKIP_CULLING) {
                if let Some(subview) = params.cull {
                    if !subview.aabb_in_frustum(entity.aabb()) {
                        stats.nr_culled += 1;
                        continue;
                    }
                }
            }

            if let Some(camera_pos) = params.camera_pos {
                entity.select_lod(model, camera_pos);
            }
            if bound_lod != Some(entity.cur_lod) {
                match model.bind_lod(backend, entity.cur_lod) {
                    Ok(count) => {
                        nr_idx = count;
                        bound_lod = Some(entity.cur_lod);
                    }
                    Err(err) => {
                        log::warn!("'{}': LOD bind failed: {err}", model.name());
                        continue;
                    }
                }
            }

            let bloom = uniforms.bloom_mut();
            bloom.bloom_exposure = params.options.bloom_exposure;
            bloom.bloom_operator = params.options.bloom_operator;
            bloom.bloom_intensity = if entity.bloom_intensity.abs() > 1e-3 {
                entity.bloom_intensity
            } else {
                params.options.bloom_intensity
            };
            bloom.bloom_threshold = if entity.bloom_threshold.abs() > 1e-3 {
                entity.bloom_threshold
            } else {
                params.options.bloom_threshold
            };

            let outline = uniforms.outline_mut();
            outline.outline_exclude =
                i32::from(entity.flags.contains(EntityFlags::OUTLINE_EXCLUDE));
            if entity.update_kind == UpdateKind::Character && nr_characters > 0 {
                characters_seen += 1;
                outline.sobel_solid = 1;
                outline.sobel_solid_id = characters_seen as f32 / nr_characters as f32;
            } else {
                outline.sobel_solid = 0;
            }

            let color_pt = uniforms.color_pt_mut();
            color_pt.in_color = entity.color;
            color_pt.color_passthrough = entity.color_pt as i32;

            let skinning = uniforms.skinning_mut();
            let joints = entity.joint_transforms();
            if !joints.is_empty() && model.is_animated() {
                skinning.use_skinning = 1;
                let n = joints.len().min(JOINTS_MAX);
                skinning.joint_transforms[..n].copy_from_slice(&joints[..n]);
            } else {
                skinning.use_skinning = 0;
            }

            uniforms.transform_mut().trans = *entity.mx();

            uniforms.update(backend, program);
            backend.draw_indexed(nr_idx, 1);
            stats.nr_draws += 1;
            stats.nr_entities += 1;
        }

        stats.nr_txms += 1;
    }
}
