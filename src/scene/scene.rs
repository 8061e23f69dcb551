//! Top-level scene composition.
//!
//! Owns the model queue, the camera and light state, the program library and
//! the render pipeline, and drives the frame in the fixed order: physics
//! step, entity updates, view/frustum recompute, light fitting and grid
//! compute, then the pipeline. Teardown runs in reverse order of
//! construction: pipeline, model queue, programs, remaining textures.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::context::EngineContext;
use crate::errors::Result;
use crate::renderer::backend::RenderBackend;
use crate::renderer::options::RenderOptions;
use crate::renderer::pipeline::{FrameInputs, Pipeline};
use crate::resources::shader::ProgramLibrary;
use crate::scene::camera::Camera;
use crate::scene::entity::{CameraBv, UpdateEnv};
use crate::scene::light::LightTable;
use crate::scene::mq::{EntityKey, Mq};
use crate::scene::physics::PhysicsBridge;
use crate::scene::view::{LightFit, View};

/// Options for [`Scene::new`].
pub struct SceneOptions<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl Default for SceneOptions<'_> {
    fn default() -> Self {
        Self {
            name: "scene",
            width: 1280,
            height: 720,
            fov: 70f32.to_radians(),
            near_plane: 0.1,
            far_plane: 500.0,
        }
    }
}

pub struct Scene {
    pub name: String,
    pub mq: Mq,
    pub light: LightTable,
    pub camera: Camera,
    pub view: View,
    pub light_view: View,
    pub light_fit: LightFit,
    pub pipeline: Option<Pipeline>,
    pub programs: ProgramLibrary,
    pub render_options: RenderOptions,
    pub physics: Option<Box<dyn PhysicsBridge>>,
    /// The controlled character.
    pub control: Option<EntityKey>,
    /// The entity the camera focuses on.
    pub focus: Option<EntityKey>,
    pub bv: CameraBv,
    /// Named sound effect table for the audio collaborator.
    pub sfx: FxHashMap<String, String>,
    pub zoom: f32,
    width: u32,
    height: u32,
    exit_request: bool,
}

impl Scene {
    pub fn new(opts: &SceneOptions<'_>) -> Result<Self> {
        let view = View::new(opts.fov, opts.near_plane, opts.far_plane);
        let light_view = View::new(opts.fov, opts.near_plane, opts.far_plane);
        let mut light = LightTable::new()?;
        light.set_viewport(opts.width, opts.height);

        Ok(Self {
            name: opts.name.to_string(),
            mq: Mq::new(),
            light,
            camera: Camera::new(),
            view,
            light_view,
            light_fit: LightFit::default(),
            pipeline: None,
            programs: ProgramLibrary::new(),
            render_options: RenderOptions::default(),
            physics: None,
            control: None,
            focus: None,
            bv: CameraBv::default(),
            sfx: FxHashMap::default(),
            zoom: 1.0,
            width: opts.width,
            height: opts.height,
            exit_request: false,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Asks the main loop to stop after this frame.
    pub fn request_exit(&mut self) {
        self.exit_request = true;
    }

    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.exit_request
    }

    /// Viewport resize: projection, light grid and pipeline targets.
    pub fn handle_resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.width = width;
        self.height = height;
        self.view.proj_update = true;
        self.light.set_viewport(width, height);
        match &mut self.pipeline {
            Some(pipeline) => pipeline.resize(backend, width, height),
            None => Ok(()),
        }
    }

    /// One frame of simulation, in the fixed order the renderer depends on:
    /// physics, entity updates, camera/view, light fit and grid.
    pub fn update(&mut self, ctx: &mut EngineContext, backend: &mut dyn RenderBackend, dt: f64) {
        ctx.advance(dt);
        let time = ctx.current_time();

        // Physics step, then copy simulated transforms back
        if let Some(physics) = self.physics.as_deref_mut() {
            physics.step(dt as f32);

            let (_, entities, _) = self.mq.split();
            for (_, entity) in entities.iter_mut() {
                if let Some(body) = entity.phys_body {
                    if let Some(mx) = physics.body_transform(body) {
                        entity.apply_body_transform(&mx);
                    }
                }
            }
        }

        // Camera follows the control entity
        let fps = if dt > 0.0 { (1.0 / dt) as f32 } else { 60.0 };
        self.camera.move_target(fps);
        let (focus_point, focus_height) = match self.control.and_then(|key| self.mq.entity(key)) {
            Some(entity) => (entity.position(), entity.aabb().size().y * 0.75),
            None => (Vec3::ZERO, 2.0),
        };
        self.camera
            .update(focus_height, focus_point, self.physics.as_deref());
        self.camera.reset_movement();
        let eye = self.camera.position(focus_point + Vec3::new(0.0, focus_height, 0.0));

        // Entity updates
        let idle_phase = ctx.frand();
        let control = self
            .control
            .and_then(|key| self.mq.entity(key).map(|e| (key, e.position())));
        {
            let physics = self.physics.as_deref_mut();
            let (models, entities, order) = self.mq.split();
            let mut env = UpdateEnv {
                time,
                camera_pos: eye,
                control,
                light: &mut self.light,
                physics,
                bv: &mut self.bv,
                idle_phase,
            };
            for &txm_key in order {
                let Some(txm) = models.get(txm_key) else {
                    continue;
                };
                for &entity_key in txm.entities() {
                    if let Some(entity) = entities.get_mut(entity_key) {
                        entity.update(entity_key, txm, &mut env);
                    }
                }
            }
        }

        // View and frustum
        self.view.update_perspective_projection(self.width, self.height, self.zoom);
        self.view.update_from_angles(
            eye,
            self.camera.current_pitch,
            self.camera.current_yaw,
            0.0,
        );
        self.view.calc_frustum();

        // Shadow view follows the first directional light
        if self.light.nr_lights() > 0 && self.light.is_directional(0) {
            let dir = self.light_direction(0);
            self.light_view
                .update_from_frustum(&self.view, dir, &self.light_fit);
        }

        // Clustered light grid
        if let Err(err) = self.light.grid_compute(backend, &self.view) {
            ctx.report_error(&err);
        }

        self.sync_uniform_blocks();
    }

    fn light_direction(&self, idx: usize) -> Vec3 {
        self.light
            .direction(idx)
            .try_normalize()
            .unwrap_or(Vec3::NEG_Y)
    }

    /// Fills the frame-level uniform blocks from scene state.
    fn sync_uniform_blocks(&mut self) {
        let Some(pipeline) = &mut self.pipeline else {
            return;
        };
        let uniforms = pipeline.uniforms_mut();

        self.light.write_block(uniforms.lighting_mut(), false);

        let shadow = uniforms.shadow_mut();
        for cascade in 0..crate::resources::uniforms::CASCADES_MAX {
            let subview = &self.light_view.subview[cascade];
            shadow.shadow_mvp[cascade] = subview.proj_mx * subview.view_mx;
            shadow.cascade_distances[cascade] = self.view.divider[cascade].into();
        }
        shadow.shadow_tint = self.light.shadow_tint;
        shadow.shadow_vsm = i32::from(self.render_options.shadow_vsm);
        shadow.shadow_outline = i32::from(self.render_options.shadow_outline);
        shadow.shadow_outline_threshold = self.render_options.shadow_outline_threshold;

        let render_common = uniforms.render_common_mut();
        render_common.use_hdr = i32::from(self.render_options.hdr);
        render_common.use_msaa = i32::from(self.render_options.model_msaa);

        let postproc = uniforms.postproc_mut();
        postproc.near_plane = self.view.main.near_plane;
        postproc.far_plane = self.view.main.far_plane;
        postproc.contrast = self.render_options.contrast;
        postproc.lighting_exposure = self.render_options.lighting_exposure;
        postproc.lighting_operator = self.render_options.lighting_operator;
        postproc.fog_near = self.render_options.fog_near;
        postproc.fog_far = self.render_options.fog_far;
        postproc.fog_color = self.render_options.fog_color;
    }

    /// Renders the frame through the pipeline. `stop` picks an early
    /// checkpoint (the blurred menu backdrop).
    pub fn render(&mut self, backend: &mut dyn RenderBackend, stop: Option<u32>) {
        let Some(pipeline) = &mut self.pipeline else {
            return;
        };
        let eye = self.view.main.inv_view_mx.w_axis.truncate();
        pipeline.render(
            backend,
            &mut FrameInputs {
                mq: &mut self.mq,
                camera_view: &self.view,
                light_view: &self.light_view,
                camera_pos: eye,
                options: &self.render_options,
            },
            stop,
        );
    }

    /// Tears the scene down in reverse construction order.
    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.release(backend);
        }
        self.mq.release(backend);
        self.programs = ProgramLibrary::new();
        self.light.deinit(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Shared;
    use crate::renderer::backend::HeadlessBackend;
    use crate::renderer::pass::{PassConfig, PassOps, RenderSource};
    use crate::renderer::pipeline::PipelineOptions;
    use crate::resources::framebuffer::AttachmentConfig;
    use crate::resources::model::{Model, ModelOptions, ModelTx, TextureSource};
    use crate::resources::primitives;
    use crate::resources::shader::{BlockMask, ShaderProgram, ShaderProgramOptions};
    use smallvec::SmallVec;

    fn scene_with_cube(backend: &mut HeadlessBackend) -> (Scene, EntityKey) {
        let mut scene = Scene::new(&SceneOptions {
            width: 1600,
            height: 900,
            ..SceneOptions::default()
        })
        .unwrap();

        let program = Shared::new(
            ShaderProgram::new(
                backend,
                &ShaderProgramOptions {
                    name: "model",
                    vert: "void main() {}",
                    frag: "void main() {}",
                    geom: None,
                    blocks: BlockMask::PROJVIEW | BlockMask::TRANSFORM | BlockMask::MATERIAL,
                },
            )
            .unwrap(),
        );
        scene.programs.insert(program.clone());

        let mesh = primitives::cube_mesh();
        let model = Shared::new(
            Model::from_mesh(backend, "cube", program, &mesh, &ModelOptions::default()).unwrap(),
        );
        let txm = ModelTx::new(backend, model.pass(), TextureSource::None).unwrap();
        let key = scene.mq.add_model(txm);
        let entity = scene.mq.spawn_entity(key);

        // A single model pass; the default builder is exercised elsewhere
        let mut pipeline = Pipeline::new(
            backend,
            &PipelineOptions {
                name: "minimal",
                width: 1600,
                height: 900,
            },
        )
        .unwrap();
        pipeline
            .add_pass(
                backend,
                PassConfig {
                    name: "model",
                    sources: vec![RenderSource::mq()],
                    attachments: AttachmentConfig::color_depth(1),
                    color_formats: SmallVec::from_slice(&[wgpu::TextureFormat::Rgba16Float]),
                    depth_format: Some(wgpu::TextureFormat::Depth32Float),
                    ops: PassOps::Model,
                    ..PassConfig::default()
                },
            )
            .unwrap();
        scene.pipeline = Some(pipeline);

        (scene, entity)
    }

    fn ctx() -> EngineContext {
        EngineContext::new(Default::default(), Default::default())
    }

    #[test]
    fn test_cube_fly_through() {
        let mut backend = HeadlessBackend::new();
        let (mut scene, _) = scene_with_cube(&mut backend);
        let mut ctx = ctx();

        // Camera orbits the origin at distance 5
        scene.camera.target_pitch = 0.0;
        scene.camera.target_yaw = 0.0;
        scene.camera.dist = 5.0;

        scene.update(&mut ctx, &mut backend, 1.0 / 60.0);
        scene.render(&mut backend, None);

        let stats = scene.pipeline.as_ref().unwrap().stats;
        assert_eq!(stats.nr_entities, 1);
        assert_eq!(stats.nr_culled, 0);
        assert_eq!(stats.nr_draws, 1);

        scene.shutdown(&mut backend);
    }

    #[test]
    fn test_outside_frustum_cull() {
        let mut backend = HeadlessBackend::new();
        let (mut scene, entity) = scene_with_cube(&mut backend);
        let mut ctx = ctx();

        scene
            .mq
            .entity_mut(entity)
            .unwrap()
            .set_position(Vec3::new(1000.0, 0.0, 0.0));

        scene.update(&mut ctx, &mut backend, 1.0 / 60.0);
        scene.render(&mut backend, None);

        let stats = scene.pipeline.as_ref().unwrap().stats;
        assert_eq!(stats.nr_entities, 0);
        assert_eq!(stats.nr_culled, 1);

        scene.shutdown(&mut backend);
    }

    #[test]
    fn test_shadow_cascade_setup() {
        let mut backend = HeadlessBackend::new();
        let (mut scene, _) = scene_with_cube(&mut backend);
        let mut ctx = ctx();

        let l0 = scene.light.alloc().unwrap();
        scene.light.set_directional(l0, true);
        scene.light.set_direction(l0, Vec3::new(-0.3, -1.0, -0.2));

        scene.update(&mut ctx, &mut backend, 1.0 / 60.0);

        assert_eq!(scene.view.main.near_plane, 0.1);
        assert_eq!(scene.view.divider, [25.0, 70.0, 150.0, 500.0]);

        // Shadow block carries the cascade split distances
        let shadow = scene.pipeline.as_mut().unwrap().uniforms_mut().shadow();
        assert_eq!(shadow.cascade_distances[0].v, 25.0);
        assert_eq!(shadow.cascade_distances[3].v, 500.0);
        assert_eq!(shadow.shadow_outline_threshold, 0.4);

        scene.shutdown(&mut backend);
    }
}
