//! Entities: instances of a textured model.
//!
//! An entity owns its transform, world AABB, animation playback state and
//! optional physics link; it references its `ModelTx` by key, and the
//! `ModelTx` keeps the back-reference list of entity keys. Transform
//! mutation sets the `UPDATED` flag; the per-frame update rebuilds the model
//! matrix (scale applied last), re-derives the world AABB from the model
//! box's eight corners, pushes the unscaled matrix into the physics body
//! and keeps the entity's light-table slot in sync.

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3, Vec4};

use crate::animation::{
    channels_transform, joint_transforms, AnimationQueue, JointPose, QueuedAnimation,
};
use crate::resources::mesh::Aabb;
use crate::resources::model::{Model, ModelTx};
use crate::scene::light::LightTable;
use crate::scene::mq::{EntityKey, ModelTxKey};
use crate::scene::physics::{BodyId, PhysicsBridge};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntityFlags: u32 {
        const ALIVE           = 1 << 0;
        const VISIBLE         = 1 << 1;
        const SKIP_CULLING    = 1 << 2;
        const OUTLINE_EXCLUDE = 1 << 3;
        /// Transform changed since the last update.
        const UPDATED         = 1 << 4;
    }
}

/// How the entity's color override feeds the fragment shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPassthrough {
    #[default]
    None = 0,
    Alpha = 1,
    All = 2,
}

/// The known per-frame update behaviors; dispatched by exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateKind {
    #[default]
    Default,
    Character,
    Particle,
}

/// The biggest bounding volume seen containing the camera or character.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraBv {
    pub entity: Option<EntityKey>,
    pub volume: f32,
}

/// Per-frame context threaded through entity updates.
pub struct UpdateEnv<'a> {
    pub time: f64,
    pub camera_pos: Vec3,
    pub control: Option<(EntityKey, Vec3)>,
    pub light: &'a mut LightTable,
    pub physics: Option<&'a mut (dyn PhysicsBridge + 'static)>,
    pub bv: &'a mut CameraBv,
    /// Pre-rolled uniform random in `[0, 1)` for idle-phase randomization.
    pub idle_phase: f32,
}

#[derive(Debug)]
pub struct Entity {
    model: ModelTxKey,
    pub flags: EntityFlags,
    pub update_kind: UpdateKind,

    position: Vec3,
    rotation: Quat,
    scale: f32,
    mx: Mat4,
    model_aabb: Aabb,
    aabb: Aabb,

    pub force_lod: i32,
    pub cur_lod: usize,

    pub color: Vec4,
    pub color_pt: ColorPassthrough,
    pub bloom_intensity: f32,
    pub bloom_threshold: f32,

    pub light_idx: Option<usize>,
    pub light_off: Vec3,
    pub phys_body: Option<BodyId>,

    pub aniq: AnimationQueue,
    joints: Vec<JointPose>,
    joint_transforms: Vec<Mat4>,
    ani_time: f64,
}

impl Entity {
    /// Creates an entity of `txm`; joint state is sized to the model.
    #[must_use]
    pub fn new(model: ModelTxKey, txm: &ModelTx) -> Self {
        let nr_joints = txm.model().nr_joints();
        Self {
            model,
            flags: EntityFlags::ALIVE | EntityFlags::VISIBLE | EntityFlags::UPDATED,
            update_kind: UpdateKind::Default,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            mx: Mat4::IDENTITY,
            model_aabb: txm.model().aabb(),
            aabb: txm.model().aabb(),
            force_lod: -1,
            cur_lod: 0,
            color: Vec4::ZERO,
            color_pt: ColorPassthrough::None,
            bloom_intensity: 0.0,
            bloom_threshold: 0.0,
            light_idx: None,
            light_off: Vec3::ZERO,
            phys_body: None,
            aniq: AnimationQueue::new(),
            joints: vec![JointPose::default(); nr_joints],
            joint_transforms: vec![Mat4::IDENTITY; nr_joints],
            ani_time: 0.0,
        }
    }

    #[must_use]
    pub fn model(&self) -> ModelTxKey {
        self.model
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.flags.contains(EntityFlags::ALIVE)
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.flags.contains(EntityFlags::VISIBLE)
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.flags.set(EntityFlags::VISIBLE, visible);
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[must_use]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    #[must_use]
    pub fn mx(&self) -> &Mat4 {
        &self.mx
    }

    #[must_use]
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    #[must_use]
    pub fn joint_transforms(&self) -> &[Mat4] {
        &self.joint_transforms
    }

    pub fn set_position(&mut self, pos: Vec3) {
        self.position = pos;
        self.flags |= EntityFlags::UPDATED;
    }

    pub fn translate(&mut self, off: Vec3) {
        self.set_position(self.position + off);
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.flags |= EntityFlags::UPDATED;
    }

    /// Euler convenience used by scene files: X, then Y, then Z.
    pub fn rotate(&mut self, rx: f32, ry: f32, rz: f32) {
        self.set_rotation(Quat::from_euler(glam::EulerRot::XYZ, rx, ry, rz));
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.flags |= EntityFlags::UPDATED;
    }

    pub fn set_color(&mut self, color_pt: ColorPassthrough, color: Vec4) {
        self.color_pt = color_pt;
        self.color = color;
    }

    /// Applies a simulated transform coming back from the physics body.
    pub fn apply_body_transform(&mut self, mx: &Mat4) {
        let (_, rotation, translation) = mx.to_scale_rotation_translation();
        self.position = translation;
        self.rotation = rotation;
        self.flags |= EntityFlags::UPDATED;
    }

    /// Forces or clears a fixed LOD; `lod < 0` returns to automatic.
    pub fn set_lod(&mut self, model: &Model, lod: i32, force: bool) {
        let mut lod = lod;
        if force {
            if lod < 0 {
                self.force_lod = -1;
                lod = 0;
            } else {
                self.force_lod = lod.clamp(0, model.nr_lods() as i32 - 1);
                lod = self.force_lod;
            }
        } else if self.force_lod >= 0 {
            lod = self.force_lod;
        }
        self.cur_lod = model.validate_lod(lod);
    }

    /// Per-frame LOD pick: forced value wins; otherwise, with the camera
    /// outside the AABB, the squared distance less the squared box edge over
    /// a fixed constant gives the level.
    pub fn select_lod(&mut self, model: &Model, camera_pos: Vec3) {
        if self.force_lod >= 0 {
            self.cur_lod = model.validate_lod(self.force_lod);
            return;
        }
        if self.aabb.contains_point(camera_pos) {
            return;
        }
        let dist = self.aabb.center() - camera_pos;
        let side = self.aabb.avg_edge();
        let scale = (dist.dot(dist) - side * side).abs() / 3600.0;
        self.set_lod(model, scale as i32, false);
    }

    fn needs_update(&mut self) -> bool {
        if self.flags.contains(EntityFlags::UPDATED) {
            self.flags -= EntityFlags::UPDATED;
            true
        } else {
            false
        }
    }

    /// The default per-frame update; character and particle variants layer
    /// on top of it.
    pub fn update(&mut self, key: EntityKey, txm: &ModelTx, env: &mut UpdateEnv<'_>) {
        match self.update_kind {
            UpdateKind::Default | UpdateKind::Character | UpdateKind::Particle => {
                self.update_default(key, txm, env);
            }
        }
    }

    fn update_default(&mut self, key: EntityKey, txm: &ModelTx, env: &mut UpdateEnv<'_>) {
        if self.needs_update() {
            let tr_no_scale =
                Mat4::from_translation(self.position) * Mat4::from_quat(self.rotation);
            self.mx = tr_no_scale * Mat4::from_scale(Vec3::splat(self.scale));

            self.aabb = self.model_aabb.transform(&self.mx);

            if let (Some(body), Some(physics)) = (self.phys_body, env.physics.as_deref_mut()) {
                physics.push_transform(body, &tr_no_scale);
            }

            if let Some(light_idx) = self.light_idx {
                env.light.set_pos(light_idx, self.position + self.light_off);
            }
        }

        // Track the biggest volume containing the camera or the character
        let contains_camera = self.aabb.contains_point(env.camera_pos);
        let contains_control = env
            .control
            .is_some_and(|(ckey, cpos)| ckey != key && self.aabb.contains_point(cpos));
        let is_control = env.control.is_some_and(|(ckey, _)| ckey == key);
        if (contains_camera || contains_control) && !is_control {
            let size = self.aabb.size();
            let volume = size.x * size.y * size.z;
            if env.bv.entity.is_none() || volume > env.bv.volume {
                env.bv.entity = Some(key);
                env.bv.volume = volume;
            }
        }

        if txm.model().is_animated() {
            self.animated_update(txm.model(), env.time, env.idle_phase);
        }
    }

    // ------------------------------------------------------------------
    // Animation playback
    // ------------------------------------------------------------------

    /// Restarts the current queue entry from `time`.
    fn start_animation(&mut self, time: f64) {
        for joint in &mut self.joints {
            joint.rewind();
        }
        self.ani_time = time;
    }

    /// Queues an animation by name. With `clear`, pending entries are
    /// dropped (firing the interrupted entry's end callback) and the new
    /// one starts immediately.
    pub fn push_animation_by_name(
        &mut self,
        model: &Model,
        name: &str,
        clear: bool,
        repeat: bool,
        time: f64,
    ) -> bool {
        if clear {
            self.aniq.clear();
        }
        let Some(id) = model.animation_by_name(name) else {
            return false;
        };
        let entry = if repeat {
            QueuedAnimation::repeating(id)
        } else {
            QueuedAnimation::new(id)
        };
        self.aniq.push(entry);
        if clear {
            self.start_animation(time);
        }
        true
    }

    /// Moves playback to the next queue entry, falling back to a looping
    /// "idle" with a randomized starting phase when the queue drains.
    fn animation_next(&mut self, model: &Model, time: f64, idle_phase: f32) {
        if let Some(current) = self.aniq.current() {
            if current.repeat {
                if let Some(qa) = self.aniq.current_mut() {
                    qa.sfx_state = 0;
                }
                self.start_animation(time);
                return;
            }
            let mut finished = self.aniq.advance().expect("current entry exists");
            finished.fire_end();
        }

        if self.aniq.is_empty() {
            let Some(idle) = model.animation_by_name("idle") else {
                return;
            };
            let end = model.animation(idle).map_or(0.0, |a| a.time_end());
            self.aniq.push(QueuedAnimation::repeating(idle));
            self.start_animation(time);
            self.ani_time = time - f64::from(end * idle_phase);
            return;
        }

        if let Some(qa) = self.aniq.current_mut() {
            qa.sfx_state = 0;
        }
        self.start_animation(time);
    }

    fn animated_update(&mut self, model: &Model, time: f64, idle_phase: f32) {
        if self.aniq.is_empty() {
            self.animation_next(model, time, idle_phase);
        }
        let Some(qa) = self.aniq.current() else {
            return;
        };
        let Some(animation) = model.animation(qa.animation) else {
            log::warn!("entity references missing animation {}", qa.animation);
            self.aniq.advance();
            return;
        };

        let speed = qa.speed;
        let frame_time = ((time - self.ani_time) * f64::from(speed)) as f32;
        let time_end = animation.time_end();

        channels_transform(&mut self.joints, animation, frame_time);
        if let Some(skin) = model.skin() {
            joint_transforms(&mut self.joints, skin, &mut self.joint_transforms);
        }

        if let Some(qa) = self.aniq.current_mut() {
            if frame_time == 0.0 {
                qa.sfx_state = 0;
            }
            if let Some(frame_cb) = qa.frame.as_mut() {
                frame_cb(frame_time / time_end, &mut qa.sfx_state);
            }
        }

        if frame_time >= time_end {
            self.animation_next(model, time, idle_phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Animation, Channel, ChannelPath};
    use crate::handle::Shared;
    use crate::renderer::backend::HeadlessBackend;
    use crate::resources::model::{ModelJoint, ModelOptions, TextureSource};
    use crate::resources::primitives;
    use crate::resources::shader::{BlockMask, ShaderProgram, ShaderProgramOptions};
    use crate::scene::mq::Mq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn test_mq(backend: &mut HeadlessBackend, animated: bool) -> (Mq, ModelTxKey) {
        let program = Shared::new(
            ShaderProgram::new(
                backend,
                &ShaderProgramOptions {
                    name: "model",
                    vert: "void main() {}",
                    frag: "void main() {}",
                    geom: None,
                    blocks: BlockMask::PROJVIEW,
                },
            )
            .unwrap(),
        );
        let mesh = primitives::cube_mesh();
        let mut model =
            Model::from_mesh(backend, "cube", program, &mesh, &ModelOptions::default()).unwrap();

        if animated {
            model
                .add_skinning(
                    vec![ModelJoint {
                        name: "root".into(),
                        children: vec![],
                        inverse_bind: Mat4::IDENTITY,
                    }],
                    0,
                    Mat4::IDENTITY,
                )
                .unwrap();
            let mut walk = Animation::new("walk");
            walk.add_channel(
                Channel::new(
                    ChannelPath::Translation,
                    0,
                    vec![0.0, 1.0],
                    vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                )
                .unwrap(),
            );
            model.add_animation(walk).unwrap();
            let mut idle = Animation::new("idle");
            idle.add_channel(
                Channel::new(
                    ChannelPath::Translation,
                    0,
                    vec![0.0, 2.0],
                    vec![0.0; 6],
                )
                .unwrap(),
            );
            model.add_animation(idle).unwrap();
        }

        let txm = ModelTx::new(backend, Shared::new(model).pass(), TextureSource::None).unwrap();
        let mut mq = Mq::new();
        let key = mq.add_model(txm);
        (mq, key)
    }

    fn update_entity(mq: &mut Mq, entity: EntityKey, time: f64) {
        let mut light = LightTable::new().unwrap();
        let mut bv = CameraBv::default();
        let (models, entities, _) = mq.split();
        let e = entities.get_mut(entity).unwrap();
        let txm = models.get(e.model()).unwrap();
        let mut env = UpdateEnv {
            time,
            camera_pos: Vec3::new(100.0, 100.0, 100.0),
            control: None,
            light: &mut light,
            physics: None,
            bv: &mut bv,
            idle_phase: 0.0,
        };
        e.update(entity, txm, &mut env);
    }

    #[test]
    fn test_transform_update_rebuilds_aabb() {
        let mut backend = HeadlessBackend::new();
        let (mut mq, model) = test_mq(&mut backend, false);
        let key = mq.spawn_entity(model);

        mq.entity_mut(key).unwrap().set_position(Vec3::new(10.0, 0.0, 0.0));
        mq.entity_mut(key).unwrap().set_scale(2.0);
        update_entity(&mut mq, key, 0.0);

        let e = mq.entity(key).unwrap();
        // World AABB equals the model box through the entity matrix
        let expected = e.model_aabb.transform(e.mx());
        assert_eq!(*e.aabb(), expected);
        assert!((e.aabb().center().x - 10.0).abs() < 1e-5);
        assert!((e.aabb().size().x - 2.0).abs() < 1e-5);
        // Dirty flag cleared
        assert!(!e.flags.contains(EntityFlags::UPDATED));
    }

    #[test]
    fn test_lod_selection_formula() {
        let mut backend = HeadlessBackend::new();
        let (mut mq, model) = test_mq(&mut backend, false);
        let key = mq.spawn_entity(model);
        update_entity(&mut mq, key, 0.0);

        let (models, entities, _) = mq.split();
        let e = entities.get_mut(key).unwrap();
        let m = models.get(model).unwrap().model();

        // Inside the box: LOD unchanged
        e.select_lod(m, Vec3::ZERO);
        assert_eq!(e.cur_lod, 0);

        // Far outside: the quotient clamps into the model's LOD range
        e.select_lod(m, Vec3::new(500.0, 0.0, 0.0));
        assert_eq!(e.cur_lod, m.nr_lods() - 1);

        // Forced LOD wins
        e.force_lod = 0;
        e.select_lod(m, Vec3::new(500.0, 0.0, 0.0));
        assert_eq!(e.cur_lod, 0);
    }

    #[test]
    fn test_animation_end_fires_once_then_idle() {
        let mut backend = HeadlessBackend::new();
        let (mut mq, model) = test_mq(&mut backend, true);
        let key = mq.spawn_entity(model);

        let fired = Rc::new(Cell::new(0u32));
        {
            let (models, entities, _) = mq.split();
            let e = entities.get_mut(key).unwrap();
            let m = models.get(model).unwrap().model();
            assert!(e.push_animation_by_name(m, "walk", true, false, 0.0));
            e.aniq.set_speed(2.0);
            let counter = fired.clone();
            e.aniq
                .set_end_callback(Box::new(move || counter.set(counter.get() + 1)));
        }

        // Duration 1.0 at speed 2.0 finishes at t = 0.5
        update_entity(&mut mq, key, 0.3);
        assert_eq!(fired.get(), 0);

        update_entity(&mut mq, key, 0.5);
        assert_eq!(fired.get(), 1);

        // Queue fell back to the looping idle
        let e = mq.entity(key).unwrap();
        let m = mq.model(model).unwrap().model();
        let current = e.aniq.current().unwrap();
        assert_eq!(Some(current.animation), m.animation_by_name("idle"));
        assert!(current.repeat);

        update_entity(&mut mq, key, 5.0);
        assert_eq!(fired.get(), 1);
    }
}
