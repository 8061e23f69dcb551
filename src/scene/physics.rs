//! The physics bridge.
//!
//! The rigid-body/contact solver is a host collaborator; the core only
//! specifies the interface it consumes. Entities push their unscaled world
//! matrix into the simulator after a transform change and read back the
//! simulated transform plus shared ground/contact state each frame.

use glam::{Mat4, Vec3};

/// Opaque body handle issued by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyId(pub u64);

/// Collision geometry class of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeomClass {
    #[default]
    Sphere,
    Capsule,
    Trimesh,
}

/// Per-body parameters from the scene file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyParams {
    pub mass: f32,
    pub class: GeomClass,
    pub radius: f32,
    pub length: f32,
    /// Vertical offset of the geom relative to the entity origin.
    pub yoffset: f32,
    pub bounce: f32,
    pub bounce_vel: f32,
}

impl Default for BodyParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            class: GeomClass::Sphere,
            radius: 0.5,
            length: 1.0,
            yoffset: 0.0,
            bounce: 0.0,
            bounce_vel: 0.0,
        }
    }
}

/// Contact/ground state shared between the simulator and the entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyState {
    pub on_ground: bool,
    pub nr_contacts: u32,
}

/// What the core needs from the rigid-body simulator.
pub trait PhysicsBridge {
    fn add_body(&mut self, params: &BodyParams, mx: &Mat4) -> BodyId;
    fn remove_body(&mut self, body: BodyId);

    /// Entity transform changed: hand the unscaled world matrix over.
    fn push_transform(&mut self, body: BodyId, mx: &Mat4);

    /// Simulated transform to copy back into the entity, if the body moved.
    fn body_transform(&self, body: BodyId) -> Option<Mat4>;

    fn body_state(&self, body: BodyId) -> BodyState;

    /// Distance to the first hit along `dir`, within `max_dist`.
    fn ray_cast(&self, from: Vec3, dir: Vec3, max_dist: f32) -> Option<f32>;

    fn step(&mut self, dt: f32);
}
