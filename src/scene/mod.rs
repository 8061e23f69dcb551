//! Scene composition: entities, the model queue, views, lights and the
//! physics bridge.

pub mod camera;
pub mod entity;
pub mod light;
pub mod mq;
pub mod physics;
pub mod scene;
pub mod view;

pub use camera::Camera;
pub use entity::{CameraBv, ColorPassthrough, Entity, EntityFlags, UpdateEnv, UpdateKind};
pub use light::{LightGrid, LightTable, TileMask, TILE_SIZE};
pub use mq::{EntityKey, ModelTxKey, Mq};
pub use physics::{BodyId, BodyParams, BodyState, GeomClass, PhysicsBridge};
pub use scene::{Scene, SceneOptions};
pub use view::{LightFit, Subview, View, CASCADES_MAX};
