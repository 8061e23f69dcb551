#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]

pub mod animation;
pub mod assets;
pub mod context;
pub mod errors;
pub mod handle;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use animation::{Animation, AnimationQueue, Channel, ChannelPath, QueuedAnimation};
pub use assets::{load_scene_file, populate_scene, save_scene_file, GltfData, SceneFile};
pub use context::{EngineContext, LaunchOptions, Settings};
pub use errors::{GlintError, Result};
pub use handle::{InstanceRegistry, Passed, Shared};
pub use renderer::{
    build_default_pipeline, HeadlessBackend, Pipeline, RenderBackend, RenderOptions, RenderStats,
};
pub use resources::{
    Aabb, Framebuffer, MaterialParams, Mesh, Model, ModelTx, ProgramLibrary, ShaderProgram,
    Texture, UniformStore,
};
pub use scene::{Camera, Entity, LightTable, Mq, PhysicsBridge, Scene, View};
