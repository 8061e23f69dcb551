//! Asset decoding: the binary+JSON mesh container and the scene files.

pub mod gltf;
pub mod scene_json;

pub use gltf::{GltfData, GltfDocument, InstantiateOpts};
pub use scene_json::{
    load_scene_file, populate_scene, save_scene_file, SceneEntityDesc, SceneFile, SceneGeom,
    SceneLightDesc, SceneModelDesc, ScenePhysics,
};
