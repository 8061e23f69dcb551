//! Scene files: the thin JSON layer naming assets, physics parameters,
//! entity placements, lights and sound effects.
//!
//! Files are re-emitted with four-space indentation on save; the `name`
//! member is inserted first when missing, and a save-then-load round trip
//! is structurally identical.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::assets::gltf::{GltfData, InstantiateOpts};
use crate::errors::{GlintError, Result};
use crate::handle::Shared;
use crate::renderer::backend::RenderBackend;
use crate::resources::model::ModelOptions;
use crate::resources::shader::ShaderProgram;
use crate::scene::entity::EntityFlags;
use crate::scene::physics::{BodyParams, GeomClass};
use crate::scene::scene::Scene;

fn default_true() -> bool {
    true
}

fn default_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SceneGeom {
    Sphere,
    Capsule,
    Trimesh,
}

impl From<SceneGeom> for GeomClass {
    fn from(geom: SceneGeom) -> Self {
        match geom {
            SceneGeom::Sphere => GeomClass::Sphere,
            SceneGeom::Capsule => GeomClass::Capsule,
            SceneGeom::Trimesh => GeomClass::Trimesh,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScenePhysics {
    pub mass: f32,
    pub geom: SceneGeom,
    pub radius: f32,
    pub length: f32,
    pub yoffset: f32,
    pub bounce: f32,
    pub bounce_vel: f32,
}

impl Default for ScenePhysics {
    fn default() -> Self {
        Self {
            mass: 1.0,
            geom: SceneGeom::Sphere,
            radius: 0.5,
            length: 1.0,
            yoffset: 0.0,
            bounce: 0.0,
            bounce_vel: 0.0,
        }
    }
}

impl ScenePhysics {
    fn body_params(&self) -> BodyParams {
        BodyParams {
            mass: self.mass,
            class: self.geom.into(),
            radius: self.radius,
            length: self.length,
            yoffset: self.yoffset,
            bounce: self.bounce,
            bounce_vel: self.bounce_vel,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneEntityDesc {
    pub pos: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f32; 3]>,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_color: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_off: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_attenuation: Option<[f32; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneModelDesc {
    pub name: String,
    /// Asset container to load, by librarian name.
    pub gltf: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physics: Option<ScenePhysics>,
    #[serde(default)]
    pub terrain_clamp: bool,
    #[serde(default = "default_true")]
    pub cull_face: bool,
    #[serde(default)]
    pub alpha_blend: bool,
    #[serde(default)]
    pub can_dash: bool,
    #[serde(default)]
    pub can_jump: bool,
    #[serde(default)]
    pub outline_exclude: bool,
    #[serde(default)]
    pub fix_origin: bool,
    #[serde(default)]
    pub entity: Vec<SceneEntityDesc>,
    /// Asset animation name -> engine animation name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub animations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneLightDesc {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub attenuation: [f32; 3],
    #[serde(default)]
    pub directional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<[f32; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SceneFile {
    /// Declared first so a saved file leads with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Vec<SceneModelDesc>,
    #[serde(default)]
    pub light: Vec<SceneLightDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sfx: BTreeMap<String, String>,
}

/// Parses a scene file. A top-level parse error fails the whole load.
pub fn load_scene_file(text: &str) -> Result<SceneFile> {
    Ok(serde_json::from_str(text)?)
}

/// Serializes a scene file with four-space indentation, inserting a `name`
/// first when the caller left it unset.
pub fn save_scene_file(file: &SceneFile) -> Result<String> {
    let mut out = file.clone();
    if out.name.is_none() {
        out.name = Some("scene".to_string());
    }

    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    out.serialize(&mut serializer)?;
    String::from_utf8(bytes).map_err(|_| GlintError::InvalidFormat("scene JSON encoding"))
}

/// Instantiates a scene file into `scene`: loads each model's container via
/// `fetch` (the librarian), spawns its entities, and registers lights. A
/// failing model is logged and skipped; the rest of the scene still loads.
pub fn populate_scene(
    scene: &mut Scene,
    backend: &mut dyn RenderBackend,
    file: &SceneFile,
    program: &Shared<ShaderProgram>,
    fetch: &mut dyn FnMut(&str) -> Result<Vec<u8>>,
) -> Result<()> {
    if let Some(name) = &file.name {
        scene.name = name.clone();
    }

    for desc in &file.light {
        let idx = scene.light.alloc()?;
        scene.light.set_pos(idx, Vec3::from_array(desc.pos));
        scene.light.set_color(idx, Vec3::from_array(desc.color));
        scene
            .light
            .set_attenuation(idx, Vec3::from_array(desc.attenuation));
        scene.light.set_directional(idx, desc.directional);
        if let Some(dir) = desc.dir {
            scene.light.set_direction(idx, Vec3::from_array(dir));
        }
    }

    for desc in &file.model {
        if let Err(err) = populate_model(scene, backend, desc, program, fetch) {
            log::warn!("model '{}' failed to load: {err}", desc.name);
            continue;
        }
    }

    Ok(())
}

fn populate_model(
    scene: &mut Scene,
    backend: &mut dyn RenderBackend,
    desc: &SceneModelDesc,
    program: &Shared<ShaderProgram>,
    fetch: &mut dyn FnMut(&str) -> Result<Vec<u8>>,
) -> Result<()> {
    let bytes = fetch(&desc.gltf)?;
    let data = GltfData::parse(&bytes)?;
    if data.nr_meshes() == 0 {
        return Err(GlintError::InvalidFormat("container without meshes"));
    }

    let txm_key = data.instantiate_one_with(
        backend,
        0,
        program.clone(),
        &mut scene.mq,
        &InstantiateOpts {
            model: ModelOptions {
                cull_face: desc.cull_face,
                alpha_blend: desc.alpha_blend,
                generate_lods: true,
            },
            animation_renames: (!desc.animations.is_empty()).then_some(&desc.animations),
        },
    )?;

    for placement in &desc.entity {
        let key = scene.mq.spawn_entity(txm_key);
        let entity = scene.mq.entity_mut(key).expect("entity just spawned");
        entity.set_position(Vec3::from_array(placement.pos));
        if let Some([rx, ry, rz]) = placement.rotation {
            entity.rotate(rx, ry, rz);
        }
        entity.set_scale(placement.scale);
        entity
            .flags
            .set(EntityFlags::OUTLINE_EXCLUDE, desc.outline_exclude);

        if let Some(color) = placement.light_color {
            let idx = scene.light.alloc()?;
            scene.light.set_color(idx, Vec3::from_array(color));
            if let Some(att) = placement.light_attenuation {
                scene.light.set_attenuation(idx, Vec3::from_array(att));
            }
            let entity = scene.mq.entity_mut(key).expect("entity just spawned");
            entity.light_idx = Some(idx);
            entity.light_off = placement
                .light_off
                .map_or(Vec3::ZERO, Vec3::from_array);
        }

        if let (Some(physics), Some(bridge)) = (&desc.physics, scene.physics.as_deref_mut()) {
            let entity = scene.mq.entity_mut(key).expect("entity just spawned");
            let body = bridge.add_body(&physics.body_params(), entity.mx());
            entity.phys_body = Some(body);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> SceneFile {
        SceneFile {
            name: None,
            model: vec![SceneModelDesc {
                name: "tree".into(),
                gltf: "tree".into(),
                physics: Some(ScenePhysics {
                    geom: SceneGeom::Capsule,
                    mass: 2.5,
                    ..ScenePhysics::default()
                }),
                terrain_clamp: true,
                cull_face: true,
                alpha_blend: false,
                can_dash: false,
                can_jump: false,
                outline_exclude: true,
                fix_origin: false,
                entity: vec![SceneEntityDesc {
                    pos: [1.0, 0.0, -3.0],
                    rotation: Some([0.0, 1.5, 0.0]),
                    scale: 2.0,
                    light_color: Some([1.0, 0.9, 0.7]),
                    light_off: Some([0.0, 2.0, 0.0]),
                    light_attenuation: Some([1.0, 0.09, 0.032]),
                }],
                animations: BTreeMap::from([("Armature|walk".to_string(), "walk".to_string())]),
            }],
            light: vec![SceneLightDesc {
                pos: [0.0, 50.0, 0.0],
                color: [1.0, 1.0, 1.0],
                attenuation: [1.0, 0.0, 0.0],
                directional: true,
                dir: Some([-0.3, -1.0, -0.2]),
            }],
            sfx: BTreeMap::from([("footsteps".to_string(), "steps.ogg".to_string())]),
        }
    }

    #[test]
    fn test_save_then_load_is_structurally_identical() {
        let file = sample_file();
        let text = save_scene_file(&file).unwrap();
        let loaded = load_scene_file(&text).unwrap();

        // `name` was defaulted in; everything else matches exactly
        assert_eq!(loaded.name.as_deref(), Some("scene"));
        assert_eq!(loaded.model, file.model);
        assert_eq!(loaded.light, file.light);
        assert_eq!(loaded.sfx, file.sfx);

        // And a second round trip is exact
        let again = save_scene_file(&loaded).unwrap();
        assert_eq!(text, again);
    }

    #[test]
    fn test_save_uses_four_space_indent_and_leads_with_name() {
        let text = save_scene_file(&sample_file()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("{"));
        assert!(lines.next().unwrap().starts_with("    \"name\""));
        assert!(text.contains("\"name\": \"tree\""));
    }

    #[test]
    fn test_top_level_parse_error_fails_load() {
        assert!(load_scene_file("{ not json").is_err());
    }

    #[test]
    fn test_defaults_apply_on_load() {
        let loaded = load_scene_file(
            r#"{ "model": [ { "name": "rock", "gltf": "rock" } ] }"#,
        )
        .unwrap();
        let model = &loaded.model[0];
        assert!(model.cull_face);
        assert!(!model.alpha_blend);
        assert!(model.entity.is_empty());
        assert!(model.physics.is_none());
    }
}
