//! The binary+JSON mesh/material/animation container.
//!
//! A container is either the binary form (12-byte header, a JSON chunk, a
//! binary chunk) or standalone JSON with base64-embedded buffers. Parsing is
//! strict about the envelope (magic, version, lengths, chunk order) and
//! lenient about entries: a buffer that fails to decode becomes a hole that
//! preserves index stability, an image with an unsupported mime type gets a
//! placeholder, an animation channel pointing at a missing joint is skipped.

use std::collections::HashMap;

use base64::Engine as _;
use glam::{Mat4, Quat, Vec3};
use serde::Deserialize;

use crate::animation::{Animation, Channel, ChannelPath};
use crate::errors::{GlintError, Result};
use crate::handle::Shared;
use crate::renderer::backend::RenderBackend;
use crate::resources::material::MaterialParams;
use crate::resources::mesh::Mesh;
use crate::resources::model::{
    Model, ModelJoint, ModelOptions, ModelTx, TexRef, TextureSlot, TextureSource,
};
use crate::resources::shader::{ShaderProgram, VertexAttr};
use crate::resources::texture::Texture;
use crate::scene::mq::{ModelTxKey, Mq};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;
const GLB_CHUNK_BIN: u32 = 0x004E_4942;
const DATA_URI: &str = "data:application/octet-stream;base64,";

// ----------------------------------------------------------------------
// Document structure
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GltfDocument {
    pub scenes: Vec<GltfScene>,
    pub scene: usize,
    pub nodes: Vec<GltfNode>,
    pub materials: Vec<GltfMaterial>,
    pub meshes: Vec<GltfMesh>,
    pub textures: Vec<GltfTexture>,
    pub images: Vec<GltfImage>,
    pub accessors: Vec<GltfAccessor>,
    #[serde(rename = "bufferViews")]
    pub buffer_views: Vec<GltfBufferView>,
    pub buffers: Vec<GltfBuffer>,
    #[serde(default)]
    pub animations: Vec<GltfAnimation>,
    #[serde(default)]
    pub skins: Vec<GltfSkin>,
}

#[derive(Debug, Deserialize)]
pub struct GltfScene {
    #[serde(default)]
    pub nodes: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GltfNode {
    pub name: String,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    #[serde(default)]
    pub children: Vec<usize>,
    pub rotation: Option<[f32; 4]>,
    pub translation: Option<[f32; 3]>,
    pub scale: Option<[f32; 3]>,
}

impl GltfNode {
    /// Local TRS matrix of the node.
    #[must_use]
    pub fn local_matrix(&self) -> Mat4 {
        let t = self.translation.map_or(Vec3::ZERO, Vec3::from_array);
        let r = self
            .rotation
            .map_or(Quat::IDENTITY, Quat::from_array);
        let s = self.scale.map_or(Vec3::ONE, Vec3::from_array);
        Mat4::from_scale_rotation_translation(s, r, t)
    }
}

#[derive(Debug, Deserialize)]
pub struct GltfBuffer {
    pub uri: Option<String>,
    #[serde(rename = "byteLength")]
    pub byte_length: usize,
}

#[derive(Debug, Deserialize)]
pub struct GltfBufferView {
    pub buffer: usize,
    #[serde(rename = "byteOffset", default)]
    pub byte_offset: usize,
    #[serde(rename = "byteLength")]
    pub byte_length: usize,
}

#[derive(Debug, Deserialize)]
pub struct GltfAccessor {
    #[serde(rename = "bufferView")]
    pub buffer_view: usize,
    #[serde(rename = "byteOffset", default)]
    pub byte_offset: usize,
    #[serde(rename = "componentType")]
    pub component_type: u32,
    pub count: usize,
    #[serde(rename = "type")]
    pub element_type: String,
}

#[derive(Debug, Deserialize)]
pub struct GltfImage {
    #[serde(rename = "bufferView")]
    pub buffer_view: Option<usize>,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GltfTexture {
    pub source: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GltfTextureRef {
    pub index: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfPbr {
    pub base_color_texture: Option<GltfTextureRef>,
    pub metallic_factor: Option<f32>,
    pub roughness_factor: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct GltfMaterial {
    pub name: Option<String>,
    #[serde(rename = "pbrMetallicRoughness", default)]
    pub pbr: GltfPbr,
    #[serde(rename = "emissiveTexture")]
    pub emissive_texture: Option<GltfTextureRef>,
    #[serde(rename = "normalTexture")]
    pub normal_texture: Option<GltfTextureRef>,
}

#[derive(Debug, Deserialize)]
pub struct GltfPrimitive {
    pub indices: usize,
    pub material: Option<usize>,
    pub attributes: HashMap<String, usize>,
}

#[derive(Debug, Deserialize)]
pub struct GltfMesh {
    pub name: Option<String>,
    pub primitives: Vec<GltfPrimitive>,
}

#[derive(Debug, Deserialize)]
pub struct GltfSkin {
    pub name: Option<String>,
    #[serde(rename = "inverseBindMatrices")]
    pub inverse_bind_matrices: Option<usize>,
    pub joints: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GltfChannelTarget {
    pub node: Option<usize>,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct GltfChannel {
    pub sampler: usize,
    pub target: GltfChannelTarget,
}

fn default_interpolation() -> String {
    "LINEAR".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GltfAnimSampler {
    pub input: usize,
    pub output: usize,
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
}

#[derive(Debug, Deserialize)]
pub struct GltfAnimation {
    pub name: Option<String>,
    pub channels: Vec<GltfChannel>,
    pub samplers: Vec<GltfAnimSampler>,
}

// ----------------------------------------------------------------------
// Container parsing
// ----------------------------------------------------------------------

/// Options for [`GltfData::instantiate_one_with`].
#[derive(Default)]
pub struct InstantiateOpts<'a> {
    pub model: ModelOptions,
    /// Asset animation name -> engine animation name.
    pub animation_renames: Option<&'a std::collections::BTreeMap<String, String>>,
}

/// A parsed container: document plus resolved buffers. Buffers that could
/// not be decoded are `None` holes, keeping later indices valid.
pub struct GltfData {
    pub doc: GltfDocument,
    buffers: Vec<Option<Vec<u8>>>,
}

fn le_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let end = offset + 4;
    if end > bytes.len() {
        return Err(GlintError::BufferOverrun("container header"));
    }
    Ok(u32::from_le_bytes(bytes[offset..end].try_into().unwrap()))
}

impl GltfData {
    /// Parses either form of the container; the binary envelope is detected
    /// by its magic and fails fast when malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= 4 && le_u32(bytes, 0)? == GLB_MAGIC {
            Self::parse_binary(bytes)
        } else {
            Self::parse_standalone(bytes)
        }
    }

    fn parse_binary(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(GlintError::ParseFailed("truncated container header".into()));
        }
        let version = le_u32(bytes, 4)?;
        let length = le_u32(bytes, 8)? as usize;
        if version < 2 {
            return Err(GlintError::ParseFailed(format!(
                "unsupported container version {version}"
            )));
        }
        if length != bytes.len() {
            return Err(GlintError::ParseFailed("container length mismatch".into()));
        }

        let json_len = le_u32(bytes, 12)? as usize;
        let json_type = le_u32(bytes, 16)?;
        if json_type != GLB_CHUNK_JSON {
            return Err(GlintError::ParseFailed("first chunk is not JSON".into()));
        }
        let json_end = 20 + json_len;
        if json_end > bytes.len() {
            return Err(GlintError::ParseFailed("JSON chunk overruns file".into()));
        }

        let doc: GltfDocument = serde_json::from_slice(&bytes[20..json_end])?;

        let bin = if json_end == bytes.len() {
            // No binary chunk: acceptable only with fully embedded buffers
            None
        } else {
            let bin_len = le_u32(bytes, json_end)? as usize;
            let bin_type = le_u32(bytes, json_end + 4)?;
            if bin_type != GLB_CHUNK_BIN {
                return Err(GlintError::ParseFailed("second chunk is not BIN".into()));
            }
            if 12 + 8 + json_len + 8 + bin_len != bytes.len() {
                return Err(GlintError::ParseFailed("chunk sizes do not sum up".into()));
            }
            Some(bytes[json_end + 8..json_end + 8 + bin_len].to_vec())
        };

        let mut data = Self {
            doc,
            buffers: Vec::new(),
        };
        data.resolve_buffers(bin)?;
        Ok(data)
    }

    fn parse_standalone(bytes: &[u8]) -> Result<Self> {
        let doc: GltfDocument = serde_json::from_slice(bytes)?;
        let mut data = Self {
            doc,
            buffers: Vec::new(),
        };
        data.resolve_buffers(None)?;
        Ok(data)
    }

    /// Slots every buffer: the binary chunk backs the first uri-less
    /// buffer, data URIs are decoded, anything else becomes a hole.
    fn resolve_buffers(&mut self, mut bin: Option<Vec<u8>>) -> Result<()> {
        for (idx, buffer) in self.doc.buffers.iter().enumerate() {
            let resolved = match &buffer.uri {
                None => bin.take(),
                Some(uri) if uri.starts_with(DATA_URI) => {
                    match base64::engine::general_purpose::STANDARD
                        .decode(&uri[DATA_URI.len()..])
                    {
                        Ok(decoded) => Some(decoded),
                        Err(err) => {
                            log::warn!("buffer {idx}: base64 decode failed: {err}");
                            None
                        }
                    }
                }
                Some(_) => {
                    log::warn!("buffer {idx}: external URIs are not supported");
                    None
                }
            };

            if let Some(data) = &resolved {
                if data.len() < buffer.byte_length {
                    return Err(GlintError::BufferIncomplete("buffer shorter than declared"));
                }
            }
            self.buffers.push(resolved);
        }

        if self.buffers.iter().all(Option::is_none) && !self.doc.buffers.is_empty() {
            return Err(GlintError::ParseFailed("no usable buffers".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn nr_meshes(&self) -> usize {
        self.doc.meshes.len()
    }

    fn view_bytes(&self, view_idx: usize) -> Result<&[u8]> {
        let view = self
            .doc
            .buffer_views
            .get(view_idx)
            .ok_or_else(|| GlintError::NotFound("bufferView".into()))?;
        let buffer = self
            .buffers
            .get(view.buffer)
            .and_then(Option::as_ref)
            .ok_or(GlintError::BufferIncomplete("bufferView into missing buffer"))?;
        let end = view.byte_offset + view.byte_length;
        if end > buffer.len() {
            return Err(GlintError::BufferOverrun("bufferView out of range"));
        }
        Ok(&buffer[view.byte_offset..end])
    }

    fn component_size(component_type: u32) -> Result<usize> {
        // GL component type codes
        match component_type {
            0x1400 | 0x1401 => Ok(1),
            0x1402 | 0x1403 => Ok(2),
            0x1404 | 0x1405 | 0x1406 => Ok(4),
            _ => Err(GlintError::InvalidFormat("accessor component type")),
        }
    }

    fn element_components(element_type: &str) -> Result<usize> {
        match element_type {
            "SCALAR" => Ok(1),
            "VEC2" => Ok(2),
            "VEC3" => Ok(3),
            "VEC4" | "MAT2" => Ok(4),
            "MAT3" => Ok(9),
            "MAT4" => Ok(16),
            _ => Err(GlintError::InvalidFormat("accessor element type")),
        }
    }

    /// Raw bytes of an accessor, bounds-checked against its view.
    pub fn accessor_bytes(&self, accessor_idx: usize) -> Result<(&[u8], &GltfAccessor)> {
        let accessor = self
            .doc
            .accessors
            .get(accessor_idx)
            .ok_or_else(|| GlintError::NotFound("accessor".into()))?;
        let view = self.view_bytes(accessor.buffer_view)?;
        let elem = Self::component_size(accessor.component_type)?
            * Self::element_components(&accessor.element_type)?;
        let end = accessor.byte_offset + elem * accessor.count;
        if end > view.len() {
            return Err(GlintError::BufferOverrun("accessor out of range"));
        }
        Ok((&view[accessor.byte_offset..end], accessor))
    }

    /// Accessor data as floats; the accessor must be float-typed.
    pub fn accessor_f32(&self, accessor_idx: usize) -> Result<Vec<f32>> {
        let (bytes, accessor) = self.accessor_bytes(accessor_idx)?;
        if accessor.component_type != 0x1406 {
            return Err(GlintError::InvalidFormat("accessor is not float"));
        }
        let mut out = vec![0.0f32; bytes.len() / 4];
        out.copy_from_slice(bytemuck::cast_slice(bytes));
        Ok(out)
    }

    /// Index accessor widened/narrowed to 16 bits; indices above 65535 make
    /// the mesh unusable with 16-bit index buffers.
    pub fn accessor_indices(&self, accessor_idx: usize) -> Result<Vec<u16>> {
        let (bytes, accessor) = self.accessor_bytes(accessor_idx)?;
        match accessor.component_type {
            0x1401 => Ok(bytes.iter().map(|&b| u16::from(b)).collect()),
            0x1403 => {
                let mut out = vec![0u16; bytes.len() / 2];
                out.copy_from_slice(bytemuck::cast_slice(bytes));
                Ok(out)
            }
            0x1405 => {
                let wide: &[u32] = bytemuck::cast_slice(bytes);
                wide.iter()
                    .map(|&i| {
                        u16::try_from(i)
                            .map_err(|_| GlintError::TooLarge("index exceeds 16 bits"))
                    })
                    .collect()
            }
            _ => Err(GlintError::InvalidFormat("index component type")),
        }
    }

    /// PNG bytes of an image, or `None` for unsupported mime types (the
    /// caller substitutes a placeholder).
    pub fn image_png(&self, image_idx: usize) -> Result<Option<&[u8]>> {
        let image = self
            .doc
            .images
            .get(image_idx)
            .ok_or_else(|| GlintError::NotFound("image".into()))?;
        if image.mime_type.as_deref() != Some("image/png") {
            log::warn!("image {image_idx}: unsupported mime type, using placeholder");
            return Ok(None);
        }
        let Some(view) = image.buffer_view else {
            return Ok(None);
        };
        Ok(Some(self.view_bytes(view)?))
    }

    fn texture_png(&self, texture_idx: usize) -> Result<Option<&[u8]>> {
        let texture = self
            .doc
            .textures
            .get(texture_idx)
            .ok_or_else(|| GlintError::NotFound("texture".into()))?;
        match texture.source {
            Some(image) => self.image_png(image),
            None => Ok(None),
        }
    }

    /// The node carrying `mesh_idx`, if any.
    fn node_of_mesh(&self, mesh_idx: usize) -> Option<(usize, &GltfNode)> {
        self.doc
            .nodes
            .iter()
            .enumerate()
            .find(|(_, node)| node.mesh == Some(mesh_idx))
    }

    /// node index -> joint index map of a skin.
    fn node_to_joint(&self, skin: &GltfSkin) -> HashMap<usize, usize> {
        skin.joints
            .iter()
            .enumerate()
            .map(|(joint, &node)| (node, joint))
            .collect()
    }

    fn load_skin(&self, model: &mut Model, skin_idx: usize, root_pose: Mat4) -> Result<()> {
        let skin = self
            .doc
            .skins
            .get(skin_idx)
            .ok_or_else(|| GlintError::NotFound("skin".into()))?;
        let node_to_joint = self.node_to_joint(skin);

        let inverse_binds: Vec<Mat4> = match skin.inverse_bind_matrices {
            Some(accessor) => {
                let floats = self.accessor_f32(accessor)?;
                floats
                    .chunks_exact(16)
                    .map(|chunk| Mat4::from_cols_array(chunk.try_into().unwrap()))
                    .collect()
            }
            None => vec![Mat4::IDENTITY; skin.joints.len()],
        };
        if inverse_binds.len() < skin.joints.len() {
            return Err(GlintError::BufferIncomplete("inverse bind matrices"));
        }

        let mut joints = Vec::with_capacity(skin.joints.len());
        for (joint_idx, &node_idx) in skin.joints.iter().enumerate() {
            let node = self
                .doc
                .nodes
                .get(node_idx)
                .ok_or_else(|| GlintError::NotFound("joint node".into()))?;
            let children = node
                .children
                .iter()
                .filter_map(|child| node_to_joint.get(child).copied())
                .collect();
            joints.push(ModelJoint {
                name: node.name.clone(),
                children,
                inverse_bind: inverse_binds[joint_idx],
            });
        }

        model.add_skinning(joints, 0, root_pose)
    }

    fn load_animations(&self, model: &mut Model, node_to_joint: &HashMap<usize, usize>) {
        for (anim_idx, animation) in self.doc.animations.iter().enumerate() {
            let name = animation
                .name
                .clone()
                .unwrap_or_else(|| format!("animation{anim_idx}"));
            let mut out = Animation::new(&name);

            for channel in &animation.channels {
                let path = match channel.target.path.as_str() {
                    "translation" => ChannelPath::Translation,
                    "rotation" => ChannelPath::Rotation,
                    "scale" => ChannelPath::Scale,
                    other => {
                        log::debug!("animation '{name}': path '{other}' not supported");
                        continue;
                    }
                };
                let Some(node) = channel.target.node else {
                    continue;
                };
                let Some(&joint) = node_to_joint.get(&node) else {
                    log::warn!("animation '{name}': channel targets a node without a joint");
                    continue;
                };
                let Some(sampler) = animation.samplers.get(channel.sampler) else {
                    continue;
                };

                let (times, data) = match (
                    self.accessor_f32(sampler.input),
                    self.accessor_f32(sampler.output),
                ) {
                    (Ok(times), Ok(data)) => (times, data),
                    _ => {
                        log::warn!("animation '{name}': unreadable sampler data");
                        continue;
                    }
                };
                match Channel::new(path, joint, times, data) {
                    Ok(channel) => out.add_channel(channel),
                    Err(err) => log::warn!("animation '{name}': {err}"),
                }
            }

            model.add_animation(out);
        }
    }

    /// Builds mesh `mesh_idx` into a Model + ModelTx and appends it to the
    /// model queue.
    pub fn instantiate_one(
        &self,
        backend: &mut dyn RenderBackend,
        mesh_idx: usize,
        program: Shared<ShaderProgram>,
        mq: &mut Mq,
    ) -> Result<ModelTxKey> {
        self.instantiate_one_with(backend, mesh_idx, program, mq, &InstantiateOpts::default())
    }

    /// [`Self::instantiate_one`] with model options and animation renames
    /// from a scene file.
    pub fn instantiate_one_with(
        &self,
        backend: &mut dyn RenderBackend,
        mesh_idx: usize,
        program: Shared<ShaderProgram>,
        mq: &mut Mq,
        opts: &InstantiateOpts<'_>,
    ) -> Result<ModelTxKey> {
        let gltf_mesh = self
            .doc
            .meshes
            .get(mesh_idx)
            .ok_or(GlintError::InvalidArguments("mesh index"))?;
        let primitive = gltf_mesh
            .primitives
            .first()
            .ok_or(GlintError::InvalidFormat("mesh without primitives"))?;

        let name = gltf_mesh
            .name
            .clone()
            .unwrap_or_else(|| format!("mesh{mesh_idx}"));
        let mut mesh = Mesh::new(&name);

        // Attribute id -> engine attribute; dispatch by table lookup
        const ATTR_TABLE: [(&str, VertexAttr, usize); 6] = [
            ("POSITION", VertexAttr::Position, 12),
            ("NORMAL", VertexAttr::Normal, 12),
            ("TEXCOORD_0", VertexAttr::TexCoord, 8),
            ("TANGENT", VertexAttr::Tangent, 16),
            ("JOINTS_0", VertexAttr::Joints, 4),
            ("WEIGHTS_0", VertexAttr::Weights, 16),
        ];

        for (attr_name, attr, stride) in ATTR_TABLE {
            let Some(&accessor_idx) = primitive.attributes.get(attr_name) else {
                if attr == VertexAttr::Position {
                    return Err(GlintError::InvalidFormat("primitive without POSITION"));
                }
                continue;
            };
            if attr == VertexAttr::Joints {
                // Stored as u8x4; 16-bit joint indices are narrowed
                let (bytes, accessor) = self.accessor_bytes(accessor_idx)?;
                let narrowed: Vec<u8> = match accessor.component_type {
                    0x1401 => bytes.to_vec(),
                    0x1403 => bytemuck::cast_slice::<u8, u16>(bytes)
                        .iter()
                        .map(|&j| j.min(255) as u8)
                        .collect(),
                    _ => return Err(GlintError::InvalidFormat("joint component type")),
                };
                mesh.attr_dup(attr, &narrowed, stride, accessor.count)?;
            } else {
                let (bytes, accessor) = self.accessor_bytes(accessor_idx)?;
                mesh.attr_dup(attr, bytes, stride, accessor.count)?;
            }
        }

        mesh.set_indices(self.accessor_indices(primitive.indices)?);
        mesh.validate()?;
        mesh.optimize();

        let node = self.node_of_mesh(mesh_idx);
        let root_pose = node.map_or(Mat4::IDENTITY, |(_, n)| n.local_matrix());

        let mut model = Model::from_mesh(backend, &name, program, &mesh, &opts.model)?;

        // Skinning comes from the node wearing this mesh
        let skin_idx = node.and_then(|(_, n)| n.skin);
        let mut node_to_joint = HashMap::new();
        if let Some(skin_idx) = skin_idx {
            if mesh.has_attr(VertexAttr::Joints) && mesh.has_attr(VertexAttr::Weights) {
                self.load_skin(&mut model, skin_idx, root_pose)?;
                if let Some(skin) = self.doc.skins.get(skin_idx) {
                    node_to_joint = self.node_to_joint(skin);
                }
            }
        }
        if !node_to_joint.is_empty() {
            self.load_animations(&mut model, &node_to_joint);
        }
        if let Some(renames) = opts.animation_renames {
            for (from, to) in renames {
                if !model.rename_animation(from, to) {
                    log::warn!("'{name}': no animation '{from}' to rename");
                }
            }
        }

        // Material: base color, emission and normal textures, the factors
        let material_idx = primitive.material;
        let source = match material_idx
            .and_then(|m| self.doc.materials.get(m))
            .and_then(|m| m.pbr.base_color_texture)
        {
            Some(tex_ref) => match self.texture_png(tex_ref.index)? {
                Some(png) => TextureSource::Png(png),
                None => TextureSource::None,
            },
            None => TextureSource::None,
        };

        let mut txm = ModelTx::new(backend, Shared::new(model).pass(), source)?;

        if let Some(material) = material_idx.and_then(|m| self.doc.materials.get(m)) {
            txm.material = MaterialParams {
                metallic: material.pbr.metallic_factor.unwrap_or(0.0),
                roughness: material.pbr.roughness_factor.unwrap_or(0.65),
                ..MaterialParams::default()
            };
            for (slot, tex_ref) in [
                (TextureSlot::Emission, material.emissive_texture),
                (TextureSlot::Normal, material.normal_texture),
            ] {
                let Some(tex_ref) = tex_ref else { continue };
                match self.texture_png(tex_ref.index)? {
                    Some(png) => match Texture::from_png(backend, png) {
                        Ok(tex) => txm.set_texture(slot, TexRef::Owned(tex)),
                        Err(err) => log::warn!("'{name}': texture decode failed: {err}"),
                    },
                    None => {}
                }
            }
        }

        Ok(mq.add_model(txm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::resources::shader::{BlockMask, ShaderProgramOptions};

    /// Minimal JSON document with one triangle mesh backed by the BIN chunk.
    fn minimal_json(buffer_len: usize, embed: bool) -> String {
        let buffer = if embed {
            let bytes = vec![0u8; buffer_len];
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            format!(r#"{{"byteLength":{buffer_len},"uri":"{DATA_URI}{encoded}"}}"#)
        } else {
            format!(r#"{{"byteLength":{buffer_len}}}"#)
        };
        format!(
            r#"{{
  "scenes":[{{"nodes":[0]}}],"scene":0,
  "nodes":[{{"name":"tri","mesh":0}}],
  "materials":[{{"pbrMetallicRoughness":{{}}}}],
  "meshes":[{{"name":"tri","primitives":[{{"indices":1,"material":0,"attributes":{{"POSITION":0}}}}]}}],
  "textures":[],"images":[],
  "accessors":[
    {{"bufferView":0,"componentType":5126,"count":3,"type":"VEC3"}},
    {{"bufferView":1,"componentType":5123,"count":3,"type":"SCALAR"}}
  ],
  "bufferViews":[
    {{"buffer":0,"byteOffset":0,"byteLength":36}},
    {{"buffer":0,"byteOffset":36,"byteLength":6}}
  ],
  "buffers":[{buffer}]
}}"#
        )
    }

    fn glb_bytes(json: &str, bin: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // length patched below
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(json.as_bytes());
        if let Some(bin) = bin {
            out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
            out.extend_from_slice(&GLB_CHUNK_BIN.to_le_bytes());
            out.extend_from_slice(bin);
        }
        let total = out.len() as u32;
        out[8..12].copy_from_slice(&total.to_le_bytes());
        out
    }

    fn triangle_bin() -> Vec<u8> {
        let mut bin = Vec::new();
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        bin.extend_from_slice(bytemuck::cast_slice(&positions));
        let indices: [u16; 3] = [0, 1, 2];
        bin.extend_from_slice(bytemuck::cast_slice(&indices));
        bin
    }

    #[test]
    fn test_glb_round_trip_to_modeltx() {
        let bin = triangle_bin();
        let glb = glb_bytes(&minimal_json(bin.len(), false), Some(&bin));
        let data = GltfData::parse(&glb).unwrap();
        assert_eq!(data.nr_meshes(), 1);

        let mut backend = HeadlessBackend::new();
        let program = Shared::new(
            ShaderProgram::new(
                &mut backend,
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
        let mut mq = Mq::new();
        let key = data
            .instantiate_one(&mut backend, 0, program, &mut mq)
            .unwrap();

        let txm = mq.model(key).unwrap();
        assert_eq!(txm.name(), "tri");
        // No texture in the asset: the placeholder white pixel is bound
        let base = txm.texture(TextureSlot::BaseColor).unwrap();
        assert!(base.is_loaded());
        assert_eq!((base.width(), base.height()), (1, 1));
        mq.release(&mut backend);
    }

    #[test]
    fn test_bad_magic_and_lengths_are_rejected() {
        let bin = triangle_bin();
        let mut glb = glb_bytes(&minimal_json(bin.len(), false), Some(&bin));

        // Wrong total length
        let mut truncated = glb.clone();
        truncated[8] ^= 1;
        assert!(GltfData::parse(&truncated).is_err());

        // Wrong JSON chunk tag
        let mut bad_tag = glb.clone();
        bad_tag[16] ^= 0xff;
        assert!(matches!(
            GltfData::parse(&bad_tag),
            Err(GlintError::ParseFailed(_))
        ));

        // Version below 2
        glb[4] = 1;
        assert!(GltfData::parse(&glb).is_err());
    }

    #[test]
    fn test_embedded_buffers_allow_missing_bin_chunk() {
        let bin = triangle_bin();
        let glb = glb_bytes(&minimal_json(bin.len(), true), None);
        let data = GltfData::parse(&glb).unwrap();
        assert_eq!(data.nr_meshes(), 1);
        assert!(data.accessor_indices(1).is_ok());
    }

    #[test]
    fn test_standalone_json_with_data_uri() {
        let bin = triangle_bin();
        let json = minimal_json(bin.len(), true);
        // Patch the real payload into the data URI
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bin);
        let zeros = base64::engine::general_purpose::STANDARD.encode(vec![0u8; bin.len()]);
        let json = json.replace(&zeros, &encoded);

        let data = GltfData::parse(json.as_bytes()).unwrap();
        let indices = data.accessor_indices(1).unwrap();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_required_array_fails() {
        // No "buffers" member
        let json = br#"{"scenes":[],"scene":0,"nodes":[],"materials":[],"meshes":[],
                        "textures":[],"images":[],"accessors":[],"bufferViews":[]}"#;
        assert!(matches!(
            GltfData::parse(json),
            Err(GlintError::ParseFailed(_))
        ));
    }
}
