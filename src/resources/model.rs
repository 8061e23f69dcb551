//! Models and textured models.
//!
//! A [`Model`] pairs mesh geometry (one interleaved vertex buffer plus up to
//! [`LOD_MAX`] index buffers) with a shader program, optional skinning
//! metadata and the model-level animation array. A [`ModelTx`] instances a
//! model with up to six texture slots, material parameters and the list of
//! live entities drawn with it. A `ModelTx` consumes its model reference at
//! construction and never outlives it.

use glam::Mat4;
use smallvec::SmallVec;

use crate::animation::Animation;
use crate::errors::{GlintError, Result};
use crate::handle::{Passed, Shared};
use crate::renderer::backend::RenderBackend;
use crate::resources::buffer::{Buffer, BufferOptions, BufferRole, BufferUsage};
use crate::resources::material::MaterialParams;
use crate::resources::mesh::{Aabb, Mesh};
use crate::resources::shader::{SamplerVar, ShaderProgram, VertexAttr};
use crate::resources::texture::Texture;
use crate::resources::uniforms::JOINTS_MAX;
use crate::scene::mq::EntityKey;

/// Maximum number of LOD index buffers per model.
pub const LOD_MAX: usize = 4;

/// One joint of a model's skeleton.
#[derive(Debug, Clone)]
pub struct ModelJoint {
    pub name: String,
    pub children: Vec<usize>,
    pub inverse_bind: Mat4,
}

/// Skinning metadata shared by all entities of a model.
#[derive(Debug, Clone)]
pub struct Skin {
    pub joints: Vec<ModelJoint>,
    pub root_joint: usize,
    /// Parent transform applied above the root joint.
    pub root_pose: Mat4,
}

#[derive(Debug)]
struct IndexLod {
    buffer: Buffer,
    nr_idx: u32,
    error: f32,
}

/// Options for [`Model::from_mesh`].
#[derive(Debug, Clone, Copy)]
pub struct ModelOptions {
    pub cull_face: bool,
    pub alpha_blend: bool,
    pub generate_lods: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            cull_face: true,
            alpha_blend: false,
            generate_lods: true,
        }
    }
}

pub struct Model {
    name: String,
    program: Shared<ShaderProgram>,
    vertices: Buffer,
    views: Vec<(VertexAttr, Buffer)>,
    index: SmallVec<[IndexLod; LOD_MAX]>,
    nr_vertices: u32,
    aabb: Aabb,
    pub cull_face: bool,
    pub alpha_blend: bool,
    skin: Option<Skin>,
    animations: Vec<Animation>,
    lod_min: usize,
    lod_max: usize,
}

impl Model {
    /// Builds GPU buffers from a validated mesh: one interleaved vertex
    /// buffer with per-attribute views, the level-0 index buffer, and any
    /// LODs the mesh yields.
    pub fn from_mesh(
        backend: &mut dyn RenderBackend,
        name: &str,
        program: impl Into<Passed<ShaderProgram>>,
        mesh: &Mesh,
        opts: &ModelOptions,
    ) -> Result<Self> {
        let program = program.into();
        mesh.validate()?;
        if mesh.nr_idx() == 0 {
            return Err(GlintError::InvalidArguments("mesh without indices"));
        }

        let attrs: Vec<VertexAttr> = VertexAttr::ALL
            .into_iter()
            .filter(|&attr| mesh.has_attr(attr))
            .collect();
        let flat = mesh.flatten(&attrs)?;

        let mut model = Self {
            name: name.to_string(),
            program: program.take(),
            vertices: Buffer::init(
                backend,
                &BufferOptions {
                    role: BufferRole::Array,
                    usage: BufferUsage::Static,
                    data: Some(&flat.data),
                    stride: flat.stride as u64,
                    ..BufferOptions::default()
                },
            )?,
            views: Vec::with_capacity(attrs.len()),
            index: SmallVec::new(),
            nr_vertices: mesh.nr_vx() as u32,
            aabb: mesh.aabb(),
            cull_face: opts.cull_face,
            alpha_blend: opts.alpha_blend,
            skin: None,
            animations: Vec::new(),
            lod_min: 0,
            lod_max: 0,
        };

        let result = model.init_buffers(backend, mesh, &attrs, &flat.offsets, flat.stride, opts);
        if let Err(err) = result {
            model.deinit(backend);
            return Err(err);
        }
        Ok(model)
    }

    fn init_buffers(
        &mut self,
        backend: &mut dyn RenderBackend,
        mesh: &Mesh,
        attrs: &[VertexAttr],
        offsets: &[usize],
        stride: usize,
        opts: &ModelOptions,
    ) -> Result<()> {
        for (k, &attr) in attrs.iter().enumerate() {
            let view = Buffer::init(
                backend,
                &BufferOptions {
                    role: BufferRole::Array,
                    usage: BufferUsage::Static,
                    format: attr.format(),
                    offset: offsets[k] as u64,
                    stride: stride as u64,
                    main: Some(&self.vertices),
                    ..BufferOptions::default()
                },
            )?;
            self.views.push((attr, view));
        }

        self.add_index_lod(backend, mesh.indices(), 0.0)?;
        if opts.generate_lods {
            self.lods_from_mesh(backend, mesh);
        }
        self.lod_max = self.index.len() - 1;
        Ok(())
    }

    fn add_index_lod(
        &mut self,
        backend: &mut dyn RenderBackend,
        idx: &[u16],
        error: f32,
    ) -> Result<()> {
        let buffer = Buffer::init(
            backend,
            &BufferOptions {
                role: BufferRole::ElementArray,
                usage: BufferUsage::Static,
                data: Some(bytemuck::cast_slice(idx)),
                ..BufferOptions::default()
            },
        )?;
        self.index.push(IndexLod {
            buffer,
            nr_idx: idx.len() as u32,
            error,
        });
        Ok(())
    }

    /// Generates reduced index buffers. A level is kept only when it is
    /// strictly smaller than the previous one with a positive error metric.
    fn lods_from_mesh(&mut self, backend: &mut dyn RenderBackend, mesh: &Mesh) {
        let mut prev_nr_idx = mesh.nr_idx();

        for level in 0..(LOD_MAX as u32 - 1) {
            let reduced = match mesh.idx_to_lod(level) {
                Ok(Some(reduced)) => reduced,
                Ok(None) => continue,
                Err(err) => {
                    log::debug!("'{}': LOD generation stopped: {err}", self.name);
                    break;
                }
            };
            let (idx, error) = reduced;
            if idx.len() >= prev_nr_idx || error <= 0.0 {
                continue;
            }
            if let Err(err) = self.add_index_lod(backend, &idx, error) {
                log::warn!("'{}': LOD {level} buffer failed: {err}", self.name);
                break;
            }
            log::debug!(
                "lod{level} for '{}' idx: {prev_nr_idx} -> {}",
                self.name,
                idx.len()
            );
            prev_nr_idx = idx.len();
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn program(&self) -> &Shared<ShaderProgram> {
        &self.program
    }

    #[must_use]
    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    #[must_use]
    pub fn nr_vertices(&self) -> u32 {
        self.nr_vertices
    }

    #[must_use]
    pub fn nr_lods(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn nr_faces(&self, lod: usize) -> u32 {
        self.index.get(lod).map_or(0, |l| l.nr_idx / 3)
    }

    #[must_use]
    pub fn lod_error(&self, lod: usize) -> f32 {
        self.index.get(lod).map_or(0.0, |l| l.error)
    }

    /// Clamps a requested LOD into the valid range.
    #[must_use]
    pub fn validate_lod(&self, lod: i32) -> usize {
        (lod.max(0) as usize).clamp(self.lod_min, self.lod_max)
    }

    #[must_use]
    pub fn skin(&self) -> Option<&Skin> {
        self.skin.as_ref()
    }

    #[must_use]
    pub fn nr_joints(&self) -> usize {
        self.skin.as_ref().map_or(0, |s| s.joints.len())
    }

    /// Attaches skinning metadata. The joint table is capped by the
    /// skinning uniform block size.
    pub fn add_skinning(
        &mut self,
        joints: Vec<ModelJoint>,
        root_joint: usize,
        root_pose: Mat4,
    ) -> Result<()> {
        if joints.is_empty() || joints.len() > JOINTS_MAX {
            return Err(GlintError::InvalidArguments("joint count"));
        }
        if root_joint >= joints.len()
            || joints
                .iter()
                .any(|j| j.children.iter().any(|&c| c >= joints.len()))
        {
            return Err(GlintError::InvalidArguments("joint indices"));
        }
        self.skin = Some(Skin {
            joints,
            root_joint,
            root_pose,
        });
        Ok(())
    }

    /// Adds an animation, dropping channels that reference nonexistent
    /// joints. An animation with no valid channels left is discarded;
    /// `None` is returned in that case.
    pub fn add_animation(&mut self, mut animation: Animation) -> Option<usize> {
        let nr_joints = self.nr_joints();
        if animation.prune_invalid_channels(nr_joints) == 0 {
            log::warn!("animation '{}' has no valid channels, dropping", animation.name);
            return None;
        }
        self.animations.push(animation);
        Some(self.animations.len() - 1)
    }

    #[must_use]
    pub fn animations(&self) -> &[Animation] {
        &self.animations
    }

    #[must_use]
    pub fn animation(&self, idx: usize) -> Option<&Animation> {
        self.animations.get(idx)
    }

    #[must_use]
    pub fn animation_by_name(&self, name: &str) -> Option<usize> {
        self.animations.iter().position(|a| a.name == name)
    }

    /// Renames an animation (scene files remap asset animation names onto
    /// the ones gameplay asks for, like "idle").
    pub fn rename_animation(&mut self, from: &str, to: &str) -> bool {
        match self.animation_by_name(from) {
            Some(idx) => {
                self.animations[idx].name = to.to_string();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_animated(&self) -> bool {
        !self.animations.is_empty()
    }

    /// Binds all vertex attribute views. The program is bound by the draw
    /// loop, which may substitute an override program.
    pub fn bind_attrs(&self, backend: &mut dyn RenderBackend) -> Result<()> {
        for (attr, view) in &self.views {
            view.bind(backend, attr.location())?;
        }
        Ok(())
    }

    /// Binds the index buffer for `lod` and returns its index count.
    pub fn bind_lod(&self, backend: &mut dyn RenderBackend, lod: usize) -> Result<u32> {
        let level = self
            .index
            .get(lod)
            .ok_or(GlintError::InvalidArguments("LOD out of range"))?;
        level
            .buffer
            .bind_index(backend, wgpu::IndexFormat::Uint16)?;
        Ok(level.nr_idx)
    }

    pub fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        for lod in &mut self.index {
            lod.buffer.deinit(backend);
        }
        self.index.clear();
        for (_, view) in &mut self.views {
            view.deinit(backend);
        }
        self.views.clear();
        self.vertices.deinit(backend);
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("nr_vertices", &self.nr_vertices)
            .field("nr_lods", &self.index.len())
            .field("nr_joints", &self.nr_joints())
            .finish()
    }
}

/// The six texture slots of a textured model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    BaseColor = 0,
    Normal = 1,
    Emission = 2,
    Sobel = 3,
    Shadow = 4,
    Lut = 5,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 6] = [
        TextureSlot::BaseColor,
        TextureSlot::Normal,
        TextureSlot::Emission,
        TextureSlot::Sobel,
        TextureSlot::Shadow,
        TextureSlot::Lut,
    ];

    #[must_use]
    pub fn sampler(self) -> SamplerVar {
        match self {
            TextureSlot::BaseColor => SamplerVar::ModelTex,
            TextureSlot::Normal => SamplerVar::NormalMap,
            TextureSlot::Emission => SamplerVar::EmissionMap,
            TextureSlot::Sobel => SamplerVar::SobelTex,
            TextureSlot::Shadow => SamplerVar::ShadowMap,
            TextureSlot::Lut => SamplerVar::LutTex,
        }
    }
}

/// A texture slot's backing: owned by this model or shared.
#[derive(Debug)]
pub enum TexRef {
    Owned(Texture),
    External(Shared<Texture>),
}

impl TexRef {
    #[must_use]
    pub fn texture(&self) -> &Texture {
        match self {
            TexRef::Owned(tex) => tex,
            TexRef::External(tex) => tex,
        }
    }
}

/// Where the base-color texture of a new `ModelTx` comes from.
pub enum TextureSource<'a> {
    /// Take ownership of a ready texture.
    Owned(Texture),
    /// Share a texture owned elsewhere (a pass attachment, the white pixel).
    External(Shared<Texture>),
    /// Upload raw RGBA8 pixels.
    Pixels {
        width: u32,
        height: u32,
        data: &'a [u8],
    },
    /// Decode a PNG blob.
    Png(&'a [u8]),
    /// No texture: a 1x1 white placeholder is created.
    None,
}

pub struct ModelTx {
    model: Shared<Model>,
    slots: [Option<TexRef>; 6],
    pub material: MaterialParams,
    entities: Vec<EntityKey>,
}

impl ModelTx {
    /// Creates a textured model, consuming the caller's model reference.
    pub fn new(
        backend: &mut dyn RenderBackend,
        model: impl Into<Passed<Model>>,
        source: TextureSource<'_>,
    ) -> Result<Self> {
        let model = model.into();

        let base = match source {
            TextureSource::Owned(tex) => TexRef::Owned(tex),
            TextureSource::External(tex) => TexRef::External(tex),
            TextureSource::Pixels { width, height, data } => {
                let mut tex = Texture::init(Default::default())?;
                tex.load(backend, wgpu::TextureFormat::Rgba8Unorm, width, height, data)?;
                TexRef::Owned(tex)
            }
            TextureSource::Png(bytes) => TexRef::Owned(Texture::from_png(backend, bytes)?),
            TextureSource::None => TexRef::Owned(Texture::white_pixel(backend)?),
        };

        let mut slots: [Option<TexRef>; 6] = Default::default();
        slots[TextureSlot::BaseColor as usize] = Some(base);

        Ok(Self {
            model: model.take(),
            slots,
            material: MaterialParams::default(),
            entities: Vec::new(),
        })
    }

    #[must_use]
    pub fn model(&self) -> &Shared<Model> {
        &self.model
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn set_texture(&mut self, slot: TextureSlot, tex: TexRef) {
        self.slots[slot as usize] = Some(tex);
    }

    #[must_use]
    pub fn texture(&self, slot: TextureSlot) -> Option<&Texture> {
        self.slots[slot as usize].as_ref().map(TexRef::texture)
    }

    #[must_use]
    pub fn has_normal_map(&self) -> bool {
        self.texture(TextureSlot::Normal).is_some_and(Texture::is_loaded)
    }

    /// Binds every populated slot to its sampler unit.
    pub fn bind_textures(&self, backend: &mut dyn RenderBackend) {
        for slot in TextureSlot::ALL {
            if let Some(tex) = self.texture(slot) {
                if let Some(id) = tex.id() {
                    backend.bind_texture(slot.sampler(), id);
                }
            }
        }
    }

    #[must_use]
    pub fn entities(&self) -> &[EntityKey] {
        &self.entities
    }

    pub fn add_entity(&mut self, key: EntityKey) {
        self.entities.push(key);
    }

    pub fn remove_entity(&mut self, key: EntityKey) {
        self.entities.retain(|&e| e != key);
    }

    /// Releases owned textures and, when this was the last reference, the
    /// model's buffers.
    pub fn release(mut self, backend: &mut dyn RenderBackend) {
        for slot in &mut self.slots {
            if let Some(TexRef::Owned(tex)) = slot {
                tex.deinit(backend);
            }
        }
        if let Ok(mut model) = Shared::try_into_inner(self.model) {
            model.deinit(backend);
        }
    }
}

impl std::fmt::Debug for ModelTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTx")
            .field("model", &self.model.name())
            .field("entities", &self.entities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::resources::primitives;
    use crate::resources::shader::{BlockMask, ShaderProgramOptions};

    fn model_program(backend: &mut HeadlessBackend) -> Shared<ShaderProgram> {
        Shared::new(
            ShaderProgram::new(
                backend,
                &ShaderProgramOptions {
                    name: "model",
                    vert: "void main() {}",
                    frag: "void main() {}",
                    geom: None,
                    blocks: BlockMask::PROJVIEW | BlockMask::TRANSFORM,
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_model_from_cube() {
        let mut backend = HeadlessBackend::new();
        let program = model_program(&mut backend);
        let mesh = primitives::cube_mesh();
        let model =
            Model::from_mesh(&mut backend, "cube", program, &mesh, &ModelOptions::default())
                .unwrap();

        assert_eq!(model.nr_vertices(), 24);
        assert!(model.nr_lods() >= 1);
        assert_eq!(model.nr_faces(0), 12);
        assert_eq!(model.validate_lod(-5), 0);
        assert_eq!(model.validate_lod(99), model.nr_lods() - 1);
    }

    #[test]
    fn test_lod_face_counts_strictly_decrease() {
        let mut backend = HeadlessBackend::new();
        let program = model_program(&mut backend);
        let mesh = primitives::grid_mesh(24, 4.0);
        let model =
            Model::from_mesh(&mut backend, "grid", program, &mesh, &ModelOptions::default())
                .unwrap();

        assert!(model.nr_lods() >= 2, "dense grid should yield LODs");
        for lod in 1..model.nr_lods() {
            assert!(model.nr_faces(lod) < model.nr_faces(lod - 1));
            assert!(model.lod_error(lod) > 0.0);
        }
    }

    #[test]
    fn test_modeltx_consumes_model_reference() {
        let mut backend = HeadlessBackend::new();
        let program = model_program(&mut backend);
        let mesh = primitives::cube_mesh();
        let model = Shared::new(
            Model::from_mesh(&mut backend, "cube", program, &mesh, &ModelOptions::default())
                .unwrap(),
        );

        let txm = ModelTx::new(&mut backend, model.pass(), TextureSource::None).unwrap();
        assert_eq!(Shared::strong_count(txm.model()), 1);
        // The placeholder base-color slot is populated
        assert!(txm.texture(TextureSlot::BaseColor).unwrap().is_loaded());
        txm.release(&mut backend);
    }

    #[test]
    fn test_skinning_validation() {
        let mut backend = HeadlessBackend::new();
        let program = model_program(&mut backend);
        let mesh = primitives::cube_mesh();
        let mut model =
            Model::from_mesh(&mut backend, "cube", program, &mesh, &ModelOptions::default())
                .unwrap();

        assert!(model
            .add_skinning(
                vec![ModelJoint {
                    name: "root".into(),
                    children: vec![4],
                    inverse_bind: Mat4::IDENTITY,
                }],
                0,
                Mat4::IDENTITY,
            )
            .is_err());

        assert!(model
            .add_skinning(
                vec![
                    ModelJoint {
                        name: "root".into(),
                        children: vec![1],
                        inverse_bind: Mat4::IDENTITY,
                    },
                    ModelJoint {
                        name: "tip".into(),
                        children: vec![],
                        inverse_bind: Mat4::IDENTITY,
                    },
                ],
                0,
                Mat4::IDENTITY,
            )
            .is_ok());
        assert_eq!(model.nr_joints(), 2);
    }
}
