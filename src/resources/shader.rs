//! Shader programs and the per-program binding contract.
//!
//! A program is two or three text sources (`<name>.vert`, `<name>.frag`,
//! optional `<name>.geom` — a missing geom is not an error) compiled by the
//! backend. The core side of the contract is data: the fixed vertex
//! attribute locations, the sampler units, and the set of uniform blocks the
//! program references. [`UniformStore::update`] uploads only blocks that are
//! both referenced by the bound program and dirty, once per draw batch.

use std::fmt;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::errors::{GlintError, Result};
use crate::handle::Shared;
use crate::renderer::backend::{BackendId, RenderBackend};
use crate::resources::uniforms::{
    BloomBlock, ColorPtBlock, LightingBlock, MaterialBlock, OutlineBlock, PostprocBlock,
    ProjViewBlock, RenderCommonBlock, ShadowBlock, SkinningBlock, TransformBlock,
};

/// Vertex attributes at their fixed program locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttr {
    Position,
    Normal,
    TexCoord,
    Tangent,
    Joints,
    Weights,
}

impl VertexAttr {
    pub const ALL: [VertexAttr; 6] = [
        VertexAttr::Position,
        VertexAttr::Normal,
        VertexAttr::TexCoord,
        VertexAttr::Tangent,
        VertexAttr::Joints,
        VertexAttr::Weights,
    ];

    #[must_use]
    pub fn location(self) -> u32 {
        match self {
            VertexAttr::Position => 0,
            VertexAttr::Normal => 1,
            VertexAttr::TexCoord => 2,
            VertexAttr::Tangent => 3,
            VertexAttr::Joints => 4,
            VertexAttr::Weights => 5,
        }
    }

    #[must_use]
    pub fn format(self) -> wgpu::VertexFormat {
        match self {
            VertexAttr::Position | VertexAttr::Normal => wgpu::VertexFormat::Float32x3,
            VertexAttr::TexCoord => wgpu::VertexFormat::Float32x2,
            VertexAttr::Tangent | VertexAttr::Weights => wgpu::VertexFormat::Float32x4,
            VertexAttr::Joints => wgpu::VertexFormat::Uint8x4,
        }
    }

    /// Byte size of one element.
    #[must_use]
    pub fn size(self) -> usize {
        self.format().size() as usize
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            VertexAttr::Position => "position",
            VertexAttr::Normal => "normal",
            VertexAttr::TexCoord => "tex",
            VertexAttr::Tangent => "tangent",
            VertexAttr::Joints => "joints",
            VertexAttr::Weights => "weights",
        }
    }
}

/// Sampler uniforms and their texture units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerVar {
    ModelTex,
    NormalMap,
    EmissionMap,
    SobelTex,
    ShadowMap,
    ShadowMapMs,
    ShadowMap1,
    ShadowMap2,
    ShadowMap3,
    LutTex,
}

impl SamplerVar {
    #[must_use]
    pub fn unit(self) -> u32 {
        match self {
            SamplerVar::ModelTex => 0,
            SamplerVar::NormalMap => 1,
            SamplerVar::EmissionMap => 2,
            SamplerVar::SobelTex => 3,
            SamplerVar::ShadowMap => 4,
            SamplerVar::ShadowMapMs => 5,
            SamplerVar::ShadowMap1 => 6,
            SamplerVar::ShadowMap2 => 7,
            SamplerVar::ShadowMap3 => 8,
            SamplerVar::LutTex => 9,
        }
    }
}

/// The uniform blocks a program may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    ColorPt,
    Lighting,
    Shadow,
    Transform,
    ProjView,
    Skinning,
    Particles,
    Material,
    RenderCommon,
    Outline,
    Bloom,
    Postproc,
}

impl BlockKind {
    /// UBO binding point; part of the shader ABI.
    #[must_use]
    pub fn binding(self) -> u32 {
        match self {
            BlockKind::ColorPt => 0,
            BlockKind::Lighting => 1,
            BlockKind::Shadow => 2,
            BlockKind::Transform => 3,
            BlockKind::ProjView => 4,
            BlockKind::Skinning => 5,
            BlockKind::Particles => 6,
            BlockKind::Material => 7,
            BlockKind::RenderCommon => 8,
            BlockKind::Outline => 9,
            BlockKind::Bloom => 10,
            BlockKind::Postproc => 11,
        }
    }

    #[must_use]
    pub fn mask(self) -> BlockMask {
        BlockMask::from_bits_truncate(1 << self.binding())
    }
}

bitflags! {
    /// Set of uniform blocks, one bit per binding point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockMask: u32 {
        const COLOR_PT      = 1 << 0;
        const LIGHTING      = 1 << 1;
        const SHADOW        = 1 << 2;
        const TRANSFORM     = 1 << 3;
        const PROJVIEW      = 1 << 4;
        const SKINNING      = 1 << 5;
        const PARTICLES     = 1 << 6;
        const MATERIAL      = 1 << 7;
        const RENDER_COMMON = 1 << 8;
        const OUTLINE       = 1 << 9;
        const BLOOM         = 1 << 10;
        const POSTPROC      = 1 << 11;
    }
}

const ALL_BLOCKS: [BlockKind; 12] = [
    BlockKind::ColorPt,
    BlockKind::Lighting,
    BlockKind::Shadow,
    BlockKind::Transform,
    BlockKind::ProjView,
    BlockKind::Skinning,
    BlockKind::Particles,
    BlockKind::Material,
    BlockKind::RenderCommon,
    BlockKind::Outline,
    BlockKind::Bloom,
    BlockKind::Postproc,
];

/// Options for building a shader program.
pub struct ShaderProgramOptions<'a> {
    pub name: &'a str,
    pub vert: &'a str,
    pub frag: &'a str,
    pub geom: Option<&'a str>,
    /// Blocks this program's stages declare.
    pub blocks: BlockMask,
}

/// A compiled program plus the binding metadata the draw loop needs.
pub struct ShaderProgram {
    name: String,
    id: BackendId,
    blocks: BlockMask,
}

impl ShaderProgram {
    pub fn new(backend: &mut dyn RenderBackend, opts: &ShaderProgramOptions<'_>) -> Result<Self> {
        if opts.name.is_empty() {
            return Err(GlintError::InvalidArguments("program name"));
        }
        if opts.vert.is_empty() || opts.frag.is_empty() {
            return Err(GlintError::ShaderNotLoaded(opts.name.to_string()));
        }
        let id = backend.create_program(opts.name, opts.vert, opts.frag, opts.geom)?;
        Ok(Self {
            name: opts.name.to_string(),
            id,
            blocks: opts.blocks,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id(&self) -> BackendId {
        self.id
    }

    #[must_use]
    pub fn blocks(&self) -> BlockMask {
        self.blocks
    }

    pub fn bind(&self, backend: &mut dyn RenderBackend) {
        backend.bind_program(self.id);
    }
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("name", &self.name)
            .field("blocks", &self.blocks)
            .finish()
    }
}

/// Named program lookup, shared by scene and pipeline.
#[derive(Default)]
pub struct ProgramLibrary {
    programs: FxHashMap<String, Shared<ShaderProgram>>,
}

impl ProgramLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, program: Shared<ShaderProgram>) {
        self.programs.insert(program.name().to_string(), program);
    }

    pub fn find(&self, name: &str) -> Result<Shared<ShaderProgram>> {
        self.programs
            .get(name)
            .cloned()
            .ok_or_else(|| GlintError::ShaderNotLoaded(name.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// CPU copies of every uniform block plus dirty tracking.
///
/// Large blocks are boxed; the store lives in the pipeline and is written
/// through the `_mut` accessors, which mark the block dirty. `update` is the
/// per-draw batch upload.
pub struct UniformStore {
    projview: ProjViewBlock,
    transform: TransformBlock,
    lighting: Box<LightingBlock>,
    shadow: ShadowBlock,
    skinning: Box<SkinningBlock>,
    material: MaterialBlock,
    color_pt: ColorPtBlock,
    render_common: RenderCommonBlock,
    outline: OutlineBlock,
    bloom: BloomBlock,
    postproc: Box<PostprocBlock>,
    dirty: BlockMask,
}

impl Default for UniformStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            projview: ProjViewBlock::default(),
            transform: TransformBlock::default(),
            lighting: Box::default(),
            shadow: ShadowBlock::default(),
            skinning: Box::default(),
            material: MaterialBlock::default(),
            color_pt: ColorPtBlock::default(),
            render_common: RenderCommonBlock::default(),
            outline: OutlineBlock::default(),
            bloom: BloomBlock::default(),
            postproc: Box::default(),
            // Everything starts dirty so the first draw uploads a full set
            dirty: BlockMask::all(),
        }
    }

    #[must_use]
    pub fn projview(&self) -> &ProjViewBlock {
        &self.projview
    }

    pub fn projview_mut(&mut self) -> &mut ProjViewBlock {
        self.dirty |= BlockMask::PROJVIEW;
        &mut self.projview
    }

    pub fn transform_mut(&mut self) -> &mut TransformBlock {
        self.dirty |= BlockMask::TRANSFORM;
        &mut self.transform
    }

    #[must_use]
    pub fn lighting(&self) -> &LightingBlock {
        &self.lighting
    }

    pub fn lighting_mut(&mut self) -> &mut LightingBlock {
        self.dirty |= BlockMask::LIGHTING;
        &mut self.lighting
    }

    #[must_use]
    pub fn shadow(&self) -> &ShadowBlock {
        &self.shadow
    }

    pub fn shadow_mut(&mut self) -> &mut ShadowBlock {
        self.dirty |= BlockMask::SHADOW;
        &mut self.shadow
    }

    pub fn skinning_mut(&mut self) -> &mut SkinningBlock {
        self.dirty |= BlockMask::SKINNING;
        &mut self.skinning
    }

    pub fn material_mut(&mut self) -> &mut MaterialBlock {
        self.dirty |= BlockMask::MATERIAL;
        &mut self.material
    }

    pub fn color_pt_mut(&mut self) -> &mut ColorPtBlock {
        self.dirty |= BlockMask::COLOR_PT;
        &mut self.color_pt
    }

    pub fn render_common_mut(&mut self) -> &mut RenderCommonBlock {
        self.dirty |= BlockMask::RENDER_COMMON;
        &mut self.render_common
    }

    pub fn outline_mut(&mut self) -> &mut OutlineBlock {
        self.dirty |= BlockMask::OUTLINE;
        &mut self.outline
    }

    pub fn bloom_mut(&mut self) -> &mut BloomBlock {
        self.dirty |= BlockMask::BLOOM;
        &mut self.bloom
    }

    pub fn postproc_mut(&mut self) -> &mut PostprocBlock {
        self.dirty |= BlockMask::POSTPROC;
        &mut self.postproc
    }

    /// Uploads the dirty subset of the blocks `program` references and
    /// clears their dirty bits. Called once per draw batch.
    pub fn update(&mut self, backend: &mut dyn RenderBackend, program: &ShaderProgram) {
        let pending = self.dirty & program.blocks();
        if pending.is_empty() {
            return;
        }

        for kind in ALL_BLOCKS {
            if !pending.contains(kind.mask()) {
                continue;
            }
            let bytes: &[u8] = match kind {
                BlockKind::ColorPt => bytemuck::bytes_of(&self.color_pt),
                BlockKind::Lighting => bytemuck::bytes_of(&*self.lighting),
                BlockKind::Shadow => bytemuck::bytes_of(&self.shadow),
                BlockKind::Transform => bytemuck::bytes_of(&self.transform),
                BlockKind::ProjView => bytemuck::bytes_of(&self.projview),
                BlockKind::Skinning => bytemuck::bytes_of(&*self.skinning),
                // Uploaded by the particle system at draw time
                BlockKind::Particles => continue,
                BlockKind::Material => bytemuck::bytes_of(&self.material),
                BlockKind::RenderCommon => bytemuck::bytes_of(&self.render_common),
                BlockKind::Outline => bytemuck::bytes_of(&self.outline),
                BlockKind::Bloom => bytemuck::bytes_of(&self.bloom),
                BlockKind::Postproc => bytemuck::bytes_of(&*self.postproc),
            };
            backend.upload_block(kind, bytes);
        }

        self.dirty -= pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    fn test_program(backend: &mut HeadlessBackend, blocks: BlockMask) -> ShaderProgram {
        ShaderProgram::new(
            backend,
            &ShaderProgramOptions {
                name: "model",
                vert: "void main() {}",
                frag: "void main() {}",
                geom: None,
                blocks,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_missing_source_fails() {
        let mut backend = HeadlessBackend::new();
        let result = ShaderProgram::new(
            &mut backend,
            &ShaderProgramOptions {
                name: "broken",
                vert: "",
                frag: "void main() {}",
                geom: None,
                blocks: BlockMask::empty(),
            },
        );
        assert!(matches!(result, Err(GlintError::ShaderNotLoaded(_))));
    }

    #[test]
    fn test_update_uploads_only_referenced_dirty_blocks() {
        let mut backend = HeadlessBackend::new();
        let program = test_program(
            &mut backend,
            BlockMask::PROJVIEW | BlockMask::TRANSFORM,
        );
        let mut store = UniformStore::new();

        store.update(&mut backend, &program);
        assert_eq!(backend.trace.block_uploads, 2);

        // Nothing dirty: no re-upload
        store.update(&mut backend, &program);
        assert_eq!(backend.trace.block_uploads, 2);

        // Touch one referenced block and one unreferenced block
        store.transform_mut().trans = glam::Mat4::IDENTITY;
        store.bloom_mut().bloom_exposure = 1.5;
        store.update(&mut backend, &program);
        assert_eq!(backend.trace.block_uploads, 3);

        // The bloom write is still pending for a program that references it
        let bloom_program = test_program(&mut backend, BlockMask::BLOOM);
        store.update(&mut backend, &bloom_program);
        assert_eq!(backend.trace.block_uploads, 4);
    }

    #[test]
    fn test_attribute_table() {
        assert_eq!(VertexAttr::Position.location(), 0);
        assert_eq!(VertexAttr::Weights.location(), 5);
        assert_eq!(VertexAttr::TexCoord.size(), 8);
        assert_eq!(VertexAttr::Joints.format(), wgpu::VertexFormat::Uint8x4);
    }

    #[test]
    fn test_library_lookup() {
        let mut backend = HeadlessBackend::new();
        let program = Shared::new(test_program(&mut backend, BlockMask::empty()));
        let mut library = ProgramLibrary::new();
        library.insert(program);
        assert!(library.find("model").is_ok());
        assert!(matches!(
            library.find("missing"),
            Err(GlintError::ShaderNotLoaded(_))
        ));
    }
}
