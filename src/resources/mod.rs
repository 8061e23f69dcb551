//! Engine resources: GPU object wrappers and the data they carry.

pub mod buffer;
pub mod framebuffer;
pub mod material;
pub mod mesh;
pub mod model;
pub mod primitives;
pub mod shader;
pub mod texture;
pub mod uniforms;

pub use buffer::{Buffer, BufferOptions, BufferRole, BufferUsage};
pub use framebuffer::{Attachment, AttachmentConfig, Framebuffer, FramebufferOptions};
pub use material::{MaterialParams, MetallicMode};
pub use mesh::{Aabb, FlatVertices, Mesh};
pub use model::{Model, ModelJoint, ModelOptions, ModelTx, Skin, TexRef, TextureSlot, TextureSource, LOD_MAX};
pub use shader::{
    BlockKind, BlockMask, ProgramLibrary, SamplerVar, ShaderProgram, ShaderProgramOptions,
    UniformStore, VertexAttr,
};
pub use texture::{Texture, TextureKind, TextureOptions};
