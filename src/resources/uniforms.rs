//! Uniform blocks shared with the shader set.
//!
//! These structs are the observable ABI: their layout must match the shader
//! declarations bit for bit, std140 rules. The layout is written out
//! explicitly per field (array elements smaller than 16 bytes are padded to
//! 16) and verified by the tests at the bottom; a mismatch here is a bug in
//! this file, never something to paper over on the shader side.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Upper bound on skeleton joints in the skinning block.
pub const JOINTS_MAX: usize = 200;
/// Upper bound on particles in the particles block.
pub const PARTICLES_MAX: usize = 1024;
/// Light table capacity; also the width of the cluster-grid bitmask.
pub const LIGHTS_MAX: usize = 128;
/// Number of shadow cascades.
pub const CASCADES_MAX: usize = 4;
/// SSAO sampling kernel size.
pub const SSAO_KERNEL_SIZE: usize = 64;

/// A `vec3` array element, padded to the std140 16-byte stride.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PadVec3 {
    pub v: Vec3,
    _pad: f32,
}

impl From<Vec3> for PadVec3 {
    fn from(v: Vec3) -> Self {
        Self { v, _pad: 0.0 }
    }
}

/// A `float` array element, padded to the std140 16-byte stride.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PadF32 {
    pub v: f32,
    _pad: [f32; 3],
}

impl From<f32> for PadF32 {
    fn from(v: f32) -> Self {
        Self { v, _pad: [0.0; 3] }
    }
}

/// An `int` array element, padded to the std140 16-byte stride.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PadI32 {
    pub v: i32,
    _pad: [i32; 3],
}

impl From<i32> for PadI32 {
    fn from(v: i32) -> Self {
        Self { v, _pad: [0; 3] }
    }
}

/// `projview` — vertex + fragment stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ProjViewBlock {
    pub proj: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
}

/// `transform` — vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TransformBlock {
    pub trans: Mat4,
}

/// `lighting` — vertex + fragment stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightingBlock {
    pub light_pos: [PadVec3; LIGHTS_MAX],
    pub light_color: [PadVec3; LIGHTS_MAX],
    pub light_dir: [PadVec3; LIGHTS_MAX],
    pub attenuation: [PadVec3; LIGHTS_MAX],
    pub light_directional: [PadI32; LIGHTS_MAX],
    pub nr_lights: i32,
    pub use_normals: i32,
    _pad0: [f32; 2],
    pub light_ambient: Vec3,
    _pad1: f32,
}

/// `shadow` — geometry + fragment stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShadowBlock {
    pub shadow_mvp: [Mat4; CASCADES_MAX],
    pub cascade_distances: [PadF32; CASCADES_MAX],
    pub shadow_tint: Vec3,
    pub shadow_vsm: i32,
    pub shadow_outline: i32,
    pub shadow_outline_threshold: f32,
    _pad0: [f32; 2],
}

/// `skinning` — vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SkinningBlock {
    pub use_skinning: i32,
    _pad0: [i32; 3],
    pub joint_transforms: [Mat4; JOINTS_MAX],
}

/// `particles` — vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticlesBlock {
    pub particle_pos: [PadVec3; PARTICLES_MAX],
}

/// `material` — fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialBlock {
    pub reflectivity: f32,
    pub shine_damper: f32,
    pub roughness: f32,
    pub metallic: f32,
    pub roughness_ceil: f32,
    pub roughness_amp: f32,
    pub roughness_oct: i32,
    pub roughness_scale: f32,
    pub metallic_ceil: f32,
    pub metallic_amp: f32,
    pub metallic_oct: i32,
    pub metallic_scale: f32,
    pub metallic_mode: i32,
    pub shared_scale: i32,
    _pad0: [f32; 2],
}

/// `color_pt` — fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ColorPtBlock {
    pub in_color: Vec4,
    pub color_passthrough: i32,
    _pad0: [i32; 3],
}

/// `render_common` — fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderCommonBlock {
    pub use_msaa: i32,
    pub use_hdr: i32,
    _pad0: [i32; 2],
}

/// `outline` — fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OutlineBlock {
    pub outline_exclude: i32,
    pub sobel_solid: i32,
    pub sobel_solid_id: f32,
    _pad0: f32,
}

/// `bloom` — fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BloomBlock {
    pub bloom_exposure: f32,
    pub bloom_intensity: f32,
    pub bloom_threshold: f32,
    pub bloom_operator: f32,
}

/// `postproc` — fragment stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PostprocBlock {
    pub width: f32,
    pub height: f32,
    pub near_plane: f32,
    pub far_plane: f32,
    pub ssao_kernel: [PadVec3; SSAO_KERNEL_SIZE],
    pub ssao_noise_scale: Vec2,
    pub ssao_radius: f32,
    pub ssao_weight: f32,
    pub use_ssao: i32,
    pub laplace_kernel: i32,
    pub contrast: f32,
    pub lighting_exposure: f32,
    pub lighting_operator: f32,
    pub fog_near: f32,
    pub fog_far: f32,
    _pad0: f32,
    pub fog_color: Vec3,
    _pad1: f32,
}

macro_rules! zeroed_default {
    ($($block:ty),+ $(,)?) => {
        $(impl Default for $block {
            fn default() -> Self {
                Zeroable::zeroed()
            }
        })+
    };
}

zeroed_default!(
    ProjViewBlock,
    TransformBlock,
    LightingBlock,
    ShadowBlock,
    SkinningBlock,
    ParticlesBlock,
    MaterialBlock,
    ColorPtBlock,
    RenderCommonBlock,
    OutlineBlock,
    BloomBlock,
    PostprocBlock,
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_block_sizes_are_std140_sums() {
        assert_eq!(size_of::<ProjViewBlock>(), 192);
        assert_eq!(size_of::<TransformBlock>(), 64);
        assert_eq!(size_of::<LightingBlock>(), LIGHTS_MAX * 16 * 5 + 32);
        assert_eq!(size_of::<ShadowBlock>(), CASCADES_MAX * (64 + 16) + 32);
        assert_eq!(size_of::<SkinningBlock>(), 16 + JOINTS_MAX * 64);
        assert_eq!(size_of::<ParticlesBlock>(), PARTICLES_MAX * 16);
        assert_eq!(size_of::<MaterialBlock>(), 64);
        assert_eq!(size_of::<ColorPtBlock>(), 32);
        assert_eq!(size_of::<RenderCommonBlock>(), 16);
        assert_eq!(size_of::<OutlineBlock>(), 16);
        assert_eq!(size_of::<BloomBlock>(), 16);
        assert_eq!(size_of::<PostprocBlock>(), SSAO_KERNEL_SIZE * 16 + 80);
    }

    #[test]
    fn test_all_blocks_align_to_16() {
        assert_eq!(size_of::<LightingBlock>() % 16, 0);
        assert_eq!(size_of::<ShadowBlock>() % 16, 0);
        assert_eq!(size_of::<SkinningBlock>() % 16, 0);
        assert_eq!(size_of::<MaterialBlock>() % 16, 0);
        assert_eq!(size_of::<PostprocBlock>() % 16, 0);
    }

    #[test]
    fn test_small_array_elements_pad_to_16() {
        assert_eq!(size_of::<PadVec3>(), 16);
        assert_eq!(size_of::<PadF32>(), 16);
        assert_eq!(size_of::<PadI32>(), 16);
    }

    #[test]
    fn test_member_offsets() {
        assert_eq!(offset_of!(ProjViewBlock, view), 64);
        assert_eq!(offset_of!(ProjViewBlock, inverse_view), 128);
        assert_eq!(offset_of!(LightingBlock, light_color), LIGHTS_MAX * 16);
        assert_eq!(offset_of!(LightingBlock, nr_lights), LIGHTS_MAX * 16 * 5);
        assert_eq!(offset_of!(LightingBlock, light_ambient), LIGHTS_MAX * 16 * 5 + 16);
        assert_eq!(offset_of!(ShadowBlock, cascade_distances), 256);
        assert_eq!(offset_of!(ShadowBlock, shadow_tint), 320);
        assert_eq!(offset_of!(SkinningBlock, joint_transforms), 16);
        assert_eq!(offset_of!(PostprocBlock, ssao_kernel), 16);
        assert_eq!(offset_of!(PostprocBlock, fog_color), 16 + SSAO_KERNEL_SIZE * 16 + 48);
    }
}
