//! Material parameters of a textured model.

use crate::resources::uniforms::MaterialBlock;

/// How metallic noise modulation combines with the base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetallicMode {
    #[default]
    Multiply = 0,
    Add = 1,
    Replace = 2,
}

/// Roughness/metallic defaults plus the octave-noise modulation knobs.
/// An octave count of zero disables modulation for that parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialParams {
    pub roughness: f32,
    pub metallic: f32,
    pub roughness_oct: i32,
    pub roughness_scale: f32,
    pub roughness_ceil: f32,
    pub roughness_amp: f32,
    pub metallic_oct: i32,
    pub metallic_scale: f32,
    pub metallic_ceil: f32,
    pub metallic_amp: f32,
    pub metallic_mode: MetallicMode,
    /// Use the roughness noise scale for metallic as well.
    pub shared_scale: bool,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            roughness: 0.65,
            metallic: 0.0,
            roughness_oct: 0,
            roughness_scale: 1.0,
            roughness_ceil: 1.0,
            roughness_amp: 1.0,
            metallic_oct: 0,
            metallic_scale: 1.0,
            metallic_ceil: 1.0,
            metallic_amp: 1.0,
            metallic_mode: MetallicMode::Multiply,
            shared_scale: false,
        }
    }
}

impl MaterialParams {
    /// Writes the parameters into the `material` uniform block.
    pub fn write_block(&self, block: &mut MaterialBlock) {
        block.roughness = self.roughness;
        block.metallic = self.metallic;
        block.roughness_oct = self.roughness_oct;
        block.roughness_scale = self.roughness_scale;
        block.roughness_ceil = self.roughness_ceil;
        block.roughness_amp = self.roughness_amp;
        block.metallic_oct = self.metallic_oct;
        block.metallic_scale = self.metallic_scale;
        block.metallic_ceil = self.metallic_ceil;
        block.metallic_amp = self.metallic_amp;
        block.metallic_mode = self.metallic_mode as i32;
        block.shared_scale = i32::from(self.shared_scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_block() {
        let params = MaterialParams {
            roughness: 0.2,
            metallic: 0.9,
            metallic_mode: MetallicMode::Replace,
            shared_scale: true,
            ..MaterialParams::default()
        };
        let mut block = MaterialBlock::default();
        params.write_block(&mut block);
        assert_eq!(block.roughness, 0.2);
        assert_eq!(block.metallic, 0.9);
        assert_eq!(block.metallic_mode, 2);
        assert_eq!(block.shared_scale, 1);
    }
}
