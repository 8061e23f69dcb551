//! Render options: the scene-owned knobs the pipeline builder and the draw
//! loop read. The scene's defaults win; the builder never writes back.

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub hdr: bool,
    pub ssao: bool,
    pub edge_antialiasing: bool,
    /// Sobel edge detection; Laplace otherwise.
    pub edge_sobel: bool,
    pub model_msaa: bool,
    pub shadow_msaa: bool,
    pub shadow_vsm: bool,
    pub shadow_outline: bool,
    pub shadow_outline_threshold: f32,
    pub bloom_exposure: f32,
    pub bloom_intensity: f32,
    pub bloom_threshold: f32,
    pub bloom_operator: f32,
    pub lighting_exposure: f32,
    pub lighting_operator: f32,
    pub contrast: f32,
    pub fog_near: f32,
    pub fog_far: f32,
    pub fog_color: glam::Vec3,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            hdr: true,
            ssao: false,
            edge_antialiasing: false,
            edge_sobel: true,
            model_msaa: false,
            shadow_msaa: false,
            shadow_vsm: false,
            shadow_outline: false,
            shadow_outline_threshold: 0.4,
            bloom_exposure: 1.0,
            bloom_intensity: 1.0,
            bloom_threshold: 1.0,
            bloom_operator: 1.0,
            lighting_exposure: 1.0,
            lighting_operator: 1.0,
            contrast: 1.0,
            fog_near: 100.0,
            fog_far: 300.0,
            fog_color: glam::Vec3::new(0.3, 0.3, 0.35),
        }
    }
}
