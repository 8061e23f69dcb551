//! The render device boundary.
//!
//! The core drives the GPU exclusively through [`RenderBackend`]; the
//! GL/GLES/Metal implementations live with the host. Descriptors use the
//! `wgpu` type vocabulary (formats, filters, wrap modes) so a wgpu-backed
//! implementation plugs in without translation.
//!
//! GPU objects are owned by exactly one engine object at a time. Backend ids
//! are opaque; destroying an id twice is a bug on the engine side, and the
//! headless backend asserts on it.

use glam::Vec4;
use rustc_hash::FxHashMap;

use crate::errors::{GlintError, Result};
use crate::resources::shader::{BlockKind, SamplerVar};

/// Opaque backend object id.
pub type BackendId = u64;

/// Capabilities the pipeline builder keys decisions off.
#[derive(Debug, Clone, Copy)]
pub struct BackendCaps {
    pub max_texture_size: u32,
    /// Layered (array-texture) framebuffer attachments; without them a
    /// cascaded pass is expanded into one pass per cascade.
    pub layered_framebuffers: bool,
    /// Multisampled render targets; forced off on GLES-class backends.
    pub msaa: bool,
}

impl Default for BackendCaps {
    fn default() -> Self {
        Self {
            max_texture_size: 16384,
            layered_framebuffers: true,
            msaa: true,
        }
    }
}

/// Fixed-function state set once per textured model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderState {
    pub cull_face: bool,
    pub alpha_blend: bool,
    pub depth_test: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            cull_face: true,
            alpha_blend: false,
            depth_test: true,
        }
    }
}

/// Texture storage descriptor handed to the backend.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub dimension: wgpu::TextureDimension,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u32,
    pub min_filter: wgpu::FilterMode,
    pub mag_filter: wgpu::FilterMode,
    pub wrap: wgpu::AddressMode,
    pub border: Option<Vec4>,
}

/// The interface the core consumes; everything GPU-side goes through here.
pub trait RenderBackend {
    fn caps(&self) -> BackendCaps;

    /// Whether `format` is renderable on this device; drives the HDR probe.
    fn texture_format_supported(&self, format: wgpu::TextureFormat) -> bool;

    // Textures
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<BackendId>;
    fn upload_texture(&mut self, id: BackendId, width: u32, height: u32, data: &[u8])
        -> Result<()>;
    fn resize_texture(&mut self, id: BackendId, width: u32, height: u32) -> Result<()>;
    fn destroy_texture(&mut self, id: BackendId);

    // Buffers
    fn create_buffer(&mut self, usage: wgpu::BufferUsages, data: Option<&[u8]>, size: usize)
        -> Result<BackendId>;
    fn upload_buffer(&mut self, id: BackendId, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&mut self, id: BackendId);

    // Framebuffers
    fn create_framebuffer(
        &mut self,
        color: &[BackendId],
        depth: Option<BackendId>,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Result<BackendId>;
    fn destroy_framebuffer(&mut self, id: BackendId);
    /// `None` binds the default (window) framebuffer.
    fn bind_framebuffer(&mut self, id: Option<BackendId>, width: u32, height: u32);
    /// Selects the destination layer of a layered framebuffer.
    fn framebuffer_layer(&mut self, id: BackendId, layer: u32);
    fn blit_color(&mut self, dst: BackendId, src: BackendId, attachment: u32) -> Result<()>;

    // Per-pass state
    fn clear(&mut self, color: Option<Vec4>, depth: Option<f32>);
    fn depth_func(&mut self, func: wgpu::CompareFunction);
    fn set_render_state(&mut self, state: RenderState);

    // Programs and draw state
    fn create_program(
        &mut self,
        name: &str,
        vert: &str,
        frag: &str,
        geom: Option<&str>,
    ) -> Result<BackendId>;
    fn bind_program(&mut self, id: BackendId);
    fn bind_texture(&mut self, sampler: SamplerVar, id: BackendId);
    fn upload_block(&mut self, block: BlockKind, data: &[u8]);
    fn bind_vertex_buffer(
        &mut self,
        location: u32,
        buffer: BackendId,
        offset: u64,
        stride: u64,
        format: wgpu::VertexFormat,
    );
    fn bind_index_buffer(&mut self, buffer: BackendId, format: wgpu::IndexFormat);
    fn draw_indexed(&mut self, nr_indices: u32, nr_instances: u32);
}

/// Counters the headless backend accumulates; tests and CI read these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTrace {
    pub draw_calls: u64,
    pub blits: u64,
    pub clears: u64,
    pub block_uploads: u64,
    pub texture_uploads: u64,
}

#[derive(Debug, Clone, Copy)]
struct HeadlessTexture {
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

/// A backend that allocates ids and records traffic without a device.
///
/// Used by the test suite and by `--autopilot --exitafter` CI runs on
/// machines without a GPU. Enforces the texture-size maximum so resize
/// failure paths behave as they would on real hardware.
pub struct HeadlessBackend {
    caps: BackendCaps,
    next_id: BackendId,
    textures: FxHashMap<BackendId, HeadlessTexture>,
    buffers: FxHashMap<BackendId, usize>,
    framebuffers: FxHashMap<BackendId, u32>,
    programs: FxHashMap<BackendId, String>,
    pub trace: FrameTrace,
    /// When set, the next allocation fails; lets tests exercise rollback.
    pub fail_next_alloc: bool,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::with_caps(BackendCaps::default())
    }

    #[must_use]
    pub fn with_caps(caps: BackendCaps) -> Self {
        Self {
            caps,
            next_id: 1,
            textures: FxHashMap::default(),
            buffers: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            programs: FxHashMap::default(),
            trace: FrameTrace::default(),
            fail_next_alloc: false,
        }
    }

    fn alloc(&mut self) -> Result<BackendId> {
        if self.fail_next_alloc {
            self.fail_next_alloc = false;
            return Err(GlintError::NoMem("headless alloc failure injected"));
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn check_size(&self, width: u32, height: u32) -> Result<()> {
        let max = self.caps.max_texture_size;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GlintError::InvalidTextureSize { width, height });
        }
        Ok(())
    }

    pub fn reset_trace(&mut self) {
        self.trace = FrameTrace::default();
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn texture_format_supported(&self, _format: wgpu::TextureFormat) -> bool {
        true
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<BackendId> {
        self.check_size(desc.width, desc.height)?;
        let id = self.alloc()?;
        self.textures.insert(
            id,
            HeadlessTexture {
                width: desc.width,
                height: desc.height,
                format: desc.format,
            },
        );
        Ok(id)
    }

    fn upload_texture(
        &mut self,
        id: BackendId,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()> {
        self.check_size(width, height)?;
        let tex = self
            .textures
            .get_mut(&id)
            .ok_or(GlintError::TextureNotLoaded)?;
        let texel = tex
            .format
            .block_copy_size(None)
            .map_or(4, |size| size as usize);
        if data.len() < width as usize * height as usize * texel {
            return Err(GlintError::BufferIncomplete("texture upload"));
        }
        tex.width = width;
        tex.height = height;
        self.trace.texture_uploads += 1;
        Ok(())
    }

    fn resize_texture(&mut self, id: BackendId, width: u32, height: u32) -> Result<()> {
        self.check_size(width, height)?;
        let tex = self
            .textures
            .get_mut(&id)
            .ok_or(GlintError::TextureNotLoaded)?;
        tex.width = width;
        tex.height = height;
        Ok(())
    }

    fn destroy_texture(&mut self, id: BackendId) {
        assert!(self.textures.remove(&id).is_some(), "double texture free");
    }

    fn create_buffer(
        &mut self,
        _usage: wgpu::BufferUsages,
        data: Option<&[u8]>,
        size: usize,
    ) -> Result<BackendId> {
        let id = self.alloc()?;
        self.buffers.insert(id, data.map_or(size, <[u8]>::len));
        Ok(id)
    }

    fn upload_buffer(&mut self, id: BackendId, data: &[u8]) -> Result<()> {
        let size = self
            .buffers
            .get_mut(&id)
            .ok_or(GlintError::NotFound("buffer".into()))?;
        *size = data.len();
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BackendId) {
        assert!(self.buffers.remove(&id).is_some(), "double buffer free");
    }

    fn create_framebuffer(
        &mut self,
        color: &[BackendId],
        depth: Option<BackendId>,
        width: u32,
        height: u32,
        _layers: u32,
    ) -> Result<BackendId> {
        self.check_size(width, height)?;
        if color.is_empty() && depth.is_none() {
            return Err(GlintError::FramebufferIncomplete("no attachments"));
        }
        let id = self.alloc()?;
        self.framebuffers.insert(id, color.len() as u32);
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: BackendId) {
        assert!(
            self.framebuffers.remove(&id).is_some(),
            "double framebuffer free"
        );
    }

    fn bind_framebuffer(&mut self, _id: Option<BackendId>, _width: u32, _height: u32) {}

    fn framebuffer_layer(&mut self, _id: BackendId, _layer: u32) {}

    fn blit_color(&mut self, dst: BackendId, src: BackendId, _attachment: u32) -> Result<()> {
        if !self.framebuffers.contains_key(&dst) || !self.framebuffers.contains_key(&src) {
            return Err(GlintError::FramebufferIncomplete("blit endpoints"));
        }
        self.trace.blits += 1;
        Ok(())
    }

    fn clear(&mut self, _color: Option<Vec4>, _depth: Option<f32>) {
        self.trace.clears += 1;
    }

    fn depth_func(&mut self, _func: wgpu::CompareFunction) {}

    fn set_render_state(&mut self, _state: RenderState) {}

    fn create_program(
        &mut self,
        name: &str,
        vert: &str,
        frag: &str,
        _geom: Option<&str>,
    ) -> Result<BackendId> {
        if vert.is_empty() || frag.is_empty() {
            return Err(GlintError::InvalidShader(name.to_string()));
        }
        let id = self.alloc()?;
        self.programs.insert(id, name.to_string());
        Ok(id)
    }

    fn bind_program(&mut self, _id: BackendId) {}

    fn bind_texture(&mut self, _sampler: SamplerVar, _id: BackendId) {}

    fn upload_block(&mut self, _block: BlockKind, _data: &[u8]) {
        self.trace.block_uploads += 1;
    }

    fn bind_vertex_buffer(
        &mut self,
        _location: u32,
        _buffer: BackendId,
        _offset: u64,
        _stride: u64,
        _format: wgpu::VertexFormat,
    ) {
    }

    fn bind_index_buffer(&mut self, _buffer: BackendId, _format: wgpu::IndexFormat) {}

    fn draw_indexed(&mut self, _nr_indices: u32, _nr_instances: u32) {
        self.trace.draw_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_size_limit() {
        let mut backend = HeadlessBackend::with_caps(BackendCaps {
            max_texture_size: 256,
            ..BackendCaps::default()
        });
        let desc = TextureDesc {
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            width: 256,
            height: 256,
            layers: 1,
            samples: 1,
            min_filter: wgpu::FilterMode::Linear,
            mag_filter: wgpu::FilterMode::Linear,
            wrap: wgpu::AddressMode::ClampToEdge,
            border: None,
        };
        let id = backend.create_texture(&desc).unwrap();
        assert!(backend.resize_texture(id, 256, 256).is_ok());
        assert!(matches!(
            backend.resize_texture(id, 257, 256),
            Err(GlintError::InvalidTextureSize { .. })
        ));
    }

    #[test]
    fn test_injected_alloc_failure() {
        let mut backend = HeadlessBackend::new();
        backend.fail_next_alloc = true;
        assert!(backend
            .create_buffer(wgpu::BufferUsages::VERTEX, None, 16)
            .is_err());
        assert!(backend
            .create_buffer(wgpu::BufferUsages::VERTEX, None, 16)
            .is_ok());
    }
}
