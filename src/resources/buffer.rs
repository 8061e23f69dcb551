//! Vertex and index buffer wrappers.
//!
//! A buffer either owns its backend storage or is an interleaved view into a
//! "main" buffer (sharing the backend id at an offset/stride). Only the
//! owning buffer releases the id.

use crate::errors::{GlintError, Result};
use crate::renderer::backend::{BackendId, RenderBackend};

/// What the buffer feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Vertex attribute source.
    Array,
    /// Index source.
    ElementArray,
}

/// Upload frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

/// Options for [`Buffer::init`].
pub struct BufferOptions<'a> {
    pub role: BufferRole,
    pub usage: BufferUsage,
    /// Element format for `Array` buffers; ignored for index buffers.
    pub format: wgpu::VertexFormat,
    /// Initial contents; uploaded by `init` when present.
    pub data: Option<&'a [u8]>,
    /// Byte offset into the backing buffer (interleaved views).
    pub offset: u64,
    /// Byte stride between elements; 0 means tightly packed.
    pub stride: u64,
    /// The backing buffer for interleaved views.
    pub main: Option<&'a Buffer>,
}

impl Default for BufferOptions<'_> {
    fn default() -> Self {
        Self {
            role: BufferRole::Array,
            usage: BufferUsage::Static,
            format: wgpu::VertexFormat::Float32x3,
            data: None,
            offset: 0,
            stride: 0,
            main: None,
        }
    }
}

#[derive(Debug)]
pub struct Buffer {
    role: BufferRole,
    usage: BufferUsage,
    format: wgpu::VertexFormat,
    offset: u64,
    stride: u64,
    size: usize,
    id: Option<BackendId>,
    owns_id: bool,
}

impl Buffer {
    pub fn init(backend: &mut dyn RenderBackend, opts: &BufferOptions<'_>) -> Result<Self> {
        if let Some(main) = opts.main {
            // Interleaved view: share the main buffer's storage
            if opts.data.is_some() {
                return Err(GlintError::InvalidArguments("view buffer with own data"));
            }
            let id = main.id.ok_or(GlintError::BufferIncomplete("main buffer not loaded"))?;
            return Ok(Self {
                role: opts.role,
                usage: opts.usage,
                format: opts.format,
                offset: opts.offset,
                stride: opts.stride,
                size: main.size,
                id: Some(id),
                owns_id: false,
            });
        }

        let data = opts
            .data
            .ok_or(GlintError::InvalidArguments("buffer without data or main"))?;
        let mut usages = match opts.role {
            BufferRole::Array => wgpu::BufferUsages::VERTEX,
            BufferRole::ElementArray => wgpu::BufferUsages::INDEX,
        };
        if opts.usage == BufferUsage::Dynamic {
            usages |= wgpu::BufferUsages::COPY_DST;
        }
        let id = backend.create_buffer(usages, Some(data), data.len())?;
        Ok(Self {
            role: opts.role,
            usage: opts.usage,
            format: opts.format,
            offset: opts.offset,
            stride: opts.stride,
            size: data.len(),
            id: Some(id),
            owns_id: true,
        })
    }

    /// Makes this buffer the attribute source at `location`.
    pub fn bind(&self, backend: &mut dyn RenderBackend, location: u32) -> Result<()> {
        let id = self.id.ok_or(GlintError::BufferIncomplete("bind of unloaded buffer"))?;
        backend.bind_vertex_buffer(location, id, self.offset, self.stride, self.format);
        Ok(())
    }

    /// Makes this buffer the current index source.
    pub fn bind_index(&self, backend: &mut dyn RenderBackend, format: wgpu::IndexFormat) -> Result<()> {
        if self.role != BufferRole::ElementArray {
            return Err(GlintError::InvalidArguments("index bind of array buffer"));
        }
        let id = self.id.ok_or(GlintError::BufferIncomplete("bind of unloaded buffer"))?;
        backend.bind_index_buffer(id, format);
        Ok(())
    }

    /// Replaces the contents; the usual path for `Dynamic` buffers.
    pub fn upload(&mut self, backend: &mut dyn RenderBackend, data: &[u8]) -> Result<()> {
        let id = self.id.ok_or(GlintError::BufferIncomplete("upload to unloaded buffer"))?;
        if self.usage == BufferUsage::Static {
            log::warn!("re-uploading a static buffer");
        }
        backend.upload_buffer(id, data)?;
        self.size = data.len();
        Ok(())
    }

    pub fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(id) = self.id.take() {
            if self.owns_id {
                backend.destroy_buffer(id);
            }
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn role(&self) -> BufferRole {
        self.role
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    #[test]
    fn test_init_requires_data_or_main() {
        let mut backend = HeadlessBackend::new();
        assert!(Buffer::init(&mut backend, &BufferOptions::default()).is_err());
    }

    #[test]
    fn test_interleaved_view_shares_storage() {
        let mut backend = HeadlessBackend::new();
        let data = [0u8; 96];
        let mut main = Buffer::init(
            &mut backend,
            &BufferOptions {
                data: Some(&data),
                stride: 32,
                ..BufferOptions::default()
            },
        )
        .unwrap();

        let mut view = Buffer::init(
            &mut backend,
            &BufferOptions {
                format: wgpu::VertexFormat::Float32x2,
                offset: 12,
                stride: 32,
                main: Some(&main),
                ..BufferOptions::default()
            },
        )
        .unwrap();

        // The view never frees the shared id
        view.deinit(&mut backend);
        main.deinit(&mut backend);
    }
}
