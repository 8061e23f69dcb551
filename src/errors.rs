//! Engine error types.
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, GlintError>`. Constructors validate their options
//! and fail with [`GlintError::InvalidArguments`]; recoverable per-entry
//! failures (a single bad texture in an asset, an animation channel pointing
//! at a missing joint) are logged at warning severity by the caller and the
//! surrounding operation continues.

use thiserror::Error;

/// The main error type for the engine core.
#[derive(Error, Debug)]
pub enum GlintError {
    /// Allocation failed or a backend resource could not be created.
    #[error("out of memory: {0}")]
    NoMem(&'static str),

    /// An options struct failed validation.
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),

    /// The operation is not available on this backend or data.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A texture dimension exceeds the device maximum, or is zero.
    #[error("invalid texture size {width}x{height}")]
    InvalidTextureSize { width: u32, height: u32 },

    /// A texture was used before its storage was allocated.
    #[error("texture not loaded")]
    TextureNotLoaded,

    /// A framebuffer is missing attachments or failed completeness checks.
    #[error("framebuffer incomplete: {0}")]
    FramebufferIncomplete(&'static str),

    /// Shader source failed to compile or link.
    #[error("invalid shader '{0}'")]
    InvalidShader(String),

    /// A program was bound or queried before it was loaded.
    #[error("shader not loaded: {0}")]
    ShaderNotLoaded(String),

    /// A container, JSON document or chunk failed to parse.
    #[error("parse failed: {0}")]
    ParseFailed(String),

    /// A binary payload does not match its declared format.
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),

    /// A read past the end of a buffer or chunk.
    #[error("buffer overrun: {0}")]
    BufferOverrun(&'static str),

    /// A buffer is smaller than its declared contents.
    #[error("buffer incomplete: {0}")]
    BufferIncomplete(&'static str),

    /// A named object (program, animation, asset entry) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The host denied access to a path or resource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Double initialization of a one-shot resource.
    #[error("already loaded: {0}")]
    AlreadyLoaded(&'static str),

    /// A color-grading LUT was referenced before being loaded.
    #[error("LUT not loaded")]
    LutNotLoaded,

    /// A subsystem failed to come up.
    #[error("initialization failed: {0}")]
    InitializationFailed(&'static str),

    /// A fixed-capacity table is full.
    #[error("too large: {0}")]
    TooLarge(&'static str),
}

impl From<serde_json::Error> for GlintError {
    fn from(err: serde_json::Error) -> Self {
        GlintError::ParseFailed(err.to_string())
    }
}

impl From<base64::DecodeError> for GlintError {
    fn from(err: base64::DecodeError) -> Self {
        GlintError::ParseFailed(err.to_string())
    }
}

impl From<image::ImageError> for GlintError {
    fn from(_err: image::ImageError) -> Self {
        GlintError::InvalidFormat("image decode failed")
    }
}

impl From<std::io::Error> for GlintError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => GlintError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => GlintError::PermissionDenied(err.to_string()),
            _ => GlintError::ParseFailed(err.to_string()),
        }
    }
}

/// Alias for `Result<T, GlintError>`.
pub type Result<T> = std::result::Result<T, GlintError>;
