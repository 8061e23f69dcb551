//! The render pipeline and the device boundary it drives.

pub mod backend;
pub mod builder;
pub mod draw;
pub mod options;
pub mod pass;
pub mod pipeline;

pub use backend::{BackendCaps, BackendId, HeadlessBackend, RenderBackend, RenderState};
pub use builder::{build_default_pipeline, PipelineBuilderOpts, CHECKPOINT_BLURRED, CHECKPOINT_COMBINED};
pub use draw::{draw_mq, DrawParams, RenderStats};
pub use options::RenderOptions;
pub use pass::{PassConfig, PassId, PassOps, RenderMethod, RenderPass, RenderSource, SourceKind};
pub use pipeline::{FrameInputs, Pipeline, PipelineOptions};
