//! Skeletal animation: channels, sampler interpolation and the per-entity
//! playback queue.

pub mod channel;
pub mod queue;

pub use channel::{
    channels_transform, joint_transforms, quat_interp, quat_slerp, vec3_interp, Animation,
    Channel, ChannelPath, JointPose,
};
pub use queue::{AnimationQueue, EndCallback, FrameCallback, QueuedAnimation};
