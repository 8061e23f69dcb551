//! Keyframe channels and joint-transform evaluation.
//!
//! A channel is a per-joint, per-path timeline: a strictly monotonic time
//! array and a tightly packed value array (vec3 for translation/scale, quat
//! for rotation). Lookup caches the last keyframe index per (entity, path)
//! in [`JointPose::cursor`] so steady playback never rescans the array.

use glam::{Mat4, Quat, Vec3};

use crate::errors::{GlintError, Result};
use crate::resources::model::Skin;

/// Which joint property a channel animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPath {
    Translation = 0,
    Rotation = 1,
    Scale = 2,
}

impl ChannelPath {
    /// Floats per keyframe on this path.
    #[must_use]
    pub fn stride(self) -> usize {
        match self {
            ChannelPath::Translation | ChannelPath::Scale => 3,
            ChannelPath::Rotation => 4,
        }
    }
}

/// Linear interpolation between two vectors.
#[must_use]
pub fn vec3_interp(a: Vec3, b: Vec3, fac: f32) -> Vec3 {
    a + (b - a) * fac
}

/// Normalized linear quaternion blend with the shorter-arc correction.
#[must_use]
pub fn quat_interp(a: Quat, b: Quat, fac: f32) -> Quat {
    let rfac = 1.0 - fac;
    let b = if a.dot(b) < 0.0 { -b } else { b };
    Quat::from_xyzw(
        rfac * a.x + fac * b.x,
        rfac * a.y + fac * b.y,
        rfac * a.z + fac * b.z,
        rfac * a.w + fac * b.w,
    )
    .normalize()
}

/// Spherical linear interpolation with the shorter-arc flip and the linear
/// fallback for nearly parallel rotations.
#[must_use]
pub fn quat_slerp(a: Quat, b: Quat, fac: f32) -> Quat {
    let mut dot = a.dot(b);
    let b = if dot < 0.0 {
        dot = -dot;
        -b
    } else {
        b
    };

    if dot > 0.9995 {
        return quat_interp(a, b, fac);
    }

    let theta_0 = dot.clamp(-1.0, 1.0).acos();
    let theta = fac * theta_0;
    let sin_theta_0 = theta_0.sin();
    let rfac = theta.cos() - dot * theta.sin() / sin_theta_0;
    let fac = theta.sin() / sin_theta_0;

    Quat::from_xyzw(
        rfac * a.x + fac * b.x,
        rfac * a.y + fac * b.y,
        rfac * a.z + fac * b.z,
        rfac * a.w + fac * b.w,
    )
}

/// One keyframe timeline targeting a joint property.
#[derive(Debug, Clone)]
pub struct Channel {
    pub path: ChannelPath,
    pub target: usize,
    times: Vec<f32>,
    data: Vec<f32>,
}

impl Channel {
    pub fn new(path: ChannelPath, target: usize, times: Vec<f32>, data: Vec<f32>) -> Result<Self> {
        if times.is_empty() {
            return Err(GlintError::InvalidArguments("empty channel"));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(GlintError::InvalidArguments("channel times not monotonic"));
        }
        if data.len() != times.len() * path.stride() {
            return Err(GlintError::InvalidArguments("channel data length"));
        }
        Ok(Self {
            path,
            target,
            times,
            data,
        })
    }

    #[must_use]
    pub fn nr_frames(&self) -> usize {
        self.times.len()
    }

    /// Timestamp of the last keyframe.
    #[must_use]
    pub fn end_time(&self) -> f32 {
        *self.times.last().expect("channel is never empty")
    }

    /// Finds the keyframes bracketing `time`, scanning forward from the
    /// cached `start` index. Out-of-range times wrap to the (last, first)
    /// pair so looping playback interpolates across the seam.
    fn time_to_idx(&self, time: f32, start: usize) -> (usize, usize) {
        let nr = self.times.len();
        let tail = (nr - 1, 0);

        if time < self.times[0] {
            return tail;
        }
        let start = if time < self.times[start.min(nr - 1)] {
            0
        } else {
            start.min(nr - 1)
        };

        let mut i = start;
        while i < nr && time > self.times[i] {
            i += 1;
        }
        if i == nr {
            return tail;
        }

        let prev = i.saturating_sub(1);
        let next = (prev + 1).min(nr - 1);
        (prev, next)
    }

    fn value(&self, frame: usize) -> &[f32] {
        let stride = self.path.stride();
        &self.data[frame * stride..(frame + 1) * stride]
    }

    /// Writes this channel's value at `time` into the target joint pose,
    /// updating the pose's cursor for the next lookup.
    pub fn transform(&self, joint: &mut JointPose, time: f32) {
        let (prev, next) = self.time_to_idx(time, joint.cursor[self.path as usize]);
        joint.cursor[self.path as usize] = prev.min(next);

        let p_time = self.times[prev];
        let n_time = self.times[next];
        let fac = if p_time > n_time {
            // Wrapped pair: snap to whichever end time is on
            if time < n_time { 1.0 } else { 0.0 }
        } else if p_time < n_time {
            ((time - p_time) / (n_time - p_time)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let p = self.value(prev);
        let n = self.value(next);
        match self.path {
            ChannelPath::Translation => {
                joint.translation =
                    vec3_interp(Vec3::from_slice(p), Vec3::from_slice(n), fac);
            }
            ChannelPath::Scale => {
                joint.scale = vec3_interp(Vec3::from_slice(p), Vec3::from_slice(n), fac);
            }
            ChannelPath::Rotation => {
                joint.rotation = quat_slerp(
                    Quat::from_xyzw(p[0], p[1], p[2], p[3]),
                    Quat::from_xyzw(n[0], n[1], n[2], n[3]),
                    fac,
                );
            }
        }
    }
}

/// A named, model-level animation.
#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub name: String,
    channels: Vec<Channel>,
    time_end: f32,
}

impl Animation {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            channels: Vec::new(),
            time_end: 0.0,
        }
    }

    pub fn add_channel(&mut self, channel: Channel) {
        self.time_end = self.time_end.max(channel.end_time());
        self.channels.push(channel);
    }

    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    #[must_use]
    pub fn nr_channels(&self) -> usize {
        self.channels.len()
    }

    /// End of the animation: the latest keyframe across all channels.
    #[must_use]
    pub fn time_end(&self) -> f32 {
        self.time_end
    }

    /// Drops channels whose target joint does not exist. Returns the number
    /// of channels that remain.
    pub fn prune_invalid_channels(&mut self, nr_joints: usize) -> usize {
        let before = self.channels.len();
        self.channels.retain(|ch| ch.target < nr_joints);
        if self.channels.len() != before {
            log::warn!(
                "animation '{}': dropped {} channels with missing joints",
                self.name,
                before - self.channels.len()
            );
        }
        self.channels.len()
    }
}

/// Per-entity animated state of one joint.
#[derive(Debug, Clone)]
pub struct JointPose {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub global: Mat4,
    /// Cached keyframe index per channel path.
    pub cursor: [usize; 3],
}

impl Default for JointPose {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            global: Mat4::IDENTITY,
            cursor: [0; 3],
        }
    }
}

impl JointPose {
    /// Resets the cursors; called when a new animation starts on the entity.
    pub fn rewind(&mut self) {
        self.cursor = [0; 3];
    }
}

/// Applies every channel of `animation` at `time` to the joint poses.
/// Channels referencing nonexistent joints are skipped.
pub fn channels_transform(joints: &mut [JointPose], animation: &Animation, time: f32) {
    for channel in animation.channels() {
        let Some(joint) = joints.get_mut(channel.target) else {
            continue;
        };
        channel.transform(joint, time);
    }
}

/// Computes the skinning matrices: depth-first from the root joint,
/// `global = parent_global * T * R * S`, then `out = global * inverse_bind`.
pub fn joint_transforms(joints: &mut [JointPose], skin: &Skin, out: &mut [Mat4]) {
    fn recurse(joints: &mut [JointPose], skin: &Skin, out: &mut [Mat4], joint: usize, parent: Option<usize>) {
        let parent_global = match parent {
            Some(p) => joints[p].global,
            None => skin.root_pose,
        };

        let pose = &mut joints[joint];
        let local = Mat4::from_scale_rotation_translation(
            pose.scale,
            pose.rotation,
            pose.translation,
        );
        pose.global = parent_global * local;
        out[joint] = pose.global * skin.joints[joint].inverse_bind;

        let children = skin.joints[joint].children.clone();
        for child in children {
            recurse(joints, skin, out, child, Some(joint));
        }
    }

    if skin.joints.is_empty() {
        return;
    }
    recurse(joints, skin, out, skin.root_joint, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quat_close(a: Quat, b: Quat) -> bool {
        (a.dot(b).abs() - 1.0).abs() < 1e-4
    }

    #[test]
    fn test_slerp_endpoints() {
        let a = Quat::from_rotation_y(0.3);
        let b = Quat::from_rotation_y(2.1);
        assert!(quat_close(quat_slerp(a, b, 0.0), a));
        assert!(quat_close(quat_slerp(a, b, 1.0), b));
    }

    #[test]
    fn test_slerp_takes_shorter_arc() {
        let a = Quat::from_rotation_y(0.1);
        let b = -Quat::from_rotation_y(0.4);
        // dot(a, b) < 0: the negated target must be used
        assert!(a.dot(b) < 0.0);
        let mid = quat_slerp(a, b, 0.5);
        assert!(quat_close(mid, Quat::from_rotation_y(0.25)));
    }

    #[test]
    fn test_slerp_small_angle_fallback() {
        let a = Quat::from_rotation_y(0.001);
        let b = Quat::from_rotation_y(0.002);
        let mid = quat_slerp(a, b, 0.5);
        assert!((mid.length() - 1.0).abs() < 1e-5);
        assert!(quat_close(mid, Quat::from_rotation_y(0.0015)));
    }

    #[test]
    fn test_channel_validation() {
        assert!(Channel::new(ChannelPath::Translation, 0, vec![], vec![]).is_err());
        assert!(Channel::new(
            ChannelPath::Translation,
            0,
            vec![0.0, 0.0],
            vec![0.0; 6]
        )
        .is_err());
        assert!(Channel::new(
            ChannelPath::Rotation,
            0,
            vec![0.0, 1.0],
            vec![0.0; 6]
        )
        .is_err());
        assert!(Channel::new(
            ChannelPath::Translation,
            0,
            vec![0.0, 1.0],
            vec![0.0; 6]
        )
        .is_ok());
    }

    #[test]
    fn test_channel_interpolates_translation() {
        let channel = Channel::new(
            ChannelPath::Translation,
            0,
            vec![0.0, 1.0],
            vec![0.0, 0.0, 0.0, 2.0, 4.0, 6.0],
        )
        .unwrap();
        let mut joint = JointPose::default();

        channel.transform(&mut joint, 0.5);
        assert_eq!(joint.translation, Vec3::new(1.0, 2.0, 3.0));

        // Cursor moved to the bracketing frame
        assert_eq!(joint.cursor[ChannelPath::Translation as usize], 0);

        channel.transform(&mut joint, 1.0);
        assert_eq!(joint.translation, Vec3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_animation_time_end_tracks_channels() {
        let mut animation = Animation::new("walk");
        animation.add_channel(
            Channel::new(ChannelPath::Translation, 0, vec![0.0, 0.5], vec![0.0; 6]).unwrap(),
        );
        animation.add_channel(
            Channel::new(ChannelPath::Rotation, 1, vec![0.0, 1.25], vec![0.0; 8]).unwrap(),
        );
        assert_eq!(animation.time_end(), 1.25);
    }

    #[test]
    fn test_bad_joint_channels_are_pruned() {
        let mut animation = Animation::new("broken");
        animation.add_channel(
            Channel::new(ChannelPath::Translation, 0, vec![0.0, 1.0], vec![0.0; 6]).unwrap(),
        );
        animation.add_channel(
            Channel::new(ChannelPath::Translation, 7, vec![0.0, 1.0], vec![0.0; 6]).unwrap(),
        );
        assert_eq!(animation.prune_invalid_channels(2), 1);
        assert_eq!(animation.nr_channels(), 1);
    }
}
