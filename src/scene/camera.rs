//! The follow camera.
//!
//! Orbits the controlled character at a pitch/yaw/distance, with a ray cast
//! toward the eye position so walls shorten the boom instead of occluding
//! the character. When the boom is fully collapsed the camera pitches up in
//! 5-degree steps, a bounded retry rather than an open loop.

use glam::Vec3;

use crate::scene::physics::PhysicsBridge;

#[derive(Debug, Clone)]
pub struct Camera {
    pub target_pitch: f32,
    pub target_yaw: f32,
    pub current_pitch: f32,
    pub current_yaw: f32,
    pub pitch_delta: f32,
    pub yaw_delta: f32,
    /// Boom length from the focus point to the eye.
    pub dist: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera {
    #[must_use]
    pub fn new() -> Self {
        Self {
            target_pitch: 0.0,
            target_yaw: 180.0,
            current_pitch: 0.0,
            current_yaw: 180.0,
            pitch_delta: 0.0,
            yaw_delta: 0.0,
            dist: 5.0,
        }
    }

    fn wrap_yaw(yaw: f32) -> f32 {
        if yaw > 180.0 {
            yaw - 360.0
        } else if yaw <= -180.0 {
            yaw + 360.0
        } else {
            yaw
        }
    }

    /// Integrates the input deltas into the target angles.
    pub fn move_target(&mut self, fps: f32) {
        self.target_pitch = (self.target_pitch + self.pitch_delta / fps).clamp(-90.0, 90.0);
        self.target_yaw = Self::wrap_yaw(self.target_yaw + self.yaw_delta / fps);
    }

    pub fn reset_movement(&mut self) {
        self.pitch_delta = 0.0;
        self.yaw_delta = 0.0;
    }

    pub fn add_pitch(&mut self, delta: f32) {
        self.pitch_delta = delta;
    }

    pub fn add_yaw(&mut self, delta: f32) {
        self.yaw_delta = delta;
    }

    pub fn set_target_to_current(&mut self) {
        self.target_pitch = self.current_pitch.clamp(-60.0, 60.0);
        self.target_yaw = self.current_yaw;
    }

    #[must_use]
    pub fn has_moved(&self) -> bool {
        self.pitch_delta != 0.0 || self.yaw_delta != 0.0
    }

    /// Unit vector from the focus point toward the eye.
    ///
    /// The horizontal component scales with `cos(pitch)` so the boom keeps
    /// its length as the camera levels out.
    #[must_use]
    pub fn eye_dir(&self) -> Vec3 {
        let pitch = self.current_pitch.to_radians();
        let yaw = (-self.current_yaw).to_radians();
        Vec3::new(
            yaw.sin() * pitch.cos(),
            pitch.sin(),
            yaw.cos() * pitch.cos(),
        )
    }

    /// Eye position orbiting `center` at the current boom length.
    #[must_use]
    pub fn position(&self, center: Vec3) -> Vec3 {
        center + self.eye_dir() * self.dist
    }

    /// Snaps the live angles to the targets and resolves the boom length
    /// against level geometry. `height` is the focus height above the
    /// character origin; `start` the focus point.
    pub fn update(&mut self, height: f32, start: Vec3, physics: Option<&dyn PhysicsBridge>) {
        self.current_pitch = self.target_pitch;
        self.current_yaw = self.target_yaw;

        let full_dist = height * 3.0;
        let maxdist = (self.dist + 1.0).max(full_dist);
        let start = start + Vec3::new(0.0, height, 0.0);

        let mut dist = full_dist;
        // At most 36 retries: +5 degrees each brings any pitch to 90
        for _ in 0..36 {
            let hit = physics.and_then(|p| p.ray_cast(start, self.eye_dir(), full_dist));
            match hit {
                None => {
                    dist = full_dist;
                    break;
                }
                Some(hit_dist) if hit_dist < 1.0 && self.current_pitch < 90.0 => {
                    self.current_pitch = (self.current_pitch + 5.0).min(90.0);
                }
                Some(hit_dist) => {
                    dist = hit_dist;
                    break;
                }
            }
        }

        self.dist = (dist - 0.1).clamp(1.0, maxdist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaw_wraps() {
        let mut cam = Camera::new();
        cam.target_yaw = 179.0;
        cam.add_yaw(120.0);
        cam.move_target(60.0);
        assert!(cam.target_yaw <= 180.0);

        cam.target_yaw = -179.5;
        cam.add_yaw(-120.0);
        cam.move_target(60.0);
        assert!(cam.target_yaw > -180.0);
    }

    #[test]
    fn test_boom_keeps_length_when_leveling() {
        let mut cam = Camera::new();
        cam.dist = 6.0;

        cam.current_pitch = 0.0;
        let level = cam.position(Vec3::ZERO);
        cam.current_pitch = 45.0;
        let pitched = cam.position(Vec3::ZERO);

        // cos(pitch) on the horizontal part keeps the orbit radius constant
        assert!((level.length() - 6.0).abs() < 1e-4);
        assert!((pitched.length() - 6.0).abs() < 1e-4);
        assert!(level.y.abs() < 1e-4);
        assert!(pitched.y > 0.0);
    }

    #[test]
    fn test_update_without_physics_restores_boom() {
        let mut cam = Camera::new();
        cam.target_pitch = 20.0;
        cam.update(2.0, Vec3::ZERO, None);
        assert_eq!(cam.current_pitch, 20.0);
        assert!((cam.dist - (6.0 - 0.1)).abs() < 1e-5);
    }
}
