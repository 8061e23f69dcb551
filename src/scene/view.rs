//! Views, frusta and shadow cascades.
//!
//! A [`View`] is a main subview plus one subview per shadow cascade. The
//! camera view partitions its frustum along view-Z at fixed dividers; a
//! light view is fitted around the camera subviews' world-space frustum
//! corners. Frustum planes and corners go stale on any pose change and are
//! only valid after `calc_frustum`; callers recompute before culling or
//! light fitting.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use crate::resources::mesh::Aabb;
pub use crate::resources::uniforms::CASCADES_MAX;

/// Fixed cascade dividers; the last cascade ends at the main far plane.
const DIVIDERS: [f32; CASCADES_MAX - 1] = [25.0, 70.0, 150.0];

/// NDC cube corners, near face first.
const NDC_CORNERS: [Vec4; 8] = [
    Vec4::new(-1.0, -1.0, -1.0, 1.0),
    Vec4::new(1.0, -1.0, -1.0, 1.0),
    Vec4::new(1.0, 1.0, -1.0, 1.0),
    Vec4::new(-1.0, 1.0, -1.0, 1.0),
    Vec4::new(-1.0, -1.0, 1.0, 1.0),
    Vec4::new(1.0, -1.0, 1.0, 1.0),
    Vec4::new(1.0, 1.0, 1.0, 1.0),
    Vec4::new(-1.0, 1.0, 1.0, 1.0),
];

#[derive(Debug, Clone)]
pub struct Subview {
    pub view_mx: Mat4,
    pub inv_view_mx: Mat4,
    pub proj_mx: Mat4,
    pub frustum_planes: [Vec4; 6],
    pub frustum_corners: [Vec3; 8],
    pub near_plane: f32,
    pub far_plane: f32,
}

impl Default for Subview {
    fn default() -> Self {
        Self {
            view_mx: Mat4::IDENTITY,
            inv_view_mx: Mat4::IDENTITY,
            proj_mx: Mat4::IDENTITY,
            frustum_planes: [Vec4::ZERO; 6],
            frustum_corners: [Vec3::ZERO; 8],
            near_plane: 0.1,
            far_plane: 100.0,
        }
    }
}

impl Subview {
    /// Builds the view matrix from a pose: rotate X, then Y, then Z, then
    /// translate by `-eye`. Angles in degrees.
    pub fn update_from_angles(&mut self, eye: Vec3, pitch: f32, yaw: f32, roll: f32) {
        self.view_mx = Mat4::from_rotation_x(pitch.to_radians())
            * Mat4::from_rotation_y(yaw.to_radians())
            * Mat4::from_rotation_z(roll.to_radians())
            * Mat4::from_translation(-eye);
        self.inv_view_mx = self.view_mx.inverse();
    }

    /// Points this subview along `target` from the centroid of `src`'s
    /// frustum corners (light views).
    pub fn update_from_target(&mut self, src: &Subview, target: Vec3) {
        let mut center = Vec3::ZERO;
        for corner in &src.frustum_corners {
            center += *corner;
        }
        center /= 8.0;

        let dir = target.try_normalize().unwrap_or(Vec3::Z);
        let eye = center - dir;
        let up = if dir.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::X
        } else {
            Vec3::Y
        };
        self.view_mx = Mat4::look_at_rh(eye, center, up);
        self.inv_view_mx = self.view_mx.inverse();
    }

    /// Extracts frustum planes (Gribb-Hartmann, inward-facing) and corners
    /// (NDC cube through the inverse of proj * view).
    pub fn calc_frustum(&mut self) {
        let mvp = self.proj_mx * self.view_mx;
        let rows = [mvp.row(0), mvp.row(1), mvp.row(2), mvp.row(3)];

        self.frustum_planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[3] + rows[2],
            rows[3] - rows[2],
        ];

        let inv_mvp = mvp.inverse();
        for (corner, ndc) in self.frustum_corners.iter_mut().zip(NDC_CORNERS) {
            let q = inv_mvp * ndc;
            *corner = q.xyz() / q.w;
        }
    }

    /// Fits an orthographic projection around `src`'s frustum corners in
    /// this subview's (light) space: snap the eye to the corner centroid,
    /// box the corners, pad, then build the ortho with an optional near
    /// back-off and optional reverse-Z.
    fn projection_update(&mut self, src: &Subview, fit: &LightFit) {
        // First pass: corner box in the provisional light space, padded
        let mut padded = Aabb::EMPTY;
        for corner in &src.frustum_corners {
            let p = self.view_mx.transform_point3(*corner);
            padded.extend(p);
        }
        padded.min -= Vec3::new(fit.aabb_margin_xy, fit.aabb_margin_xy, fit.aabb_margin_z);
        padded.max += Vec3::new(fit.aabb_margin_xy, fit.aabb_margin_xy, fit.aabb_margin_z);

        // Snap the light eye to the box center
        let center = padded.center();
        self.view_mx *= Mat4::from_translation(center);
        self.inv_view_mx = self.view_mx.inverse();

        // Second pass: tight box around the corners in the snapped space
        let mut aabb = Aabb::EMPTY;
        for corner in &src.frustum_corners {
            aabb.extend(self.view_mx.transform_point3(*corner));
        }

        let near = aabb.min.z * fit.near_factor - fit.near_backup;
        let far = (aabb.max.z * fit.far_factor).max(0.0);
        self.proj_mx = if fit.z_reverse {
            Mat4::orthographic_rh_gl(aabb.min.x, aabb.max.x, aabb.min.y, aabb.max.y, far, near)
        } else {
            Mat4::orthographic_rh_gl(aabb.min.x, aabb.max.x, aabb.min.y, aabb.max.y, near, far)
        };

        self.calc_frustum();
    }
}

/// Knobs for the light-space fit.
#[derive(Debug, Clone, Copy)]
pub struct LightFit {
    /// Padding of the corner box in light-space XY.
    pub aabb_margin_xy: f32,
    /// Padding of the corner box in light-space Z.
    pub aabb_margin_z: f32,
    pub near_factor: f32,
    pub far_factor: f32,
    /// Extra distance behind the near plane for out-of-frustum casters.
    pub near_backup: f32,
    pub z_reverse: bool,
}

impl Default for LightFit {
    fn default() -> Self {
        Self {
            aabb_margin_xy: 0.0,
            aabb_margin_z: 0.0,
            near_factor: 1.0,
            far_factor: 1.0,
            near_backup: 0.0,
            z_reverse: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct View {
    pub main: Subview,
    pub subview: [Subview; CASCADES_MAX],
    pub divider: [f32; CASCADES_MAX],
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
    /// Set when the projection needs a rebuild on the next resize.
    pub proj_update: bool,
}

impl View {
    #[must_use]
    pub fn new(fov: f32, near_plane: f32, far_plane: f32) -> Self {
        let main = Subview {
            near_plane,
            far_plane,
            ..Subview::default()
        };
        Self {
            subview: std::array::from_fn(|_| main.clone()),
            main,
            divider: [0.0; CASCADES_MAX],
            fov,
            aspect: 1.0,
            proj_update: true,
        }
    }

    /// Updates the camera pose and rebuilds every cascade subview.
    pub fn update_from_angles(&mut self, eye: Vec3, pitch: f32, yaw: f32, roll: f32) {
        self.main.update_from_angles(eye, pitch, yaw, roll);
        self.update_perspective_subviews();
    }

    /// Partitions the frustum at the fixed dividers and recomputes each
    /// cascade's projection and frustum.
    pub fn update_perspective_subviews(&mut self) {
        self.subview[0].near_plane = self.main.near_plane;
        for i in 0..CASCADES_MAX - 1 {
            self.divider[i] = DIVIDERS[i];
            self.subview[i].far_plane = self.divider[i];
            self.subview[i + 1].near_plane = self.divider[i];
        }
        self.divider[CASCADES_MAX - 1] = self.main.far_plane;
        self.subview[CASCADES_MAX - 1].far_plane = self.main.far_plane;

        for subview in &mut self.subview {
            subview.view_mx = self.main.view_mx;
            subview.inv_view_mx = self.main.inv_view_mx;
            subview.proj_mx = Mat4::perspective_rh_gl(
                self.fov,
                self.aspect,
                subview.near_plane,
                subview.far_plane,
            );
            subview.calc_frustum();
        }
    }

    /// Rebuilds the main perspective projection if it was invalidated.
    ///
    /// The subviews keep the unzoomed fov on purpose: they only feed the
    /// light frusta, and shadows should not change with camera zoom.
    pub fn update_perspective_projection(&mut self, width: u32, height: u32, zoom: f32) {
        if !self.proj_update {
            return;
        }
        self.proj_update = false;
        self.aspect = width as f32 / height as f32;
        self.main.proj_mx = Mat4::perspective_rh_gl(
            self.fov * zoom,
            self.aspect,
            self.main.near_plane,
            self.main.far_plane,
        );
    }

    /// Recomputes the main subview's frustum planes and corners.
    pub fn calc_frustum(&mut self) {
        self.main.calc_frustum();
    }

    /// Fits this view (a light view) around `src`'s cascades for light
    /// direction `dir`.
    pub fn update_from_frustum(&mut self, src: &View, dir: Vec3, fit: &LightFit) {
        let target = -dir;

        for (subview, src_subview) in self.subview.iter_mut().zip(&src.subview) {
            subview.update_from_target(src_subview, target);
        }
        self.main.update_from_target(&src.main, target);

        for (subview, src_subview) in self.subview.iter_mut().zip(&src.subview) {
            subview.projection_update(src_subview, fit);
        }

        self.calc_frustum();
    }

    /// Tests a world-space box against the main frustum.
    #[must_use]
    pub fn aabb_in_frustum(&self, aabb: &Aabb) -> bool {
        self.main.aabb_in_frustum(aabb)
    }
}

impl Subview {
    /// Tests a world-space box against this subview's frustum. Rejects only
    /// when all 8 corners lie outside one plane; additionally rejects when
    /// the view's corners all sit past a single face of the box.
    #[must_use]
    pub fn aabb_in_frustum(&self, aabb: &Aabb) -> bool {
        let corners = aabb.corners();

        for plane in &self.frustum_planes {
            let outside = corners
                .iter()
                .filter(|c| plane.dot(c.extend(1.0)) < 0.0)
                .count();
            if outside == 8 {
                return false;
            }
        }

        for axis in 0..3 {
            if self.frustum_corners.iter().all(|c| c[axis] > aabb.max[axis]) {
                return false;
            }
            if self.frustum_corners.iter().all(|c| c[axis] < aabb.min[axis]) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_view() -> View {
        let mut view = View::new(70f32.to_radians(), 0.1, 500.0);
        view.update_perspective_projection(1600, 900, 1.0);
        view.update_from_angles(Vec3::new(0.0, 0.0, 5.0), 0.0, 0.0, 0.0);
        view.calc_frustum();
        view
    }

    #[test]
    fn test_cascade_partition() {
        let view = camera_view();
        assert_eq!(view.divider, [25.0, 70.0, 150.0, 500.0]);
        assert_eq!(view.subview[0].near_plane, 0.1);
        assert_eq!(view.subview[1].near_plane, 25.0);
        assert_eq!(view.subview[3].far_plane, 500.0);
    }

    #[test]
    fn test_frustum_planes_face_inward() {
        let view = camera_view();
        // The view origin (the eye) is on the positive side of every plane
        let eye = Vec3::new(0.0, 0.0, 5.0).extend(1.0);
        for plane in &view.main.frustum_planes {
            assert!(plane.dot(eye) > 0.0, "plane {plane:?} excludes the eye");
        }
    }

    #[test]
    fn test_frustum_corners_round_trip() {
        let view = camera_view();
        // Corners projected back through proj * view land on the NDC cube
        let mvp = view.main.proj_mx * view.main.view_mx;
        for (corner, ndc) in view.main.frustum_corners.iter().zip(NDC_CORNERS) {
            let q = mvp * corner.extend(1.0);
            let q = q / q.w;
            assert!((q.x - ndc.x).abs() < 1e-3);
            assert!((q.y - ndc.y).abs() < 1e-3);
            assert!((q.z - ndc.z).abs() < 1e-3);
        }
    }

    #[test]
    fn test_cube_inside_and_outside_frustum() {
        let view = camera_view();
        let cube = Aabb {
            min: Vec3::splat(-0.5),
            max: Vec3::splat(0.5),
        };
        assert!(view.aabb_in_frustum(&cube));

        let far_away = Aabb {
            min: Vec3::new(999.5, -0.5, -0.5),
            max: Vec3::new(1000.5, 0.5, 0.5),
        };
        assert!(!view.aabb_in_frustum(&far_away));
    }

    #[test]
    fn test_light_fit_covers_cascade() {
        let camera = camera_view();
        let mut light = View::new(camera.fov, camera.main.near_plane, camera.main.far_plane);
        light.aspect = camera.aspect;

        let dir = Vec3::new(-0.5, -1.0, -0.3).normalize();
        light.update_from_frustum(&camera, dir, &LightFit::default());

        // Every camera cascade corner lands inside the light ortho volume
        for cascade in 0..CASCADES_MAX {
            let light_sv = &light.subview[cascade];
            let mvp = light_sv.proj_mx * light_sv.view_mx;
            for corner in &camera.subview[cascade].frustum_corners {
                let q = mvp * corner.extend(1.0);
                let q = q / q.w;
                assert!(q.x > -1.001 && q.x < 1.001, "x out of ortho: {q:?}");
                assert!(q.y > -1.001 && q.y < 1.001, "y out of ortho: {q:?}");
            }
        }
    }
}
