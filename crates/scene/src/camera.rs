//! Left-handed perspective camera.
//!
//! The camera owns placement and lens parameters only. The projection matrix
//! is built by the renderer, whose depth convention decides whether near
//! maps to 0 or to 1.

use glam::{Mat4, Quat, Vec3};

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Camera orientation; identity looks down +Z
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, -5.0),
            rotation: Quat::IDENTITY,
            fov_y: 60.0_f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lens.
    pub fn set_lens(&mut self, fov_y: f32, near: f32, far: f32) {
        self.fov_y = fov_y;
        self.near = near;
        self.far = far;
    }

    /// World-to-view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_lh(self.position, self.forward(), self.up())
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Turns the camera toward `target`, keeping world +Y up.
    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return;
        }
        let yaw = forward.x.atan2(forward.z);
        let pitch = -forward.y.asin();
        self.rotation = Quat::from_rotation_y(yaw) * Quat::from_rotation_x(pitch);
    }

    /// Places the camera on a horizontal circle around `target` and looks at it.
    pub fn orbit(&mut self, target: Vec3, radius: f32, height: f32, angle: f32) {
        let (sin, cos) = angle.sin_cos();
        self.position = target + Vec3::new(sin * radius, height, -cos * radius);
        self.look_at(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_view_puts_target_on_positive_z() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(3.0, 2.0, -4.0);
        camera.look_at(Vec3::ZERO);

        let view = camera.view_matrix();
        let target = view.transform_point3(Vec3::ZERO);
        assert!(target.x.abs() < EPSILON && target.y.abs() < EPSILON);
        assert!((target.z - camera.position.length()).abs() < 1e-4);
    }

    #[test]
    fn test_default_looks_down_z() {
        let camera = Camera::default();
        assert_eq!(camera.forward(), Vec3::Z);
        let p = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 0.0, 5.0)).length() < EPSILON);
    }

    #[test]
    fn test_orbit_keeps_distance() {
        let mut camera = Camera::new();
        for step in 0..8 {
            camera.orbit(Vec3::ZERO, 6.0, 0.0, step as f32 * 0.7);
            assert!((camera.position.length() - 6.0).abs() < 1e-4);
            assert!((camera.forward() + camera.position.normalize()).length() < 1e-4);
        }
    }

    #[test]
    fn test_up_stays_upright() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(-2.0, 5.0, 1.0);
        camera.look_at(Vec3::ZERO);
        assert!(camera.up().y > 0.0);
        assert!(camera.right().y.abs() < EPSILON);
    }
}
