//! Object placement.
//!
//! [`Transform`] holds translation, rotation and scale in left-handed world
//! space (+X right, +Y up, +Z forward) and builds the matrices the
//! per-object constants need.
//!
//! # Example
//!
//! ```
//! use forge_scene::Transform;
//! use glam::Vec3;
//!
//! let transform = Transform::new()
//!     .with_translation(Vec3::new(0.0, 1.0, 0.0))
//!     .with_uniform_scale(2.0);
//!
//! let corner = transform.matrix().transform_point3(Vec3::splat(0.5));
//! assert!((corner - Vec3::new(1.0, 2.0, 1.0)).length() < 1e-6);
//! ```

use glam::{EulerRot, Mat4, Quat, Vec3};

/// Translation, rotation and scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new() -> Self {
        Self::IDENTITY
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Rotation from pitch (X), yaw (Y) and roll (Z) in degrees, applied
    /// yaw first.
    pub fn with_euler_degrees(mut self, pitch: f32, yaw: f32, roll: f32) -> Self {
        self.rotation = Quat::from_euler(
            EulerRot::YXZ,
            yaw.to_radians(),
            pitch.to_radians(),
            roll.to_radians(),
        );
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Rotates about world +Y.
    pub fn rotate_y(&mut self, radians: f32) {
        self.rotation = (Quat::from_rotation_y(radians) * self.rotation).normalize();
    }

    /// Object-to-world matrix: scale, then rotate, then translate.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Inverse transpose of [`Self::matrix`], for transforming normals.
    ///
    /// A non-invertible transform (a zero scale axis) yields the identity
    /// rather than NaNs.
    pub fn normal_matrix(&self) -> Mat4 {
        const EPSILON: f32 = 1e-6;
        let model = self.matrix();
        if model.determinant().abs() < EPSILON {
            Mat4::IDENTITY
        } else {
            model.inverse().transpose()
        }
    }

    /// Local +Z in world space.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < EPSILON
    }

    #[test]
    fn test_default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.matrix(), Mat4::IDENTITY);
        assert_eq!(t.normal_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_scale_then_rotate_then_translate() {
        let t = Transform::new()
            .with_translation(Vec3::new(10.0, 0.0, 0.0))
            .with_euler_degrees(0.0, 90.0, 0.0)
            .with_scale(Vec3::new(2.0, 1.0, 1.0));
        // +X scaled to 2, yawed 90 degrees onto -Z, then moved.
        let p = t.matrix().transform_point3(Vec3::X);
        assert!(approx_eq_vec3(p, Vec3::new(10.0, 0.0, -2.0)), "{p}");
    }

    #[test]
    fn test_directions_left_handed() {
        let t = Transform::default();
        assert_eq!(t.forward(), Vec3::Z);
        assert_eq!(t.right(), Vec3::X);
        assert_eq!(t.up(), Vec3::Y);
        // In a left-handed basis, right x up = forward.
        assert!(approx_eq_vec3(t.right().cross(t.up()), t.forward()));
    }

    #[test]
    fn test_normal_matrix_with_scale() {
        let t = Transform::new().with_scale(Vec3::new(1.0, 2.0, 1.0));
        assert_eq!(t.normal_matrix(), t.matrix().inverse().transpose());
    }

    #[test]
    fn test_normal_matrix_non_invertible() {
        let t = Transform::new().with_scale(Vec3::ZERO);
        assert_eq!(t.normal_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_rotate_y_accumulates() {
        let mut t = Transform::default();
        t.rotate_y(std::f32::consts::FRAC_PI_4);
        t.rotate_y(std::f32::consts::FRAC_PI_4);
        assert!(approx_eq_vec3(t.forward(), Vec3::X));
    }
}
