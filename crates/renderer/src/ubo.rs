//! Constant buffer layouts shared with the scene shaders.
//!
//! These structures must match the HLSL `cbuffer` layouts exactly. All of
//! them are `#[repr(C)]`, padded by hand to 16-byte rows, and implement
//! `Pod` and `Zeroable` so they can be copied into upload memory as bytes.
//!
//! | Register | Struct                 | Storage                 |
//! |----------|------------------------|-------------------------|
//! | `b0`     | [`PerFrameConstants`]  | persistent, per frame   |
//! | `b1`     | [`PerViewConstants`]   | persistent, per frame   |
//! | `b2`     | [`ObjectVsConstants`]  | frame ring, per draw    |
//! | `b3`     | [`ObjectPsConstants`]  | frame ring, per draw    |

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Per-frame globals (register b0).
///
/// # Memory Layout
///
/// - Offset 0: time, delta time (8 bytes)
/// - Offset 8: frame number, depth mode index (8 bytes)
/// - Offset 16: viewport size (8 bytes)
/// - Offset 24: reciprocal viewport size (8 bytes)
/// - Total size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PerFrameConstants {
    /// Seconds since the renderer started.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta_time: f32,
    /// Number of frames rendered before this one.
    pub frame_number: u32,
    /// 0 for standard depth, 1 for reversed-Z.
    pub depth_mode: u32,
    pub viewport_size: Vec2,
    pub inv_viewport_size: Vec2,
}

impl PerFrameConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Camera matrices (register b1).
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Offset 128: view-projection matrix (64 bytes)
/// - Offset 192: camera position, near plane (16 bytes)
/// - Offset 208: far plane, padding (16 bytes)
/// - Total size: 224 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PerViewConstants {
    /// World to view space.
    pub view: Mat4,
    /// View to clip space, built by the depth convention.
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub near: f32,
    pub far: f32,
    pub _padding: [f32; 3],
}

impl PerViewConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3, near: f32, far: f32) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position,
            near,
            far,
            _padding: [0.0; 3],
        }
    }
}

/// Per-object vertex shader constants (register b2).
///
/// # Memory Layout
///
/// - Offset 0: world matrix (64 bytes)
/// - Offset 64: normal matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectVsConstants {
    /// Object to world space.
    pub world: Mat4,
    /// Inverse transpose of `world`, for normals.
    pub normal_matrix: Mat4,
}

impl ObjectVsConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// The normal matrix is the inverse transpose of `world`.
    pub fn new(world: Mat4) -> Self {
        Self {
            world,
            normal_matrix: world.inverse().transpose(),
        }
    }

    pub fn identity() -> Self {
        Self {
            world: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
        }
    }
}

impl Default for ObjectVsConstants {
    fn default() -> Self {
        Self::identity()
    }
}

/// Per-object pixel shader constants (register b3).
///
/// # Memory Layout
///
/// - Offset 0: base color (16 bytes)
/// - Offset 16: sampler slot, texture enable, padding (16 bytes)
/// - Total size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectPsConstants {
    pub base_color: Vec4,
    /// Index into the sampler table.
    pub sampler_index: u32,
    /// Non-zero to sample `t0`.
    pub use_texture: u32,
    pub _padding: [u32; 2],
}

impl ObjectPsConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(base_color: Vec4) -> Self {
        Self {
            base_color,
            sampler_index: 0,
            use_texture: 0,
            _padding: [0; 2],
        }
    }
}

impl Default for ObjectPsConstants {
    fn default() -> Self {
        Self::new(Vec4::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_size() {
        assert_eq!(PerFrameConstants::SIZE, 32);
    }

    #[test]
    fn test_per_view_size() {
        // 3 Mat4 (3 * 64) + Vec3 + near + far + padding = 224 bytes
        assert_eq!(PerViewConstants::SIZE, 224);
        assert_eq!(std::mem::align_of::<PerViewConstants>(), 16);
    }

    #[test]
    fn test_object_sizes() {
        assert_eq!(ObjectVsConstants::SIZE, 128);
        assert_eq!(ObjectPsConstants::SIZE, 32);
        // Every per-object block fits one 256-byte constant buffer slot.
        assert!(ObjectVsConstants::SIZE <= 256 && ObjectPsConstants::SIZE <= 256);
    }

    #[test]
    fn test_per_view_new() {
        let view = Mat4::look_at_lh(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_lh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        let constants = PerViewConstants::new(view, projection, Vec3::new(0.0, 0.0, -5.0), 0.1, 100.0);
        assert_eq!(constants.view_projection, projection * view);
        assert_eq!(constants.near, 0.1);
        assert_eq!(constants.far, 100.0);
    }

    #[test]
    fn test_object_vs_normal_matrix() {
        let world = Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0));
        let constants = ObjectVsConstants::new(world);
        let expected = Mat4::from_scale(Vec3::splat(0.5));
        assert!(constants.normal_matrix.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_object_vs_identity() {
        let constants = ObjectVsConstants::identity();
        assert_eq!(constants.world, Mat4::IDENTITY);
        assert_eq!(constants.normal_matrix, Mat4::IDENTITY);
    }
}
