//! Vertex data structures and input layout descriptions.
//!
//! # Vertex Types
//!
//! - [`Vertex`] - Mesh vertex with position, normal, UV, and tangent
//! - [`InputElement`] - One entry of a pipeline input layout

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use crate::types::Format;

/// One element of a pipeline input layout, bound to vertex buffer slot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputElement {
    /// HLSL semantic name.
    pub semantic: &'static str,
    /// HLSL semantic index.
    pub semantic_index: u32,
    pub format: Format,
    /// Byte offset inside the vertex.
    pub offset: u32,
}

/// Standard vertex format with position, normal, UV, and tangent.
///
/// This is the vertex format produced by the primitive generators and
/// consumed by the scene pipeline.
///
/// # Memory Layout
///
/// The struct uses `#[repr(C)]` to ensure predictable memory layout:
/// - Offset 0: position (12 bytes)
/// - Offset 12: normal (12 bytes)
/// - Offset 24: tex_coord (8 bytes)
/// - Offset 32: tangent (16 bytes)
/// - Total size: 48 bytes
///
/// # Shader Semantics
///
/// - `POSITION`: position (float3)
/// - `NORMAL`: normal (float3)
/// - `TEXCOORD0`: tex_coord (float2)
/// - `TANGENT`: tangent (float4)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// 3D position in object space.
    pub position: Vec3,
    /// Surface normal vector (should be normalized).
    pub normal: Vec3,
    /// Texture coordinates (UV).
    pub tex_coord: Vec2,
    /// Tangent vector with handedness in w component.
    pub tangent: Vec4,
}

impl Vertex {
    /// Creates a new vertex with the specified attributes.
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, tex_coord: Vec2, tangent: Vec4) -> Self {
        Self {
            position,
            normal,
            tex_coord,
            tangent,
        }
    }

    /// Returns the size of the vertex in bytes.
    #[inline]
    pub const fn size() -> usize {
        std::mem::size_of::<Self>()
    }

    /// Stride used for vertex buffer views.
    #[inline]
    pub const fn stride() -> u32 {
        std::mem::size_of::<Self>() as u32
    }

    /// Input layout matching the scene vertex shader.
    pub fn input_layout() -> [InputElement; 4] {
        [
            InputElement {
                semantic: "POSITION",
                semantic_index: 0,
                format: Format::Rgb32Float,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            InputElement {
                semantic: "NORMAL",
                semantic_index: 0,
                format: Format::Rgb32Float,
                offset: std::mem::offset_of!(Vertex, normal) as u32,
            },
            InputElement {
                semantic: "TEXCOORD",
                semantic_index: 0,
                format: Format::Rg32Float,
                offset: std::mem::offset_of!(Vertex, tex_coord) as u32,
            },
            InputElement {
                semantic: "TANGENT",
                semantic_index: 0,
                format: Format::Rgba32Float,
                offset: std::mem::offset_of!(Vertex, tangent) as u32,
            },
        ]
    }
}
