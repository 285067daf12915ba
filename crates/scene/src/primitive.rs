//! Procedural primitive meshes.
//!
//! Every primitive is unit sized and centered at the origin, in left-handed
//! coordinates with clockwise front faces (the D3D default), so back-face
//! culling keeps the outside.
//!
//! | Primitive  | Shape                                  | Vertices | Indices |
//! |------------|----------------------------------------|----------|---------|
//! | `Box`      | 1 x 1 x 1 cube, 4 vertices per face    | 24       | 36      |
//! | `Plane`    | 1 x 1 quad in XZ facing +Y             | 4        | 6       |
//! | `Sphere`   | UV sphere, radius 0.5                  | 561      | 2880    |
//! | `Cylinder` | radius 0.5, height 1, with caps        | 134      | 384     |

use std::f32::consts::PI;

use glam::{Vec2, Vec3};

use forge_rhi::vertex::Vertex;

/// Segments around the sphere and cylinder.
pub const SEGMENTS: u32 = 32;
/// Rings from pole to pole of the sphere.
pub const RINGS: u32 = 16;

/// CPU-side mesh, ready for upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn push(&mut self, position: Vec3, normal: Vec3, tex_coord: Vec2, tangent: Vec3) -> u32 {
        let index = self.vertices.len() as u32;
        self.vertices
            .push(Vertex::new(position, normal, tex_coord, tangent.extend(1.0)));
        index
    }

    /// One quad centered at `center` facing `normal`, `up` being the
    /// texture's V-up direction.
    fn push_quad(&mut self, center: Vec3, normal: Vec3, up: Vec3) {
        // With right = normal x up, corners -r-u, -r+u, r+u, r-u wind
        // clockwise seen from the front.
        let right = normal.cross(up);
        let (r, u) = (right * 0.5, up * 0.5);
        let base = self.push(center - r - u, normal, Vec2::new(0.0, 1.0), right);
        self.push(center - r + u, normal, Vec2::new(0.0, 0.0), right);
        self.push(center + r + u, normal, Vec2::new(1.0, 0.0), right);
        self.push(center + r - u, normal, Vec2::new(1.0, 1.0), right);
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// The closed set of built-in primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Box,
    Plane,
    Sphere,
    Cylinder,
}

impl Primitive {
    pub const ALL: [Primitive; 4] = [
        Primitive::Box,
        Primitive::Plane,
        Primitive::Sphere,
        Primitive::Cylinder,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Box => "box",
            Primitive::Plane => "plane",
            Primitive::Sphere => "sphere",
            Primitive::Cylinder => "cylinder",
        }
    }

    /// Generates the vertices and indices of this primitive.
    pub fn generate(self) -> MeshData {
        match self {
            Primitive::Box => generate_box(),
            Primitive::Plane => generate_plane(),
            Primitive::Sphere => generate_sphere(SEGMENTS, RINGS),
            Primitive::Cylinder => generate_cylinder(SEGMENTS),
        }
    }
}

fn generate_box() -> MeshData {
    let faces = [
        (Vec3::Z, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y),
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
    ];
    let mut mesh = MeshData::default();
    for (normal, up) in faces {
        mesh.push_quad(normal * 0.5, normal, up);
    }
    mesh
}

fn generate_plane() -> MeshData {
    let mut mesh = MeshData::default();
    mesh.push_quad(Vec3::ZERO, Vec3::Y, Vec3::Z);
    mesh
}

fn generate_sphere(segments: u32, rings: u32) -> MeshData {
    let mut mesh = MeshData::default();
    let segment_angle = 2.0 * PI / segments as f32;
    let ring_angle = PI / rings as f32;

    for ring in 0..=rings {
        let phi = ring as f32 * ring_angle;
        let (ring_radius, y) = phi.sin_cos();
        for segment in 0..=segments {
            let theta = segment as f32 * segment_angle;
            let (sin_theta, cos_theta) = theta.sin_cos();
            let normal = Vec3::new(ring_radius * cos_theta, y, ring_radius * sin_theta);
            let tex_coord = Vec2::new(
                segment as f32 / segments as f32,
                ring as f32 / rings as f32,
            );
            let tangent = Vec3::new(-sin_theta, 0.0, cos_theta);
            mesh.push(normal * 0.5, normal, tex_coord, tangent);
        }
    }

    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * stride + segment;
            let next = current + stride;
            // The first and last rings have one degenerate triangle per quad.
            if ring != 0 {
                mesh.indices.extend_from_slice(&[current, current + 1, next]);
            }
            if ring != rings - 1 {
                mesh.indices
                    .extend_from_slice(&[current + 1, next + 1, next]);
            }
        }
    }
    mesh
}

fn generate_cylinder(segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    let radius = 0.5;
    let half_height = 0.5;
    let angle_step = 2.0 * PI / segments as f32;

    for i in 0..=segments {
        let (sin, cos) = (i as f32 * angle_step).sin_cos();
        let normal = Vec3::new(cos, 0.0, sin);
        let tangent = Vec3::new(-sin, 0.0, cos);
        let u = i as f32 / segments as f32;
        let rim = normal * radius;
        mesh.push(rim - Vec3::Y * half_height, normal, Vec2::new(u, 1.0), tangent);
        mesh.push(rim + Vec3::Y * half_height, normal, Vec2::new(u, 0.0), tangent);
    }
    for i in 0..segments {
        let bottom = i * 2;
        let top = bottom + 1;
        mesh.indices
            .extend_from_slice(&[bottom, top, bottom + 2, top, top + 2, bottom + 2]);
    }

    for (normal, height) in [(Vec3::Y, half_height), (Vec3::NEG_Y, -half_height)] {
        let center = mesh.push(Vec3::Y * height, normal, Vec2::splat(0.5), Vec3::X);
        for i in 0..=segments {
            let (sin, cos) = (i as f32 * angle_step).sin_cos();
            mesh.push(
                Vec3::new(cos * radius, height, sin * radius),
                normal,
                Vec2::new(0.5 + cos * 0.5, 0.5 + sin * 0.5),
                Vec3::X,
            );
        }
        for i in 0..segments {
            let (a, b) = (center + 1 + i, center + 2 + i);
            if normal.y > 0.0 {
                mesh.indices.extend_from_slice(&[center, b, a]);
            } else {
                mesh.indices.extend_from_slice(&[center, a, b]);
            }
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_normal(mesh: &MeshData, tri: &[u32]) -> (Vec3, Vec3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| mesh.vertices[i as usize].position);
        ((b - a).cross(c - a), (a + b + c) / 3.0)
    }

    #[test]
    fn test_counts() {
        let counts: Vec<_> = Primitive::ALL
            .iter()
            .map(|p| {
                let mesh = p.generate();
                (mesh.vertices.len(), mesh.indices.len())
            })
            .collect();
        assert_eq!(counts, vec![(24, 36), (4, 6), (561, 2880), (134, 384)]);
    }

    #[test]
    fn test_indices_in_range() {
        for primitive in Primitive::ALL {
            let mesh = primitive.generate();
            let count = mesh.vertices.len() as u32;
            assert!(mesh.indices.iter().all(|&i| i < count), "{}", primitive.name());
            assert_eq!(mesh.indices.len() % 3, 0);
        }
    }

    #[test]
    fn test_closed_shapes_wind_clockwise_outward() {
        for primitive in [Primitive::Box, Primitive::Sphere, Primitive::Cylinder] {
            let mesh = primitive.generate();
            for tri in mesh.indices.chunks(3) {
                let (normal, centroid) = face_normal(&mesh, tri);
                assert!(normal.length() > 1e-7, "degenerate triangle in {}", primitive.name());
                assert!(
                    normal.dot(centroid) > 0.0,
                    "{} triangle {:?} faces inward",
                    primitive.name(),
                    tri
                );
            }
        }
    }

    #[test]
    fn test_plane_faces_up() {
        let mesh = Primitive::Plane.generate();
        for tri in mesh.indices.chunks(3) {
            let (normal, _) = face_normal(&mesh, tri);
            assert!(normal.y > 0.0);
        }
        assert!(mesh.vertices.iter().all(|v| v.position.y == 0.0));
    }

    #[test]
    fn test_box_extent_and_normals() {
        let mesh = Primitive::Box.generate();
        for v in &mesh.vertices {
            assert!((v.position.abs().max_element() - 0.5).abs() < 1e-6);
            assert!((v.normal.length() - 1.0).abs() < 1e-6);
            assert!(v.position.dot(v.normal) > 0.0);
            assert_eq!(v.tangent.w, 1.0);
        }
    }

    #[test]
    fn test_sphere_radius() {
        let mesh = Primitive::Sphere.generate();
        for v in &mesh.vertices {
            assert!((v.position.length() - 0.5).abs() < 1e-5);
        }
    }
}
