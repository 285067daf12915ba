//! GPU copies of scene meshes.
//!
//! [`GpuScene`] uploads one [`MeshBuffers`] per primitive kind the scene
//! uses and turns scene objects into [`MeshDraw`]s. Instances of the same
//! kind share buffers.

use std::collections::HashMap;

use tracing::debug;

use forge_rhi::buffer::MeshBuffers;
use forge_rhi::hal::Api;
use forge_rhi::types::{IndexBufferView, PrimitiveTopology, VertexBufferView};
use forge_rhi::RhiResult;
use forge_scene::{Primitive, Scene, SceneObject};

use crate::ubo::{ObjectPsConstants, ObjectVsConstants};

/// Everything the renderer needs to issue one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDraw {
    pub vertex_view: VertexBufferView,
    pub index_view: IndexBufferView,
    pub topology: PrimitiveTopology,
    pub index_count: u32,
    pub object_vs: ObjectVsConstants,
    pub object_ps: ObjectPsConstants,
}

impl MeshDraw {
    /// A draw of `mesh` with the given per-object constants.
    pub fn new<A: Api>(
        mesh: &MeshBuffers<A>,
        object_vs: ObjectVsConstants,
        object_ps: ObjectPsConstants,
    ) -> Self {
        Self {
            vertex_view: mesh.vertex_view(),
            index_view: mesh.index_view(),
            topology: mesh.topology(),
            index_count: mesh.index_count(),
            object_vs,
            object_ps,
        }
    }
}

pub struct GpuScene<A: Api> {
    meshes: HashMap<Primitive, MeshBuffers<A>>,
}

impl<A: Api> GpuScene<A> {
    /// Uploads every primitive kind `scene` uses.
    pub fn new(device: &A::Device, scene: &Scene) -> RhiResult<Self> {
        let mut gpu_scene = Self {
            meshes: HashMap::new(),
        };
        for primitive in scene.primitives() {
            gpu_scene.upload(device, primitive)?;
        }
        Ok(gpu_scene)
    }

    /// Uploads `primitive` unless it is already resident.
    pub fn upload(&mut self, device: &A::Device, primitive: Primitive) -> RhiResult<()> {
        if self.meshes.contains_key(&primitive) {
            return Ok(());
        }
        let data = primitive.generate();
        let mesh = MeshBuffers::new(device, primitive.name(), &data.vertices, &data.indices)?;
        debug!(
            "Uploaded {} mesh: {} vertices, {} indices",
            primitive.name(),
            data.vertices.len(),
            data.index_count()
        );
        self.meshes.insert(primitive, mesh);
        Ok(())
    }

    pub fn mesh(&self, primitive: Primitive) -> Option<&MeshBuffers<A>> {
        self.meshes.get(&primitive)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Draw for one object, if its mesh is resident.
    pub fn draw(&self, object: &SceneObject) -> Option<MeshDraw> {
        let mesh = self.meshes.get(&object.primitive)?;
        let object_vs = ObjectVsConstants {
            world: object.transform.matrix(),
            normal_matrix: object.transform.normal_matrix(),
        };
        Some(MeshDraw::new(mesh, object_vs, ObjectPsConstants::new(object.color)))
    }

    /// Draws for the whole scene, in scene order. Objects whose mesh was
    /// never uploaded are skipped.
    pub fn draws(&self, scene: &Scene) -> Vec<MeshDraw> {
        scene
            .objects()
            .iter()
            .filter_map(|object| self.draw(object))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_rhi::device::{DeviceConfig, DeviceContext};
    use forge_rhi::null::Null;
    use forge_scene::Transform;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_meshes_shared_per_kind() {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        let mut scene = Scene::default();
        for x in 0..3 {
            scene.add(SceneObject::new(
                Primitive::Box,
                Transform::new().with_translation(Vec3::X * x as f32),
                Vec4::ONE,
            ));
        }
        let gpu_scene = GpuScene::<Null>::new(ctx.device(), &scene).unwrap();
        assert_eq!(gpu_scene.mesh_count(), 1);

        let draws = gpu_scene.draws(&scene);
        assert_eq!(draws.len(), 3);
        assert!(draws.iter().all(|d| d.index_count == 36));
        assert_eq!(draws[0].vertex_view, draws[2].vertex_view);
        assert_eq!(draws[2].object_vs.world.w_axis.x, 2.0);
    }

    #[test]
    fn test_missing_mesh_is_skipped() {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        let mut scene = Scene::default();
        scene.add(SceneObject::new(Primitive::Sphere, Transform::new(), Vec4::ONE));
        let gpu_scene = GpuScene::<Null>::new(ctx.device(), &Scene::default()).unwrap();
        assert!(gpu_scene.draws(&scene).is_empty());
    }

    #[test]
    fn test_demo_colors_flow_to_pixel_constants() {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        let scene = Scene::demo();
        let gpu_scene = GpuScene::<Null>::new(ctx.device(), &scene).unwrap();
        let draws = gpu_scene.draws(&scene);
        assert_eq!(draws.len(), 4);
        for (draw, object) in draws.iter().zip(scene.objects()) {
            assert_eq!(draw.object_ps.base_color, object.color);
        }
    }
}
