//! Scene description.
//!
//! A [`Scene`] is an ordered list of primitive instances plus the camera.
//! Draw order is insertion order.

use glam::{Vec3, Vec4};
use tracing::debug;

use crate::camera::Camera;
use crate::primitive::Primitive;
use crate::transform::Transform;

/// One primitive instance.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneObject {
    pub primitive: Primitive,
    pub transform: Transform,
    /// Linear RGBA base color
    pub color: Vec4,
    /// Rotation speed about +Y in radians per second
    pub spin: f32,
}

impl SceneObject {
    pub fn new(primitive: Primitive, transform: Transform, color: Vec4) -> Self {
        Self {
            primitive,
            transform,
            color,
            spin: 0.0,
        }
    }

    pub fn with_spin(mut self, spin: f32) -> Self {
        self.spin = spin;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub camera: Camera,
    objects: Vec<SceneObject>,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            objects: Vec::new(),
        }
    }

    /// Appends an object and returns its index.
    pub fn add(&mut self, object: SceneObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [SceneObject] {
        &mut self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Primitive kinds used by the scene, in first-use order.
    pub fn primitives(&self) -> Vec<Primitive> {
        let mut kinds = Vec::new();
        for object in &self.objects {
            if !kinds.contains(&object.primitive) {
                kinds.push(object.primitive);
            }
        }
        kinds
    }

    /// Advances spinning objects by `delta_secs`.
    pub fn update(&mut self, delta_secs: f32) {
        for object in self.objects.iter_mut().filter(|o| o.spin != 0.0) {
            object.transform.rotate_y(object.spin * delta_secs);
        }
    }

    /// A ground plane with one of each other primitive standing on it.
    pub fn demo() -> Self {
        let mut camera = Camera::new();
        camera.set_lens(60.0_f32.to_radians(), 0.1, 100.0);
        camera.position = Vec3::new(0.0, 2.5, -6.0);
        camera.look_at(Vec3::new(0.0, 0.5, 0.0));

        let mut scene = Self::new(camera);
        scene.add(SceneObject::new(
            Primitive::Plane,
            Transform::new().with_uniform_scale(10.0),
            Vec4::new(0.35, 0.35, 0.38, 1.0),
        ));
        scene.add(
            SceneObject::new(
                Primitive::Box,
                Transform::new().with_translation(Vec3::new(-2.0, 0.5, 0.0)),
                Vec4::new(0.8, 0.25, 0.2, 1.0),
            )
            .with_spin(0.8),
        );
        scene.add(SceneObject::new(
            Primitive::Sphere,
            Transform::new().with_translation(Vec3::new(0.0, 0.5, 0.0)),
            Vec4::new(0.2, 0.5, 0.85, 1.0),
        ));
        scene.add(
            SceneObject::new(
                Primitive::Cylinder,
                Transform::new().with_translation(Vec3::new(2.0, 0.5, 0.0)),
                Vec4::new(0.3, 0.75, 0.3, 1.0),
            )
            .with_spin(-0.5),
        );
        debug!("Built demo scene with {} objects", scene.len());
        scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scene() {
        let scene = Scene::demo();
        assert_eq!(scene.len(), 4);
        assert_eq!(
            scene.primitives(),
            vec![
                Primitive::Plane,
                Primitive::Box,
                Primitive::Sphere,
                Primitive::Cylinder
            ]
        );
    }

    #[test]
    fn test_primitives_are_deduplicated() {
        let mut scene = Scene::default();
        for x in 0..3 {
            scene.add(SceneObject::new(
                Primitive::Box,
                Transform::new().with_translation(Vec3::X * x as f32),
                Vec4::ONE,
            ));
        }
        assert_eq!(scene.primitives(), vec![Primitive::Box]);
    }

    #[test]
    fn test_update_only_moves_spinning_objects() {
        let mut scene = Scene::demo();
        let before: Vec<_> = scene.objects().iter().map(|o| o.transform).collect();
        scene.update(0.5);
        for (object, old) in scene.objects().iter().zip(&before) {
            assert_eq!(object.spin != 0.0, object.transform != *old);
        }
    }
}
