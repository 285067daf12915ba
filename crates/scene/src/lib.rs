//! Scene content.
//!
//! This crate provides what the renderer draws:
//! - Procedural primitive meshes
//! - Object transforms
//! - The camera
//! - Scene descriptions

pub mod camera;
pub mod primitive;
pub mod scene;
pub mod transform;

pub use camera::Camera;
pub use primitive::{MeshData, Primitive};
pub use scene::{Scene, SceneObject};
pub use transform::Transform;
