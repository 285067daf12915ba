//! Frame scheduling and per-frame GPU memory.
//!
//! This crate drives the renderer on top of `forge-rhi`:
//! - Frame state machine and the [`Renderer`] engine
//! - Frame-resource ring and persistent constant buffers
//! - Depth convention and depth buffer
//! - Sampler table, scene pipeline and GPU copies of scene meshes

pub mod constant_buffers;
pub mod depth_buffer;
pub mod depth_convention;
pub mod frame_manager;
pub mod frame_ring;
pub mod gpu_scene;
pub mod overlay;
pub mod renderer;
pub mod sampler_table;
pub mod scene_pipeline;
pub mod ubo;

pub use depth_convention::{DepthConvention, DepthMode, Subscription};
pub use frame_manager::{FramePhase, FrameScheduler};
pub use frame_ring::FrameRing;
pub use gpu_scene::{GpuScene, MeshDraw};
pub use overlay::{NoOverlay, Overlay};
pub use renderer::{FrameView, Renderer};
pub use scene_pipeline::ShaderSet;
