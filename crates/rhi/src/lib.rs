//! Explicit GPU hardware interface (Render Hardware Interface).
//!
//! This crate models a Direct3D 12 style device and provides the core
//! objects the renderer is built from:
//! - Device, queue, fence and command recording ([`device`], [`sync`])
//! - Descriptor heaps and slot allocation ([`descriptor`])
//! - Swap chain management ([`swapchain`])
//! - Upload buffers and mesh buffers ([`buffer`])
//! - Root signature and pipeline description ([`pipeline`])
//!
//! Everything is generic over a backend implementing [`hal::Api`]. Two
//! backends exist: `d3d12` on Windows, and [`null`], a deterministic
//! software model used by the tests and headless runs.

mod error;

pub mod buffer;
#[cfg(windows)]
pub mod d3d12;
pub mod descriptor;
pub mod device;
pub mod hal;
pub mod null;
pub mod pipeline;
pub mod swapchain;
pub mod sync;
pub mod types;
pub mod vertex;

pub use error::{RhiError, RhiResult};
