//! Platform layer for the forge renderer.
//!
//! This crate provides the window collaborator:
//! - Window creation via winit
//! - Current size, close flag and resize notifications
//! - The raw window handle the swap chain presents to

mod window;

pub use window::{Window, WindowState};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
