//! Window management using winit.
//!
//! This module provides the [`Window`] collaborator the renderer consumes:
//! its native handle, its current pixel size, a should-close flag and
//! resize notifications.
//!
//! The size bookkeeping lives in [`WindowState`], which has no winit
//! dependency and can be driven directly in tests.

use std::sync::Arc;

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use forge_core::config::WindowSettings;
use forge_core::{Error, Result};

type ResizeCallback = Box<dyn FnMut(u32, u32)>;

/// Size, close flag and resize subscribers of a window.
#[derive(Default)]
pub struct WindowState {
    width: u32,
    height: u32,
    should_close: bool,
    resize_callbacks: Vec<ResizeCallback>,
}

impl WindowState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether either dimension is zero, as when minimized.
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height, or 1 while minimized.
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_minimized() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    #[inline]
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    pub fn request_close(&mut self) {
        self.should_close = true;
    }

    /// Registers `callback` to run with the new size after every change.
    pub fn on_resize(&mut self, callback: impl FnMut(u32, u32) + 'static) {
        self.resize_callbacks.push(Box::new(callback));
    }

    /// Records a new size and notifies subscribers. Returns `false`, without
    /// notifying, when the size did not change.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == self.width && height == self.height {
            return false;
        }
        self.width = width;
        self.height = height;
        debug!("Window resized: {}x{}", width, height);
        for callback in &mut self.resize_callbacks {
            callback(width, height);
        }
        true
    }

    /// Applies the window events that affect this state.
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => self.request_close(),
            WindowEvent::Resized(size) => {
                self.resize(size.width, size.height);
            }
            _ => {}
        }
    }
}

/// A winit window plus its [`WindowState`].
pub struct Window {
    window: Arc<WinitWindow>,
    state: WindowState,
}

impl Window {
    /// Creates a resizable window from `settings`.
    pub fn new(event_loop: &ActiveEventLoop, settings: &WindowSettings) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(settings.title.as_str())
            .with_inner_size(PhysicalSize::new(settings.width, settings.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The platform may not honor the requested size exactly.
        let size = window.inner_size();
        info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            state: WindowState::new(size.width, size.height),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WindowState {
        &mut self.state
    }

    pub fn width(&self) -> u32 {
        self.state.width()
    }

    pub fn height(&self) -> u32 {
        self.state.height()
    }

    pub fn should_close(&self) -> bool {
        self.state.should_close()
    }

    pub fn on_resize(&mut self, callback: impl FnMut(u32, u32) + 'static) {
        self.state.on_resize(callback);
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        self.state.handle_event(event);
    }

    /// Native handle the swap chain is created for.
    pub fn raw_window_handle(&self) -> Result<RawWindowHandle> {
        self.window
            .window_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}
