//! Forge renderer - main entry point.
//!
//! Renders a small scene of procedural primitives. On Windows the default is
//! a window presented through Direct3D 12; `--headless` (or `--backend null`)
//! runs a fixed number of frames on the null backend and logs GPU statistics.

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use tracing::info;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use forge_core::{OrFatal, Settings};
use forge_platform::Window;
use forge_renderer::{FrameView, GpuScene, NoOverlay, Renderer, ShaderSet};
use forge_rhi::hal::{Api, SurfaceHandle};
use forge_rhi::null::Null;
use forge_scene::Scene;

/// Frames rendered by a headless run without `--max-frames`.
const DEFAULT_HEADLESS_FRAMES: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Direct3D 12 on Windows, null elsewhere
    Auto,
    D3d12,
    /// Deterministic software model, no GPU needed
    Null,
}

#[derive(Debug, Parser)]
#[command(name = "forge", version, about = "Forge renderer")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Auto)]
    backend: Backend,

    /// Initial back-buffer width
    #[arg(long)]
    width: Option<u32>,

    /// Initial back-buffer height
    #[arg(long)]
    height: Option<u32>,

    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,

    /// Exit after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Enable the GPU debug layer
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,

    /// Disable the GPU debug layer
    #[arg(long)]
    no_validation: bool,

    /// Render without a window on the null backend
    #[arg(long)]
    headless: bool,
}

impl Args {
    /// Loads the settings file, if any, and applies command-line overrides.
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(width) = self.width {
            settings.window.width = width;
        }
        if let Some(height) = self.height {
            settings.window.height = height;
        }
        if self.no_vsync {
            settings.vsync = false;
        }
        if self.validation {
            settings.enable_gpu_validation = true;
        }
        if self.no_validation {
            settings.enable_gpu_validation = false;
        }
        settings.validate()?;
        Ok(settings)
    }

    fn backend(&self) -> Backend {
        match self.backend {
            _ if self.headless => Backend::Null,
            Backend::Auto if cfg!(windows) => Backend::D3d12,
            Backend::Auto => Backend::Null,
            other => other,
        }
    }
}

/// Windowed application, generic over the GPU backend.
struct App<A: Api> {
    settings: Settings,
    max_frames: Option<u64>,
    scene: Scene,
    window: Option<Window>,
    renderer: Option<Renderer<A>>,
    gpu_scene: Option<GpuScene<A>>,
    /// Latest size reported by the window, applied before the next frame.
    pending_resize: Rc<Cell<Option<(u32, u32)>>>,
}

impl<A: Api> App<A> {
    fn new(settings: Settings, max_frames: Option<u64>) -> Self {
        Self {
            settings,
            max_frames,
            scene: Scene::demo(),
            window: None,
            renderer: None,
            gpu_scene: None,
            pending_resize: Rc::new(Cell::new(None)),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) {
        let mut window =
            Window::new(event_loop, &self.settings.window).or_fatal("Failed to create window");
        let pending = self.pending_resize.clone();
        window.on_resize(move |width, height| pending.set(Some((width, height))));

        let surface = SurfaceHandle::new(
            window
                .raw_window_handle()
                .or_fatal("Failed to get window handle"),
        );
        let shaders =
            ShaderSet::load(&self.settings.shader_dir).or_fatal("Failed to load shaders");
        let renderer = Renderer::<A>::new(
            &surface,
            window.width(),
            window.height(),
            &self.settings,
            shaders,
        )
        .or_fatal("Failed to initialize renderer");
        let gpu_scene =
            GpuScene::new(renderer.device(), &self.scene).or_fatal("Failed to upload scene");

        info!("Initialization complete, entering main loop");
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.gpu_scene = Some(gpu_scene);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(renderer), Some(gpu_scene)) =
            (&self.window, &mut self.renderer, &self.gpu_scene)
        else {
            return;
        };

        if let Some((width, height)) = self.pending_resize.take() {
            renderer
                .resize(width, height)
                .or_fatal("Failed to resize renderer");
        }
        if window.state().is_minimized() {
            return;
        }

        let draws = gpu_scene.draws(&self.scene);
        renderer
            .render_frame(&FrameView::from_camera(&self.scene.camera), &draws, &mut NoOverlay)
            .or_fatal("Failed to render frame");
        self.scene.update(renderer.timer().delta_secs());

        if self
            .max_frames
            .is_some_and(|max| renderer.frame_count() >= max)
        {
            info!("Rendered {} frames, exiting", renderer.frame_count());
            event_loop.exit();
        }
    }
}

impl<A: Api> ApplicationHandler for App<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            self.init(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(window) = &mut self.window {
            window.handle_event(&event);
            if window.should_close() {
                info!("Close requested, shutting down");
                event_loop.exit();
                return;
            }
        }
        if let WindowEvent::RedrawRequested = event {
            self.redraw(event_loop);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Meshes may still be read by frames in flight.
        if let Some(renderer) = &mut self.renderer {
            renderer.flush().or_fatal("Failed to flush GPU");
        }
        self.gpu_scene = None;
        self.renderer = None;
        self.window = None;
    }
}

fn run_windowed<A: Api>(settings: Settings, max_frames: Option<u64>) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::<A>::new(settings, max_frames);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Renders `frames` frames of the demo scene on the null backend.
fn run_headless(settings: &Settings, frames: u64) -> Result<()> {
    let shaders = match ShaderSet::load(&settings.shader_dir) {
        Ok(shaders) => shaders,
        Err(e) => {
            // The null backend never interprets bytecode.
            info!("Using stand-in shaders for the null backend ({})", e);
            ShaderSet::from_bytes(b"null-vs".to_vec(), b"null-ps".to_vec())
        }
    };
    let mut renderer = Renderer::<Null>::new(
        &SurfaceHandle::headless(),
        settings.window.width,
        settings.window.height,
        settings,
        shaders,
    )
    .or_fatal("Failed to initialize renderer");

    let mut scene = Scene::demo();
    let gpu_scene = GpuScene::<Null>::new(renderer.device(), &scene).or_fatal("Failed to upload scene");

    for _ in 0..frames {
        let draws = gpu_scene.draws(&scene);
        renderer
            .render_frame(&FrameView::from_camera(&scene.camera), &draws, &mut NoOverlay)
            .or_fatal("Failed to render frame");
        scene.update(renderer.timer().delta_secs());
    }
    renderer.flush().or_fatal("Failed to flush GPU");

    let stats = renderer.device().stats();
    info!(
        frames = renderer.frame_count(),
        submissions = stats.command_lists_executed,
        draws = stats.draws,
        barriers = stats.barriers,
        presents = stats.presents,
        blocking_waits = stats.blocking_waits,
        elapsed_secs = renderer.timer().elapsed_secs(),
        "Headless run complete"
    );
    Ok(())
}

fn main() -> Result<()> {
    forge_core::init_logging();
    let args = Args::parse();
    let settings = args.settings()?;
    let backend = args.backend();
    info!("Starting forge ({:?} backend)", backend);

    match backend {
        Backend::Null => {
            run_headless(&settings, args.max_frames.unwrap_or(DEFAULT_HEADLESS_FRAMES))
        }
        #[cfg(windows)]
        Backend::D3d12 => run_windowed::<forge_rhi::d3d12::D3d12>(settings, args.max_frames),
        _ => bail!("the {:?} backend is not available on this platform", backend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from([
            "forge",
            "--width",
            "800",
            "--height",
            "600",
            "--no-vsync",
            "--no-validation",
        ]);
        let settings = args.settings().unwrap();
        assert_eq!(settings.window.width, 800);
        assert_eq!(settings.window.height, 600);
        assert!(!settings.vsync);
        assert!(!settings.enable_gpu_validation);
    }

    #[test]
    fn test_headless_forces_null_backend() {
        let args = Args::parse_from(["forge", "--backend", "d3d12", "--headless"]);
        assert_eq!(args.backend(), Backend::Null);
    }

    #[test]
    fn test_validation_flags_conflict() {
        assert!(Args::try_parse_from(["forge", "--validation", "--no-validation"]).is_err());
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = Args::parse_from(["forge", "--width", "0"]);
        assert!(args.settings().is_err());
    }
}
