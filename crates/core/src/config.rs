//! Process-wide renderer settings.
//!
//! Settings are read once at startup from a TOML file. Every key is optional;
//! missing keys take the defaults documented on each field.
//!
//! # Example
//!
//! ```
//! use forge_core::config::{DepthMode, Settings};
//!
//! let settings = Settings::from_toml_str(
//!     r#"
//!     frames_in_flight = 3
//!     vsync = false
//!     depth_mode = "standard"
//!
//!     [descriptors]
//!     sampler = 1024
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(settings.frames_in_flight, 3);
//! assert_eq!(settings.depth_mode, DepthMode::Standard);
//! assert_eq!(settings.descriptors.sampler, 1024);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// Largest supported number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 4;

/// Constant buffer placement alignment required by the GPU.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Back-buffer formats the swap chain can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    #[default]
    Bgra8Unorm,
    Rgba8Unorm,
    Rgb10a2Unorm,
    Rgba16Float,
}

/// Depth-stencil formats the depth buffer can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    #[default]
    D32Float,
    D24UnormS8Uint,
    D32FloatS8x24Uint,
    D16Unorm,
}

/// Depth-buffer convention.
///
/// `Standard` maps the near plane to depth 0 and the far plane to 1.
/// `ReversedZ` maps near to 1 and far to 0, which keeps far more float
/// precision at distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    Standard,
    #[default]
    ReversedZ,
}

impl DepthMode {
    /// Index written to the per-frame constants so shaders can branch on it.
    pub fn index(self) -> u32 {
        match self {
            DepthMode::Standard => 0,
            DepthMode::ReversedZ => 1,
        }
    }
}

/// Descriptor heap capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DescriptorCapacities {
    /// Render-target heap. Must hold at least one view per back buffer.
    pub render_target: u32,
    /// Depth-stencil heap.
    pub depth_stencil: u32,
    /// Shader-visible CBV/SRV/UAV heap (resource binding tier 2 maximum).
    pub shader_resource: u32,
    /// Shader-visible sampler heap.
    pub sampler: u32,
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            render_target: 16,
            depth_stencil: 8,
            shader_resource: 1_000_000,
            sampler: 2048,
        }
    }
}

/// Window collaborator settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Forge".to_string(),
        }
    }
}

/// Renderer settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of frames the CPU may record ahead of the GPU. Sizes the
    /// command allocators, fence values, ring slots, persistent constant
    /// buffers and swap-chain buffers alike. Default 2.
    pub frames_in_flight: u32,
    /// Swap-chain format. Default BGRA8.
    pub back_buffer_format: ColorFormat,
    /// Depth buffer format. Default D32.
    pub depth_stencil_format: DepthFormat,
    /// Present with sync interval 1. Default true.
    pub vsync: bool,
    /// Enumerate adapters high-performance first. Default true.
    pub prefer_high_performance_adapter: bool,
    /// Bytes of upload memory per frame-in-flight ring slot. Default 8 MiB.
    pub ring_buffer_capacity_per_frame: u64,
    /// Initial depth convention. Default reversed-Z.
    pub depth_mode: DepthMode,
    /// Enable the GPU debug layer. Default on in debug builds.
    pub enable_gpu_validation: bool,
    /// Bounded fence wait. A timed-out wait is treated as a GPU hang.
    pub gpu_wait_timeout_ms: Option<u64>,
    /// Render-target clear color.
    pub clear_color: [f32; 4],
    /// Minimum shader model the device must support, as `[major, minor]`.
    pub min_shader_model: [u8; 2],
    /// Descriptor heap capacities.
    pub descriptors: DescriptorCapacities,
    /// Debug-layer message ids that are dropped instead of logged.
    pub debug_message_deny_list: Vec<i32>,
    /// Directory holding compiled shader bytecode.
    pub shader_dir: PathBuf,
    /// Window settings.
    pub window: WindowSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            back_buffer_format: ColorFormat::default(),
            depth_stencil_format: DepthFormat::default(),
            vsync: true,
            prefer_high_performance_adapter: true,
            ring_buffer_capacity_per_frame: 8 * 1024 * 1024,
            depth_mode: DepthMode::default(),
            enable_gpu_validation: cfg!(debug_assertions),
            gpu_wait_timeout_ms: None,
            clear_color: [0.05, 0.07, 0.12, 1.0],
            min_shader_model: [6, 0],
            descriptors: DescriptorCapacities::default(),
            debug_message_deny_list: Vec::new(),
            shader_dir: PathBuf::from("shaders"),
            window: WindowSettings::default(),
        }
    }
}

impl Settings {
    /// Loads and validates settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parses and validates settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.ring_buffer_capacity_per_frame == 0
            || self.ring_buffer_capacity_per_frame % CONSTANT_BUFFER_ALIGNMENT != 0
        {
            return Err(Error::Config(format!(
                "ring_buffer_capacity_per_frame must be a non-zero multiple of {CONSTANT_BUFFER_ALIGNMENT}, got {}",
                self.ring_buffer_capacity_per_frame
            )));
        }
        if self.descriptors.render_target < self.frames_in_flight {
            return Err(Error::Config(format!(
                "descriptors.render_target ({}) must hold one view per frame in flight ({})",
                self.descriptors.render_target, self.frames_in_flight
            )));
        }
        if self.descriptors.depth_stencil == 0
            || self.descriptors.shader_resource == 0
            || self.descriptors.sampler == 0
        {
            return Err(Error::Config(
                "descriptor heap capacities must be non-zero".to_string(),
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config("window size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Fence wait bound, if configured.
    pub fn gpu_wait_timeout(&self) -> Option<Duration> {
        self.gpu_wait_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.frames_in_flight, 2);
        assert_eq!(settings.depth_mode, DepthMode::ReversedZ);
        assert_eq!(settings.descriptors.shader_resource, 1_000_000);
        assert_eq!(settings.descriptors.sampler, 2048);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_parse_overrides() {
        let settings = Settings::from_toml_str(
            r#"
            back_buffer_format = "rgb10a2_unorm"
            depth_stencil_format = "d24_unorm_s8_uint"
            ring_buffer_capacity_per_frame = 4096
            gpu_wait_timeout_ms = 5000
            debug_message_deny_list = [820, 821]

            [window]
            width = 1920
            height = 1080
            "#,
        )
        .unwrap();

        assert_eq!(settings.back_buffer_format, ColorFormat::Rgb10a2Unorm);
        assert_eq!(settings.depth_stencil_format, DepthFormat::D24UnormS8Uint);
        assert_eq!(settings.ring_buffer_capacity_per_frame, 4096);
        assert_eq!(settings.gpu_wait_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(settings.debug_message_deny_list, vec![820, 821]);
        assert_eq!(settings.window.width, 1920);
        assert_eq!(settings.window.title, "Forge");
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let err = Settings::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unaligned_ring_capacity() {
        let err = Settings::from_toml_str("ring_buffer_capacity_per_frame = 1000").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_small_rtv_heap() {
        let err = Settings::from_toml_str(
            r#"
            frames_in_flight = 3
            [descriptors]
            render_target = 2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let err = Settings::from_toml_str(r#"back_buffer_format = "r5g6b5""#).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
