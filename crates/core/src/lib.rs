//! Core utilities for the forge renderer.
//!
//! This crate provides foundational types and utilities used across the renderer:
//! - Error types, result aliases and fatal error reporting
//! - Logging initialization
//! - Timer utilities
//! - Settings loaded from TOML

pub mod config;
mod error;
mod fatal;
mod logging;
mod timer;

pub use config::Settings;
pub use error::{Error, ErrorCode, Result};
pub use fatal::{OrFatal, fatal, format_code};
pub use logging::{DEFAULT_LOG_FILTER, init_logging};
pub use timer::Timer;
