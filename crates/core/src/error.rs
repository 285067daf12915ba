//! Error types shared by every forge crate.

use thiserror::Error;

/// Main error type for the renderer.
#[derive(Error, Debug)]
pub enum Error {
    /// GPU API errors surfaced through the core
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Shader bytecode loading errors
    #[error("Shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Settings file could not be parsed
    #[error("Failed to parse settings: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the renderer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that may carry a native API status code (an `HRESULT` on Windows).
///
/// [`fatal`](crate::fatal) prints the code in hex when present.
pub trait ErrorCode {
    /// Native status code attached to this error, if any.
    fn code(&self) -> Option<i32> {
        None
    }
}

impl ErrorCode for Error {}

impl ErrorCode for std::io::Error {
    fn code(&self) -> Option<i32> {
        self.raw_os_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("frames_in_flight must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Config error: frames_in_flight must be at least 1"
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(Error::Io(_))));
    }

    #[test]
    fn test_plain_errors_have_no_code() {
        assert_eq!(Error::Internal("x".into()).code(), None);
    }
}
