//! Unrecoverable error reporting.
//!
//! Component APIs return `Result`. The frame loop and the application decide
//! which failures cannot be recovered from (device creation, descriptor heap
//! exhaustion, fence waits, ring overflow) and hand them to [`fatal`], which
//! logs the caller location and native status code, flushes output, breaks
//! into an attached debugger and aborts the process.
//!
//! # Example
//!
//! ```no_run
//! use forge_core::{Error, OrFatal};
//!
//! fn load() -> forge_core::Result<u32> {
//!     Err(Error::Internal("device lost".into()))
//! }
//!
//! // Logs "device lost" with this file and line, then aborts.
//! let value = load().or_fatal("loading device");
//! # let _ = value;
//! ```

use std::fmt::Display;
use std::io::Write;
use std::panic::Location;

use tracing::error;

use crate::error::ErrorCode;

/// Logs an unrecoverable failure and aborts the process.
///
/// `code` is the native status code (an `HRESULT` on Windows) and is printed
/// as eight hex digits when present.
#[track_caller]
#[cold]
pub fn fatal(message: impl Display, code: Option<i32>) -> ! {
    let location = Location::caller();
    report(location, &message, code);
    abort()
}

/// Escalates an error to [`fatal`] at the call site.
pub trait OrFatal<T> {
    /// Returns the value, or aborts with `context` and the error message.
    fn or_fatal(self, context: &str) -> T;
}

impl<T, E> OrFatal<T> for std::result::Result<T, E>
where
    E: Display + ErrorCode,
{
    #[track_caller]
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                let location = Location::caller();
                report(location, &format_args!("{context}: {err}"), err.code());
                abort()
            }
        }
    }
}

/// Formats a status code the way the platform tools print it.
pub fn format_code(code: i32) -> String {
    format!("0x{:08X}", code as u32)
}

fn report(location: &Location<'_>, message: &dyn Display, code: Option<i32>) {
    match code {
        Some(code) => error!(
            file = location.file(),
            line = location.line(),
            hresult = %format_code(code),
            "FATAL: {message}"
        ),
        None => error!(
            file = location.file(),
            line = location.line(),
            "FATAL: {message}"
        ),
    }

    // The subscriber may not be installed yet during early startup.
    let mut stderr = std::io::stderr().lock();
    let _ = match code {
        Some(code) => writeln!(
            stderr,
            "fatal error at {}:{} [{}]: {message}",
            location.file(),
            location.line(),
            format_code(code)
        ),
        None => writeln!(
            stderr,
            "fatal error at {}:{}: {message}",
            location.file(),
            location.line()
        ),
    };
    let _ = stderr.flush();
    let _ = std::io::stdout().flush();
}

fn abort() -> ! {
    break_into_debugger();
    std::process::abort()
}

#[cfg(windows)]
fn break_into_debugger() {
    use windows::Win32::System::Diagnostics::Debug::{DebugBreak, IsDebuggerPresent};

    // SAFETY: both calls only inspect or signal the current process.
    unsafe {
        if IsDebuggerPresent().as_bool() {
            DebugBreak();
        }
    }
}

#[cfg(not(windows))]
fn break_into_debugger() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_code_is_hresult_style() {
        // DXGI_ERROR_DEVICE_REMOVED
        assert_eq!(format_code(0x887A0005u32 as i32), "0x887A0005");
        assert_eq!(format_code(0), "0x00000000");
    }

    #[test]
    fn test_or_fatal_passes_values_through() {
        let ok: std::result::Result<u32, crate::Error> = Ok(7);
        assert_eq!(ok.or_fatal("unreachable"), 7);
    }
}
