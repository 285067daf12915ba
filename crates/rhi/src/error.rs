//! RHI-specific error types.

use thiserror::Error;

use crate::types::{DescriptorHeapType, ResourceState, ShaderModel};

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// A native API call failed
    #[error("{context} failed with {}: {message}", hex(.code))]
    Api {
        context: &'static str,
        code: i32,
        message: String,
    },

    /// No adapter supports the required feature level
    #[error("No suitable GPU adapter found for feature level {0}")]
    NoSuitableAdapter(String),

    /// The device does not reach the minimum shader model
    #[error("Shader model {supported} is below the required {required}")]
    UnsupportedShaderModel {
        required: ShaderModel,
        supported: ShaderModel,
    },

    /// A command list operation was issued in the wrong recording state
    #[error("Command list is {actual}, expected {expected}")]
    CommandListState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A command allocator was reset while the GPU may still read from it
    #[error("Command allocator {frame} still in use: fence at {completed}, needs {required}")]
    AllocatorInUse {
        frame: usize,
        required: u64,
        completed: u64,
    },

    /// A bounded fence wait expired
    #[error("GPU hang: fence value {value} not reached within {timeout_ms} ms")]
    GpuTimeout { value: u64, timeout_ms: u64 },

    /// A fence wait failed or can never complete
    #[error("Fence wait failed: {0}")]
    FenceWait(String),

    /// A descriptor heap has no free slots left
    #[error("{heap:?} descriptor heap exhausted (capacity {capacity}, requested {requested})")]
    DescriptorHeapExhausted {
        heap: DescriptorHeapType,
        capacity: u32,
        requested: u32,
    },

    /// A descriptor index lies outside its heap
    #[error("{heap:?} descriptor index {index} out of range (capacity {capacity})")]
    DescriptorIndexOutOfRange {
        heap: DescriptorHeapType,
        index: u32,
        capacity: u32,
    },

    /// A per-frame ring slot cannot satisfy an allocation
    #[error("Frame ring exhausted: {requested} bytes at offset {offset} exceeds capacity {capacity}")]
    RingBufferExhausted {
        requested: u64,
        offset: u64,
        capacity: u64,
    },

    /// A barrier's before-state disagrees with the tracked state
    #[error("Resource state mismatch on {resource}: expected {expected:?}, tracked {actual:?}")]
    StateMismatch {
        resource: String,
        expected: ResourceState,
        actual: ResourceState,
    },

    /// The debug layer reported an error
    #[error("GPU validation error: {0}")]
    Validation(String),

    /// Frame operations were called out of order
    #[error("{operation} called while the frame is {phase}")]
    FrameOutOfOrder {
        operation: &'static str,
        phase: &'static str,
    },

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Shader bytecode error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid argument passed to an RHI call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error while reading GPU inputs
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RhiError {
    /// Native status code carried by this error, if any.
    pub fn hresult(&self) -> Option<i32> {
        match self {
            RhiError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl forge_core::ErrorCode for RhiError {
    fn code(&self) -> Option<i32> {
        self.hresult()
    }
}

impl From<RhiError> for forge_core::Error {
    fn from(err: RhiError) -> Self {
        forge_core::Error::Gpu(err.to_string())
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for RhiError {
    fn from(err: windows::core::Error) -> Self {
        RhiError::Api {
            context: "D3D12",
            code: err.code().0,
            message: err.message().to_string(),
        }
    }
}

/// Attaches an operation name to native API failures.
#[cfg(windows)]
pub(crate) trait ApiContext<T> {
    fn context(self, context: &'static str) -> RhiResult<T>;
}

#[cfg(windows)]
impl<T> ApiContext<T> for windows::core::Result<T> {
    fn context(self, context: &'static str) -> RhiResult<T> {
        self.map_err(|err| RhiError::Api {
            context,
            code: err.code().0,
            message: err.message().to_string(),
        })
    }
}

fn hex(code: &i32) -> String {
    forge_core::format_code(*code)
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_formats_hresult() {
        let err = RhiError::Api {
            context: "CreateCommittedResource",
            code: 0x8007000Eu32 as i32,
            message: "out of memory".into(),
        };
        assert_eq!(
            err.to_string(),
            "CreateCommittedResource failed with 0x8007000E: out of memory"
        );
        assert_eq!(err.hresult(), Some(0x8007000Eu32 as i32));
    }

    #[test]
    fn test_errors_without_code() {
        let err = RhiError::GpuTimeout {
            value: 3,
            timeout_ms: 100,
        };
        assert_eq!(err.hresult(), None);
    }
}
