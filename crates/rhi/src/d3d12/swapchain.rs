use std::time::Duration;

use raw_window_handle::RawWindowHandle;
use tracing::{debug, warn};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::WaitForSingleObject;
use windows::core::Interface;

use super::{D3d12, D3d12Resource, conv};
use crate::error::{ApiContext, RhiError, RhiResult};
use crate::hal::{self, SurfaceHandle};
use crate::types::{PresentStatus, SwapchainDesc, SwapchainFlags};

/// Flip-discard swap chain bound to a Win32 window.
pub struct D3d12Swapchain {
    raw: IDXGISwapChain3,
    /// Frame-latency waitable object, when created with the flag.
    waitable: Option<HANDLE>,
}

// SAFETY: DXGI swap chains may be used from any thread, one at a time.
unsafe impl Send for D3d12Swapchain {}

fn raw_flags(flags: SwapchainFlags) -> u32 {
    let mut raw = 0;
    if flags.contains(SwapchainFlags::FRAME_LATENCY_WAITABLE) {
        raw |= DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0 as u32;
    }
    if flags.contains(SwapchainFlags::ALLOW_TEARING) {
        raw |= DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32;
    }
    raw
}

impl D3d12Swapchain {
    pub(super) fn new(
        factory: &IDXGIFactory6,
        queue: &ID3D12CommandQueue,
        surface: &SurfaceHandle,
        desc: &SwapchainDesc,
    ) -> RhiResult<Self> {
        let hwnd = match surface.raw {
            Some(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut _),
            Some(other) => {
                return Err(RhiError::SurfaceError(format!(
                    "unsupported window handle {other:?}"
                )));
            }
            None => {
                return Err(RhiError::SurfaceError(
                    "a window is required for a D3D12 swap chain".into(),
                ));
            }
        };

        let raw_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: conv::format(desc.format),
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: raw_flags(desc.flags),
        };

        let swapchain = unsafe { factory.CreateSwapChainForHwnd(queue, hwnd, &raw_desc, None, None) }
            .context("CreateSwapChainForHwnd")?;
        // Fullscreen transitions are handled by the window, not by Alt+Enter.
        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) }
            .context("MakeWindowAssociation")?;
        let raw: IDXGISwapChain3 = swapchain.cast().context("IDXGISwapChain3 cast")?;

        let waitable = desc
            .flags
            .contains(SwapchainFlags::FRAME_LATENCY_WAITABLE)
            .then(|| unsafe { raw.GetFrameLatencyWaitableObject() });

        debug!(
            "Created DXGI swap chain {}x{} with {} buffers",
            desc.width, desc.height, desc.buffer_count
        );
        Ok(Self { raw, waitable })
    }
}

impl hal::Swapchain for D3d12Swapchain {
    type A = D3d12;

    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.raw.GetCurrentBackBufferIndex() }
    }

    fn back_buffer(&self, index: u32) -> RhiResult<D3d12Resource> {
        let raw: ID3D12Resource =
            unsafe { self.raw.GetBuffer(index) }.context("IDXGISwapChain::GetBuffer")?;
        let desc = unsafe { raw.GetDesc() };
        Ok(D3d12Resource {
            raw,
            size: desc.Width * u64::from(desc.Height),
            gpu_address: 0,
        })
    }

    fn resize_buffers(
        &mut self,
        buffer_count: u32,
        width: u32,
        height: u32,
        flags: SwapchainFlags,
    ) -> RhiResult<()> {
        unsafe {
            self.raw.ResizeBuffers(
                buffer_count,
                width,
                height,
                DXGI_FORMAT_UNKNOWN,
                DXGI_SWAP_CHAIN_FLAG(raw_flags(flags) as i32),
            )
        }
        .context("IDXGISwapChain::ResizeBuffers")
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> RhiResult<PresentStatus> {
        let flags = if allow_tearing {
            DXGI_PRESENT_ALLOW_TEARING
        } else {
            DXGI_PRESENT(0)
        };
        let hr = unsafe { self.raw.Present(sync_interval, flags) };
        if hr == DXGI_STATUS_OCCLUDED {
            return Ok(PresentStatus::Occluded);
        }
        if hr == DXGI_ERROR_DEVICE_REMOVED || hr == DXGI_ERROR_DEVICE_RESET {
            return Err(RhiError::Api {
                context: "IDXGISwapChain::Present (device lost)",
                code: hr.0,
                message: hr.message().to_string(),
            });
        }
        hr.ok().context("IDXGISwapChain::Present")?;
        Ok(PresentStatus::Presented)
    }

    fn set_maximum_frame_latency(&self, latency: u32) -> RhiResult<()> {
        unsafe { self.raw.SetMaximumFrameLatency(latency) }
            .context("IDXGISwapChain2::SetMaximumFrameLatency")
    }

    fn wait_for_frame_latency(&self, timeout: Duration) -> RhiResult<bool> {
        let Some(handle) = self.waitable else {
            return Ok(true);
        };
        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        match unsafe { WaitForSingleObject(handle, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            other => Err(RhiError::SwapchainError(format!(
                "frame latency wait returned {:#x}",
                other.0
            ))),
        }
    }
}

impl Drop for D3d12Swapchain {
    fn drop(&mut self) {
        if let Some(handle) = self.waitable.take() {
            if let Err(e) = unsafe { CloseHandle(handle) } {
                warn!("Failed to close frame latency handle: {}", e);
            }
        }
    }
}
