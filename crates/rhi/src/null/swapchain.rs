use std::sync::Arc;
use std::time::Duration;

use super::gpu::NullGpu;
use super::{Null, NullDevice, NullResource, new_resource};
use crate::error::{RhiError, RhiResult};
use crate::hal::Swapchain;
use crate::types::{PresentStatus, ResourceState, SwapchainDesc, SwapchainFlags};

/// Simulated flip-model swap chain.
///
/// Buffers are presented in order and the current index rotates on every
/// successful present. `ResizeBuffers` fails while any back-buffer reference
/// is held elsewhere or GPU work is still queued, as DXGI requires.
#[derive(Debug)]
pub struct NullSwapchain {
    gpu: Arc<NullGpu>,
    desc: SwapchainDesc,
    buffers: Vec<NullResource>,
    current: u32,
    max_frame_latency: u32,
}

impl NullSwapchain {
    pub(crate) fn new(gpu: Arc<NullGpu>, desc: &SwapchainDesc) -> RhiResult<Self> {
        if desc.buffer_count < 1 || desc.width == 0 || desc.height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "invalid swap chain {}x{} with {} buffers",
                desc.width, desc.height, desc.buffer_count
            )));
        }
        let mut swapchain = Self {
            gpu,
            desc: *desc,
            buffers: Vec::new(),
            current: 0,
            max_frame_latency: 3,
        };
        swapchain.create_buffers();
        Ok(swapchain)
    }

    fn create_buffers(&mut self) {
        let size = NullDevice::texture_size(self.desc.width, self.desc.height, self.desc.format);
        self.buffers = (0..self.desc.buffer_count)
            .map(|i| {
                new_resource(
                    &self.gpu,
                    &format!("back buffer {i}"),
                    size,
                    0,
                    None,
                    ResourceState::Present,
                )
            })
            .collect();
        self.current = 0;
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn flags(&self) -> SwapchainFlags {
        self.desc.flags
    }

    pub fn max_frame_latency(&self) -> u32 {
        self.max_frame_latency
    }
}

impl Swapchain for NullSwapchain {
    type A = Null;

    fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    fn back_buffer(&self, index: u32) -> RhiResult<NullResource> {
        self.buffers
            .get(index as usize)
            .cloned()
            .ok_or_else(|| RhiError::SwapchainError(format!("no back buffer {index}")))
    }

    fn resize_buffers(
        &mut self,
        buffer_count: u32,
        width: u32,
        height: u32,
        flags: SwapchainFlags,
    ) -> RhiResult<()> {
        if let Some(held) = self.buffers.iter().find(|b| b.ref_count() > 1) {
            return Err(RhiError::SwapchainError(format!(
                "ResizeBuffers with outstanding references to '{}'",
                held.label()
            )));
        }
        if self.gpu.has_pending_work() {
            return Err(RhiError::SwapchainError(
                "ResizeBuffers while GPU work is still queued".into(),
            ));
        }
        if width == 0 || height == 0 || buffer_count == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "ResizeBuffers to {width}x{height} with {buffer_count} buffers"
            )));
        }
        if flags != self.desc.flags {
            return Err(RhiError::InvalidArgument(
                "swap chain flags cannot change on resize".into(),
            ));
        }

        self.buffers.clear();
        self.desc.width = width;
        self.desc.height = height;
        self.desc.buffer_count = buffer_count;
        self.create_buffers();
        Ok(())
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> RhiResult<PresentStatus> {
        if allow_tearing
            && (sync_interval != 0 || !self.desc.flags.contains(SwapchainFlags::ALLOW_TEARING))
        {
            return Err(RhiError::Api {
                context: "Present",
                code: 0x887A0001u32 as i32,
                message: "tearing requires sync interval 0 and an ALLOW_TEARING swap chain".into(),
            });
        }
        let buffer = self.buffers[self.current as usize].id();
        if let Some(status) = self.gpu.present(buffer) {
            return Ok(status);
        }
        self.current = (self.current + 1) % self.desc.buffer_count;
        Ok(PresentStatus::Presented)
    }

    fn set_maximum_frame_latency(&self, latency: u32) -> RhiResult<()> {
        if !self.desc.flags.contains(SwapchainFlags::FRAME_LATENCY_WAITABLE) {
            return Err(RhiError::SwapchainError(
                "frame latency requires a waitable swap chain".into(),
            ));
        }
        if latency == 0 || latency > 16 {
            return Err(RhiError::InvalidArgument(format!(
                "frame latency {latency} out of range"
            )));
        }
        Ok(())
    }

    fn wait_for_frame_latency(&self, _timeout: Duration) -> RhiResult<bool> {
        if self.desc.flags.contains(SwapchainFlags::FRAME_LATENCY_WAITABLE) {
            self.gpu.note_frame_latency_wait();
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Format;

    fn swapchain(count: u32) -> NullSwapchain {
        NullSwapchain::new(
            NullGpu::new(true),
            &SwapchainDesc {
                width: 64,
                height: 32,
                format: Format::Bgra8Unorm,
                buffer_count: count,
                flags: SwapchainFlags::FRAME_LATENCY_WAITABLE,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_present_rotates_index() {
        let mut swapchain = swapchain(3);
        let order: Vec<u32> = (0..4)
            .map(|_| {
                let index = swapchain.current_back_buffer_index();
                swapchain.present(1, false).unwrap();
                index
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_resize_refuses_outstanding_references() {
        let mut swapchain = swapchain(2);
        let held = swapchain.back_buffer(1).unwrap();
        let err = swapchain
            .resize_buffers(2, 128, 64, SwapchainFlags::FRAME_LATENCY_WAITABLE)
            .unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
        drop(held);
        swapchain
            .resize_buffers(2, 128, 64, SwapchainFlags::FRAME_LATENCY_WAITABLE)
            .unwrap();
        assert_eq!(swapchain.width(), 128);
    }

    #[test]
    fn test_tearing_needs_flag() {
        let mut swapchain = swapchain(2);
        assert!(swapchain.present(0, true).is_err());
        assert!(swapchain.present(0, false).is_ok());
    }

    #[test]
    fn test_injected_out_of_date_does_not_rotate() {
        let mut swapchain = swapchain(2);
        swapchain.gpu.inject_present_status(PresentStatus::OutOfDate);
        assert_eq!(swapchain.present(1, false).unwrap(), PresentStatus::OutOfDate);
        assert_eq!(swapchain.current_back_buffer_index(), 0);
    }
}
