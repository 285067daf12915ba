//! Swap chain management.
//!
//! This module provides [`Swapchain`], which owns the back buffers, one
//! render-target view per buffer, and the frame-in-flight index.
//!
//! # Overview
//!
//! The swap chain uses the flip-discard model with one back buffer per frame
//! in flight. The frame-in-flight index is the swap chain's current
//! back-buffer index: it is read at creation, after every resize, and once
//! at the end of each frame through [`Swapchain::advance_frame_in_flight_index`].
//!
//! Two optional creation flags are used when available:
//! - frame-latency-waitable, whenever more than one frame is in flight
//! - allow-tearing, when the instance reports support for it
//!
//! # Resizing
//!
//! [`Swapchain::resize`] drops the back buffers, resizes the swap chain and
//! writes new views into the *same* RTV slots, so handles cached by callers
//! stay valid. The GPU must be idle; the renderer flushes before resizing.
//!
//! # Example
//!
//! ```no_run
//! use forge_rhi::descriptor::DescriptorHeapManager;
//! use forge_rhi::device::DeviceContext;
//! use forge_rhi::hal::SurfaceHandle;
//! use forge_rhi::null::Null;
//! use forge_rhi::swapchain::{Swapchain, SwapchainConfig};
//!
//! # fn example(
//! #     ctx: &mut DeviceContext<Null>,
//! #     heaps: &DescriptorHeapManager<Null>,
//! # ) -> forge_rhi::RhiResult<()> {
//! let mut swapchain = Swapchain::new(
//!     ctx,
//!     heaps,
//!     &SurfaceHandle::headless(),
//!     &SwapchainConfig::default(),
//! )?;
//!
//! swapchain.transition_to_render_target(ctx)?;
//! // ... draw into swapchain.current_rtv() ...
//! swapchain.transition_to_present(ctx)?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::descriptor::{Descriptor, DescriptorHeapManager};
use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult};
use crate::hal::{self, Api, Device, Instance, SurfaceHandle};
use crate::types::{
    CpuDescriptor, DescriptorHeapType, Format, PresentStatus, ResourceState, ScissorRect,
    SwapchainDesc, SwapchainFlags, Viewport,
};

/// Swap chain creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// Present with sync interval 1 when set.
    pub vsync: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: Format::Bgra8Unorm,
            vsync: true,
        }
    }
}

struct BackBuffer<A: Api> {
    resource: A::Resource,
    state: ResourceState,
}

/// Flip-discard swap chain with one back buffer per frame in flight.
pub struct Swapchain<A: Api> {
    back_buffers: Vec<BackBuffer<A>>,
    rtvs: Vec<Descriptor>,
    raw: A::Swapchain,
    format: Format,
    width: u32,
    height: u32,
    flags: SwapchainFlags,
    vsync: bool,
    tearing: bool,
    frame_index: usize,
}

impl<A: Api> Swapchain<A> {
    /// Creates the swap chain with `ctx.frames_in_flight()` buffers.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Device context providing the instance, device and queue
    /// * `heaps` - Heaps the render-target views are allocated from
    /// * `surface` - Window to present to
    /// * `config` - Extent, format and vsync
    ///
    /// # Errors
    ///
    /// Returns an error if the RTV heap is exhausted or swap chain creation
    /// fails.
    pub fn new(
        ctx: &DeviceContext<A>,
        heaps: &DescriptorHeapManager<A>,
        surface: &SurfaceHandle,
        config: &SwapchainConfig,
    ) -> RhiResult<Self> {
        let buffer_count = ctx.frames_in_flight() as u32;

        let rtvs = (0..buffer_count)
            .map(|_| heaps.allocate(DescriptorHeapType::RenderTarget))
            .collect::<RhiResult<Vec<_>>>()?;

        let tearing = ctx.instance().supports_tearing();
        let mut flags = SwapchainFlags::empty();
        if buffer_count > 1 {
            flags |= SwapchainFlags::FRAME_LATENCY_WAITABLE;
        }
        if tearing {
            flags |= SwapchainFlags::ALLOW_TEARING;
        }

        let raw = ctx.instance().create_swapchain(
            ctx.queue(),
            surface,
            &SwapchainDesc {
                width: config.width,
                height: config.height,
                format: config.format,
                buffer_count,
                flags,
            },
        )?;

        if flags.contains(SwapchainFlags::FRAME_LATENCY_WAITABLE) {
            hal::Swapchain::set_maximum_frame_latency(&raw, buffer_count)?;
        }

        let mut swapchain = Self {
            back_buffers: Vec::new(),
            rtvs,
            raw,
            format: config.format,
            width: config.width,
            height: config.height,
            flags,
            vsync: config.vsync,
            tearing,
            frame_index: 0,
        };
        swapchain.create_views(ctx.device())?;

        info!(
            "Swapchain created: {}x{}, {:?}, {} buffers, tearing {}",
            config.width, config.height, config.format, buffer_count, tearing
        );

        Ok(swapchain)
    }

    /// Fetches the back buffers, writes their RTVs and refreshes the
    /// frame-in-flight index.
    fn create_views(&mut self, device: &A::Device) -> RhiResult<()> {
        self.back_buffers.clear();
        for (i, rtv) in self.rtvs.iter().enumerate() {
            let resource = hal::Swapchain::back_buffer(&self.raw, i as u32)?;
            device.create_render_target_view(&resource, self.format, rtv.cpu());
            self.back_buffers.push(BackBuffer {
                resource,
                state: ResourceState::Present,
            });
        }
        self.frame_index = hal::Swapchain::current_back_buffer_index(&self.raw) as usize;
        Ok(())
    }

    /// Resizes the back buffers.
    ///
    /// A zero extent (minimized window) is skipped and the current extent is
    /// a no-op; both return `Ok(false)`. The RTV slots are kept.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the buffers cannot be resized, which
    /// includes GPU work still in flight.
    pub fn resize(&mut self, ctx: &DeviceContext<A>, width: u32, height: u32) -> RhiResult<bool> {
        if width == 0 || height == 0 {
            debug!("Skipping swapchain resize to {}x{}", width, height);
            return Ok(false);
        }
        if width == self.width && height == self.height {
            return Ok(false);
        }
        self.resize_buffers(ctx, width, height)?;
        info!("Swapchain resized to {}x{}", width, height);
        Ok(true)
    }

    /// Recreates the buffers at the current extent, after a present reported
    /// [`PresentStatus::OutOfDate`]. The RTV slots are kept.
    pub fn recreate(&mut self, ctx: &DeviceContext<A>) -> RhiResult<()> {
        self.resize_buffers(ctx, self.width, self.height)?;
        info!("Swapchain recreated at {}x{}", self.width, self.height);
        Ok(())
    }

    fn resize_buffers(&mut self, ctx: &DeviceContext<A>, width: u32, height: u32) -> RhiResult<()> {
        // Every back-buffer reference must be gone before ResizeBuffers.
        self.back_buffers.clear();
        hal::Swapchain::resize_buffers(
            &mut self.raw,
            self.rtvs.len() as u32,
            width,
            height,
            self.flags,
        )?;
        self.width = width;
        self.height = height;
        self.create_views(ctx.device())
    }

    /// Presents the current back buffer.
    ///
    /// With vsync the sync interval is 1; without it the interval is 0 and
    /// tearing is allowed when supported.
    pub fn present(&mut self) -> RhiResult<PresentStatus> {
        let (sync_interval, allow_tearing) = if self.vsync {
            (1, false)
        } else {
            (0, self.tearing)
        };
        let status = hal::Swapchain::present(&mut self.raw, sync_interval, allow_tearing)?;
        if status != PresentStatus::Presented {
            warn!("Present returned {:?}", status);
        }
        Ok(status)
    }

    /// Transitions the current back buffer from `Present` to `RenderTarget`.
    pub fn transition_to_render_target(&mut self, ctx: &mut DeviceContext<A>) -> RhiResult<()> {
        self.transition(ctx, ResourceState::Present, ResourceState::RenderTarget)
    }

    /// Transitions the current back buffer from `RenderTarget` to `Present`.
    pub fn transition_to_present(&mut self, ctx: &mut DeviceContext<A>) -> RhiResult<()> {
        self.transition(ctx, ResourceState::RenderTarget, ResourceState::Present)
    }

    fn transition(
        &mut self,
        ctx: &mut DeviceContext<A>,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        let index = self.frame_index;
        let buffer = self.back_buffers.get_mut(index).ok_or_else(|| {
            RhiError::SwapchainError(format!("no back buffer for frame index {index}"))
        })?;
        if !buffer.state.matches(before) {
            return Err(RhiError::StateMismatch {
                resource: format!("back buffer {index}"),
                expected: before,
                actual: buffer.state,
            });
        }
        ctx.barrier(&buffer.resource, before, after)?;
        buffer.state = after;
        Ok(())
    }

    /// Re-reads the current back-buffer index. Called once per frame, last.
    pub fn advance_frame_in_flight_index(&mut self) -> usize {
        self.frame_index = hal::Swapchain::current_back_buffer_index(&self.raw) as usize;
        self.frame_index
    }

    #[inline]
    pub fn current_frame_in_flight_index(&self) -> usize {
        self.frame_index
    }

    /// Waits on the frame-latency object, if the swap chain has one.
    pub fn wait_for_frame_latency(&self, timeout: Duration) -> RhiResult<bool> {
        if !self.flags.contains(SwapchainFlags::FRAME_LATENCY_WAITABLE) {
            return Ok(true);
        }
        hal::Swapchain::wait_for_frame_latency(&self.raw, timeout)
    }

    /// Full-window viewport with the given depth range.
    pub fn default_viewport(&self, min_depth: f32, max_depth: f32) -> Viewport {
        Viewport {
            x: 0.0,
            y: 0.0,
            width: self.width as f32,
            height: self.height as f32,
            min_depth,
            max_depth,
        }
    }

    pub fn default_scissor(&self) -> ScissorRect {
        ScissorRect {
            left: 0,
            top: 0,
            right: self.width as i32,
            bottom: self.height as i32,
        }
    }

    /// RTV of the current back buffer.
    #[inline]
    pub fn current_rtv(&self) -> CpuDescriptor {
        self.rtvs[self.frame_index].cpu()
    }

    /// Slot indices of the RTVs, in buffer order.
    pub fn rtv_indices(&self) -> Vec<u32> {
        self.rtvs.iter().map(Descriptor::index).collect()
    }

    pub fn current_back_buffer(&self) -> &A::Resource {
        &self.back_buffers[self.frame_index].resource
    }

    /// Tracked state of back buffer `index`.
    pub fn back_buffer_state(&self, index: usize) -> Option<ResourceState> {
        self.back_buffers.get(index).map(|b| b.state)
    }

    pub fn back_buffer(&self, index: usize) -> Option<&A::Resource> {
        self.back_buffers.get(index).map(|b| &b.resource)
    }

    #[inline]
    pub fn raw(&self) -> &A::Swapchain {
        &self.raw
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn flags(&self) -> SwapchainFlags {
        self.flags
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.rtvs.len()
    }

    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }
}

impl<A: Api> Drop for Swapchain<A> {
    fn drop(&mut self) {
        debug!("Destroyed swapchain ({} buffers)", self.rtvs.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use crate::null::Null;
    use forge_core::config::DescriptorCapacities;

    fn setup(frames: usize) -> (DeviceContext<Null>, DescriptorHeapManager<Null>) {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig {
            frames_in_flight: frames,
            ..DeviceConfig::default()
        })
        .unwrap();
        let heaps = DescriptorHeapManager::new(
            ctx.device(),
            &DescriptorCapacities {
                render_target: 8,
                depth_stencil: 2,
                shader_resource: 16,
                sampler: 64,
            },
        )
        .unwrap();
        (ctx, heaps)
    }

    fn swapchain(ctx: &DeviceContext<Null>, heaps: &DescriptorHeapManager<Null>) -> Swapchain<Null> {
        Swapchain::new(
            ctx,
            heaps,
            &SurfaceHandle::headless(),
            &SwapchainConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_creation_flags() {
        let (ctx, heaps) = setup(2);
        let swapchain = swapchain(&ctx, &heaps);
        assert!(swapchain.flags().contains(SwapchainFlags::FRAME_LATENCY_WAITABLE));
        assert!(swapchain.flags().contains(SwapchainFlags::ALLOW_TEARING));
        assert_eq!(swapchain.raw().max_frame_latency(), 2);
        assert_eq!(swapchain.rtv_indices(), vec![0, 1]);
        assert_eq!(swapchain.current_frame_in_flight_index(), 0);
    }

    #[test]
    fn test_single_buffer_is_not_waitable() {
        let (ctx, heaps) = setup(1);
        let swapchain = swapchain(&ctx, &heaps);
        assert!(!swapchain.flags().contains(SwapchainFlags::FRAME_LATENCY_WAITABLE));
        assert!(swapchain.wait_for_frame_latency(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_rtvs_point_at_back_buffers() {
        let (ctx, heaps) = setup(2);
        let swapchain = swapchain(&ctx, &heaps);
        let gpu = ctx.device().gpu();
        for (i, rtv) in swapchain.rtvs.iter().enumerate() {
            let buffer = swapchain.back_buffer(i).unwrap();
            assert_eq!(
                gpu.view(rtv.cpu()),
                Some(crate::null::ViewRecord::RenderTarget(buffer.id()))
            );
        }
    }

    #[test]
    fn test_transitions_track_state() {
        let (mut ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        ctx.reset_command_list(0).unwrap();

        assert!(matches!(
            swapchain.transition_to_present(&mut ctx),
            Err(RhiError::StateMismatch { .. })
        ));
        swapchain.transition_to_render_target(&mut ctx).unwrap();
        assert_eq!(swapchain.back_buffer_state(0), Some(ResourceState::RenderTarget));
        swapchain.transition_to_present(&mut ctx).unwrap();
        assert_eq!(swapchain.back_buffer_state(0), Some(ResourceState::Present));
        ctx.execute_and_close().unwrap();
    }

    #[test]
    fn test_present_advances_index() {
        let (ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        assert_eq!(swapchain.present().unwrap(), PresentStatus::Presented);
        assert_eq!(swapchain.current_frame_in_flight_index(), 0);
        assert_eq!(swapchain.advance_frame_in_flight_index(), 1);
    }

    #[test]
    fn test_present_without_vsync_allows_tearing() {
        let (ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        swapchain.set_vsync(false);
        assert_eq!(swapchain.present().unwrap(), PresentStatus::Presented);
    }

    #[test]
    fn test_resize_keeps_rtv_slots() {
        let (ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        let before = swapchain.rtv_indices();
        let old_buffer = swapchain.back_buffer(0).unwrap().id();

        assert!(swapchain.resize(&ctx, 1920, 1080).unwrap());
        assert_eq!(swapchain.rtv_indices(), before);
        assert_ne!(swapchain.back_buffer(0).unwrap().id(), old_buffer);
        assert_eq!(swapchain.default_viewport(1.0, 0.0).width, 1920.0);
        assert_eq!(
            swapchain.default_scissor(),
            ScissorRect {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080
            }
        );

        // Same extent again changes nothing.
        let current = swapchain.back_buffer(0).unwrap().id();
        assert!(!swapchain.resize(&ctx, 1920, 1080).unwrap());
        assert_eq!(swapchain.back_buffer(0).unwrap().id(), current);
        assert_eq!(swapchain.rtv_indices(), before);
    }

    #[test]
    fn test_recreate_after_out_of_date() {
        let (ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        let before = swapchain.rtv_indices();
        let old_buffer = swapchain.back_buffer(1).unwrap().id();

        ctx.device().gpu().inject_present_status(PresentStatus::OutOfDate);
        assert_eq!(swapchain.present().unwrap(), PresentStatus::OutOfDate);
        swapchain.recreate(&ctx).unwrap();

        assert_eq!(swapchain.width(), 1280);
        assert_eq!(swapchain.rtv_indices(), before);
        assert_ne!(swapchain.back_buffer(1).unwrap().id(), old_buffer);
    }

    #[test]
    fn test_zero_extent_resize_is_skipped() {
        let (ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        assert!(!swapchain.resize(&ctx, 0, 720).unwrap());
        assert_eq!(swapchain.width(), 1280);
    }

    #[test]
    fn test_resize_with_pending_work_fails() {
        let (mut ctx, heaps) = setup(2);
        let mut swapchain = swapchain(&ctx, &heaps);
        ctx.signal().unwrap();
        assert!(swapchain.resize(&ctx, 640, 480).is_err());
        ctx.flush().unwrap();
    }
}
