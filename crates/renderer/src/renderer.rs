//! Main renderer orchestration.
//!
//! This module provides [`Renderer`], the single value that owns every GPU
//! object the renderer needs and drives the per-frame sequence:
//!
//! ```text
//! begin_frame   wait for the slot, reset its ring slot, allocator and list
//! setup_frame   tick the timer, write per-frame and per-view constants
//! record_frame  barriers, clears, bindings, one draw per mesh, overlay
//! submit_frame  execute, signal, close the ring slot, present
//! end_frame     read the next frame-in-flight index
//! ```
//!
//! Each step returns an error instead of aborting. The application decides
//! which errors are fatal, typically with [`forge_core::OrFatal`].
//!
//! # Resource Destruction Order
//!
//! Dropping the renderer flushes the GPU first. Fields are then dropped in
//! declaration order, which puts every resource before the device context
//! that created it.

use std::time::Duration;

use glam::{Mat4, Vec2, Vec3};
use tracing::{debug, error, info, warn};

use forge_core::{Settings, Timer};
use forge_rhi::descriptor::{
    Descriptor, DescriptorHandle, DescriptorHeapManager, DescriptorRange,
};
use forge_rhi::device::{DeviceConfig, DeviceContext};
use forge_rhi::hal::{Api, CommandList as _, Device as _, SurfaceHandle};
use forge_rhi::swapchain::{Swapchain, SwapchainConfig};
use forge_rhi::types::{
    CpuDescriptor, DescriptorHeapType, Format, GpuDescriptor, GpuVirtualAddress, PresentStatus,
    ResourceState, ScissorRect, Viewport,
};
use forge_rhi::{RhiError, RhiResult};
use forge_scene::Camera;

use crate::constant_buffers::ConstantBufferManager;
use crate::depth_buffer::DepthBuffer;
use crate::depth_convention::{DepthConvention, DepthMode};
use crate::frame_manager::{FramePhase, FrameScheduler};
use crate::frame_ring::FrameRing;
use crate::gpu_scene::MeshDraw;
use crate::overlay::Overlay;
use crate::sampler_table::SamplerTable;
use crate::scene_pipeline::{root_slot, ScenePipeline, ShaderSet};
use crate::ubo::{ObjectPsConstants, ObjectVsConstants, PerFrameConstants, PerViewConstants};

/// Longest wait on the swap chain's frame-latency object per frame.
const FRAME_LATENCY_TIMEOUT: Duration = Duration::from_secs(1);

/// Camera state for one frame.
///
/// The projection is not part of the view; the renderer builds it from the
/// lens and the active depth convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameView {
    /// World to view space.
    pub view: Mat4,
    pub camera_position: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl FrameView {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            view: camera.view_matrix(),
            camera_position: camera.position,
            fov_y: camera.fov_y,
            near: camera.near,
            far: camera.far,
        }
    }
}

impl Default for FrameView {
    fn default() -> Self {
        Self::from_camera(&Camera::default())
    }
}

/// The renderer: device, swap chain, depth buffer, constant memory and
/// the frame state machine.
pub struct Renderer<A: Api> {
    pipeline: ScenePipeline<A>,
    shaders: ShaderSet,
    samplers: SamplerTable,
    /// Null SRV bound as the texture table until a collaborator sets one.
    default_texture: Descriptor,
    texture_table: GpuDescriptor,
    constants: ConstantBufferManager<A>,
    frame_ring: FrameRing<A>,
    depth_buffer: DepthBuffer<A>,
    swapchain: Swapchain<A>,
    heaps: DescriptorHeapManager<A>,
    depth_convention: DepthConvention,
    scheduler: FrameScheduler,
    timer: Timer,
    clear_color: [f32; 4],
    /// Device context (destroyed last).
    ctx: DeviceContext<A>,
}

impl<A: Api> Renderer<A> {
    /// Creates the device and every renderer resource.
    ///
    /// # Arguments
    ///
    /// * `surface` - Window to present to, or a headless surface
    /// * `width`, `height` - Initial back-buffer extent
    /// * `settings` - Validated settings
    /// * `shaders` - Scene pipeline bytecode
    ///
    /// # Errors
    ///
    /// Returns an error if any GPU object cannot be created. All of these
    /// are fatal for the application.
    pub fn new(
        surface: &SurfaceHandle,
        width: u32,
        height: u32,
        settings: &Settings,
        shaders: ShaderSet,
    ) -> RhiResult<Self> {
        let ctx = DeviceContext::new(&DeviceConfig::from_settings(settings))?;
        Self::with_context(ctx, surface, width, height, settings, shaders)
    }

    /// Like [`new`](Self::new), on an existing instance.
    pub fn with_instance(
        instance: A::Instance,
        surface: &SurfaceHandle,
        width: u32,
        height: u32,
        settings: &Settings,
        shaders: ShaderSet,
    ) -> RhiResult<Self> {
        let ctx = DeviceContext::with_instance(instance, &DeviceConfig::from_settings(settings))?;
        Self::with_context(ctx, surface, width, height, settings, shaders)
    }

    fn with_context(
        ctx: DeviceContext<A>,
        surface: &SurfaceHandle,
        width: u32,
        height: u32,
        settings: &Settings,
        shaders: ShaderSet,
    ) -> RhiResult<Self> {
        let frames_in_flight = ctx.frames_in_flight();
        let heaps = DescriptorHeapManager::new(ctx.device(), &settings.descriptors)?;

        let swapchain = Swapchain::new(
            &ctx,
            &heaps,
            surface,
            &SwapchainConfig {
                width,
                height,
                format: Format::from(settings.back_buffer_format),
                vsync: settings.vsync,
            },
        )?;

        let depth_convention = DepthConvention::new(settings.depth_mode);
        let depth_buffer = DepthBuffer::new(
            ctx.device(),
            &heaps,
            swapchain.width(),
            swapchain.height(),
            Format::from(settings.depth_stencil_format),
            &depth_convention,
        )?;

        let frame_ring = FrameRing::new(
            ctx.device(),
            frames_in_flight,
            settings.ring_buffer_capacity_per_frame,
        )?;
        let constants = ConstantBufferManager::new(ctx.device(), frames_in_flight)?;
        let samplers = SamplerTable::new(ctx.device(), &heaps)?;

        let default_texture = heaps.allocate(DescriptorHeapType::ShaderResource)?;
        ctx.device()
            .create_null_shader_resource_view(default_texture.cpu());
        let texture_table = default_texture.gpu();

        let pipeline = ScenePipeline::new(
            ctx.device(),
            &shaders,
            swapchain.format(),
            depth_buffer.format(),
            &depth_convention,
        )?;

        let mut scheduler = FrameScheduler::new(frames_in_flight);
        scheduler.set_frame_index(swapchain.current_frame_in_flight_index());

        info!(
            "Renderer initialized: {}x{}, {} frames in flight, {:?}",
            swapchain.width(),
            swapchain.height(),
            frames_in_flight,
            depth_convention.mode()
        );

        Ok(Self {
            pipeline,
            shaders,
            samplers,
            default_texture,
            texture_table,
            constants,
            frame_ring,
            depth_buffer,
            swapchain,
            heaps,
            depth_convention,
            scheduler,
            timer: Timer::new(),
            clear_color: settings.clear_color,
            ctx,
        })
    }

    /// Acquires the slot of the next frame and opens the command list on it.
    ///
    /// Blocks until the GPU has retired the slot's previous submission.
    pub fn begin_frame(&mut self) -> RhiResult<()> {
        self.scheduler.require_idle("begin_frame")?;
        let frame = self.swapchain.current_frame_in_flight_index();

        if !self.swapchain.wait_for_frame_latency(FRAME_LATENCY_TIMEOUT)? {
            warn!("Frame latency wait timed out after {:?}", FRAME_LATENCY_TIMEOUT);
        }
        self.ctx.wait_for_gpu(frame)?;
        self.frame_ring.begin_frame(&self.ctx, frame)?;
        self.ctx.reset_command_allocator(frame)?;
        self.ctx.reset_command_list(frame)?;

        self.scheduler.begin(frame)
    }

    /// Ticks the timer and writes this frame's per-frame and per-view
    /// constants.
    pub fn setup_frame(&mut self, view: &FrameView) -> RhiResult<()> {
        self.scheduler.setup()?;
        let frame = self.scheduler.frame_index();

        self.timer.tick();
        let size = Vec2::new(self.swapchain.width() as f32, self.swapchain.height() as f32);
        let per_frame = PerFrameConstants {
            time: self.timer.elapsed_secs(),
            delta_time: self.timer.delta_secs(),
            frame_number: self.scheduler.frame_count() as u32,
            depth_mode: self.depth_convention.mode().index(),
            viewport_size: size,
            inv_viewport_size: size.recip(),
        };
        self.constants.update_per_frame(frame, &per_frame)?;

        let projection =
            self.depth_convention
                .perspective(view.fov_y, size.x / size.y, view.near, view.far);
        let per_view = PerViewConstants::new(
            view.view,
            projection,
            view.camera_position,
            view.near,
            view.far,
        );
        self.constants.update_per_view(frame, &per_view)
    }

    /// Records the scene pass into the frame's command list.
    ///
    /// The back buffer and depth buffer are transitioned in and back out, so
    /// both rest in their between-frame states afterwards. `overlay` draws
    /// last, after every mesh.
    ///
    /// # Errors
    ///
    /// [`RhiError::FrameOutOfOrder`] outside the `SetUp` phase. Any other
    /// error, such as ring exhaustion, leaves the frame half recorded with
    /// the command list open. The renderer cannot continue after that and
    /// every later frame, resize or depth switch fails with
    /// [`RhiError::FrameOutOfOrder`]; escalate it as fatal.
    pub fn record_frame(
        &mut self,
        draws: &[MeshDraw],
        overlay: &mut dyn Overlay<A>,
    ) -> RhiResult<()> {
        self.scheduler.require("record_frame", FramePhase::SetUp)?;
        let frame = self.scheduler.frame_index();

        self.swapchain.transition_to_render_target(&mut self.ctx)?;
        self.depth_buffer.transition_to_depth_write(&mut self.ctx)?;

        let viewport = self.viewport();
        let scissor = self.swapchain.default_scissor();
        let rtv = self.swapchain.current_rtv();
        let dsv = self.depth_buffer.dsv();
        let per_frame = self.constants.per_frame_gpu_address(frame)?;
        let per_view = self.constants.per_view_gpu_address(frame)?;
        let stencil = self.depth_buffer.has_stencil().then_some(0);

        let list = self.ctx.command_list()?;
        list.set_graphics_root_signature(self.pipeline.root_signature());
        list.set_pipeline_state(self.pipeline.pipeline());
        list.set_viewports(&[viewport]);
        list.set_scissor_rects(&[scissor]);
        list.set_render_targets(&[rtv], Some(dsv));
        list.clear_render_target_view(rtv, self.clear_color);
        list.clear_depth_stencil_view(dsv, Some(self.depth_buffer.clear_depth()), stencil);

        list.set_descriptor_heaps(&self.heaps.shader_visible_heaps());
        list.set_graphics_root_constant_buffer_view(root_slot::PER_FRAME, per_frame);
        list.set_graphics_root_constant_buffer_view(root_slot::PER_VIEW, per_view);
        list.set_graphics_root_descriptor_table(root_slot::TEXTURES, self.texture_table);
        list.set_graphics_root_descriptor_table(root_slot::SAMPLERS, self.samplers.gpu_base());

        for draw in draws {
            let object_vs = self
                .constants
                .update_per_object_vs(&self.frame_ring, &draw.object_vs)?;
            let object_ps = self
                .constants
                .update_per_object_ps(&self.frame_ring, &draw.object_ps)?;

            list.set_vertex_buffers(0, &[draw.vertex_view]);
            list.set_index_buffer(Some(&draw.index_view));
            list.set_primitive_topology(draw.topology);
            list.set_graphics_root_constant_buffer_view(root_slot::OBJECT_VS, object_vs);
            list.set_graphics_root_constant_buffer_view(root_slot::OBJECT_PS, object_ps);
            list.draw_indexed_instanced(draw.index_count, 1, 0, 0, 0);
        }

        overlay.render(list)?;

        self.depth_buffer.transition_to_depth_read(&mut self.ctx)?;
        self.swapchain.transition_to_present(&mut self.ctx)?;

        self.scheduler.record()
    }

    /// Executes the command list, signals the frame's fence value and
    /// presents.
    ///
    /// An out-of-date swap chain is recreated at its current extent.
    pub fn submit_frame(&mut self) -> RhiResult<PresentStatus> {
        self.scheduler.require("submit_frame", FramePhase::Recorded)?;

        self.ctx.execute_and_close()?;
        let fence_value = self.ctx.signal()?;
        self.frame_ring.end_frame(fence_value);
        self.scheduler.submit()?;

        let status = self.swapchain.present()?;
        match status {
            PresentStatus::Presented => {}
            PresentStatus::Occluded => debug!("Window occluded, frame not shown"),
            PresentStatus::OutOfDate => self.recreate_swapchain()?,
        }
        Ok(status)
    }

    /// Reads the next frame-in-flight index from the swap chain.
    pub fn end_frame(&mut self) -> RhiResult<()> {
        self.scheduler.require("end_frame", FramePhase::Submitted)?;
        let next = self.swapchain.advance_frame_in_flight_index();
        self.scheduler.end(next)
    }

    /// Runs one whole frame.
    pub fn render_frame(
        &mut self,
        view: &FrameView,
        draws: &[MeshDraw],
        overlay: &mut dyn Overlay<A>,
    ) -> RhiResult<PresentStatus> {
        self.begin_frame()?;
        self.setup_frame(view)?;
        self.record_frame(draws, overlay)?;
        let status = self.submit_frame()?;
        self.end_frame()?;
        Ok(status)
    }

    /// Resizes the back buffers and the depth buffer.
    ///
    /// Only allowed between frames. A zero extent (a minimized window) or
    /// the current extent is skipped and returns `Ok(false)`. The GPU is
    /// flushed before any buffer is released; RTV and DSV slots are reused.
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<bool> {
        self.scheduler.require_idle("resize")?;
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return Ok(false);
        }
        if width == self.swapchain.width() && height == self.swapchain.height() {
            return Ok(false);
        }

        self.ctx.flush()?;
        self.swapchain.resize(&self.ctx, width, height)?;
        self.depth_buffer
            .resize(self.ctx.device(), width, height, &self.depth_convention)?;
        self.scheduler
            .set_frame_index(self.swapchain.current_frame_in_flight_index());
        info!("Renderer resized to {}x{}", width, height);
        Ok(true)
    }

    fn recreate_swapchain(&mut self) -> RhiResult<()> {
        warn!("Swap chain out of date, recreating");
        self.ctx.flush()?;
        self.swapchain.recreate(&self.ctx)
    }

    /// Switches the depth convention between frames.
    ///
    /// Subscribers of the convention are notified, then the GPU is flushed
    /// and the depth buffer and pipeline are rebuilt for the new clear value
    /// and compare function. Returns whether the mode changed.
    pub fn set_depth_mode(&mut self, mode: DepthMode) -> RhiResult<bool> {
        self.scheduler.require_idle("set_depth_mode")?;
        if !self.depth_convention.set_mode(mode) {
            return Ok(false);
        }
        self.ctx.flush()?;
        self.depth_buffer
            .rebuild(self.ctx.device(), &self.depth_convention)?;
        self.pipeline
            .rebuild(self.ctx.device(), &self.shaders, &self.depth_convention)?;
        Ok(true)
    }

    /// Waits for all submitted GPU work.
    pub fn flush(&mut self) -> RhiResult<()> {
        self.ctx.flush()
    }

    /// Full-window viewport with the depth range of the active convention.
    pub fn viewport(&self) -> Viewport {
        let (min_depth, max_depth) = self.depth_convention.depth_range();
        self.swapchain.default_viewport(min_depth, max_depth)
    }

    pub fn scissor(&self) -> ScissorRect {
        self.swapchain.default_scissor()
    }

    /// Binds `table` as the texture SRV table from the next recorded frame.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] for a descriptor that is not shader
    /// visible.
    pub fn set_texture_table(&mut self, table: GpuDescriptor) -> RhiResult<()> {
        if table.is_null() {
            return Err(RhiError::InvalidArgument(
                "texture table must be a shader-visible descriptor".into(),
            ));
        }
        self.texture_table = table;
        Ok(())
    }

    /// Goes back to the null texture table.
    pub fn reset_texture_table(&mut self) {
        self.texture_table = self.default_texture.gpu();
    }

    #[inline]
    pub fn texture_table(&self) -> GpuDescriptor {
        self.texture_table
    }

    // Descriptor allocation for collaborators.

    pub fn allocate_descriptor(&self, ty: DescriptorHeapType) -> RhiResult<DescriptorHandle> {
        self.heaps.allocate_handle(ty)
    }

    pub fn free_descriptor(&self, ty: DescriptorHeapType, handle: DescriptorHandle) -> bool {
        self.heaps.free(ty, handle)
    }

    pub fn allocate_contiguous(
        &self,
        ty: DescriptorHeapType,
        count: u32,
    ) -> RhiResult<DescriptorRange> {
        self.heaps.allocate_contiguous(ty, count)
    }

    pub fn free_contiguous(&self, ty: DescriptorHeapType, first: DescriptorHandle, count: u32) -> u32 {
        self.heaps.free_contiguous(ty, first, count)
    }

    pub fn allocate_raw(&self, ty: DescriptorHeapType) -> RhiResult<(CpuDescriptor, GpuDescriptor)> {
        self.heaps.allocate_raw(ty)
    }

    pub fn free_raw(&self, ty: DescriptorHeapType, cpu: CpuDescriptor, gpu: GpuDescriptor) -> bool {
        self.heaps.free_raw(ty, cpu, gpu)
    }

    // Constant-buffer addresses for the current frame.

    pub fn per_frame_gpu_address(&self) -> RhiResult<GpuVirtualAddress> {
        self.constants
            .per_frame_gpu_address(self.scheduler.frame_index())
    }

    pub fn per_view_gpu_address(&self) -> RhiResult<GpuVirtualAddress> {
        self.constants
            .per_view_gpu_address(self.scheduler.frame_index())
    }

    /// Copies per-object vertex constants into the frame ring. The address
    /// is valid for the current frame only.
    pub fn update_per_object_vs(&self, constants: &ObjectVsConstants) -> RhiResult<GpuVirtualAddress> {
        self.require_open_frame("update_per_object_vs")?;
        self.constants
            .update_per_object_vs(&self.frame_ring, constants)
    }

    /// Copies per-object pixel constants into the frame ring. The address
    /// is valid for the current frame only.
    pub fn update_per_object_ps(&self, constants: &ObjectPsConstants) -> RhiResult<GpuVirtualAddress> {
        self.require_open_frame("update_per_object_ps")?;
        self.constants
            .update_per_object_ps(&self.frame_ring, constants)
    }

    fn require_open_frame(&self, operation: &'static str) -> RhiResult<()> {
        if self.scheduler.is_recording() {
            return Ok(());
        }
        Err(RhiError::FrameOutOfOrder {
            operation,
            phase: self.scheduler.phase().name(),
        })
    }

    /// The frame's command list, while it is open.
    pub fn command_list(&mut self) -> RhiResult<&mut A::CommandList> {
        self.ctx.command_list()
    }

    /// Records a transition on the frame's command list.
    pub fn barrier(
        &mut self,
        resource: &A::Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        self.ctx.barrier(resource, before, after)
    }

    // Accessors

    #[inline]
    pub fn device(&self) -> &A::Device {
        self.ctx.device()
    }

    #[inline]
    pub fn context(&self) -> &DeviceContext<A> {
        &self.ctx
    }

    #[inline]
    pub fn heaps(&self) -> &DescriptorHeapManager<A> {
        &self.heaps
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain<A> {
        &self.swapchain
    }

    #[inline]
    pub fn depth_buffer(&self) -> &DepthBuffer<A> {
        &self.depth_buffer
    }

    /// The active depth convention. Subscribe here to hear about
    /// [`set_depth_mode`](Self::set_depth_mode) changes.
    #[inline]
    pub fn depth_convention(&self) -> &DepthConvention {
        &self.depth_convention
    }

    #[inline]
    pub fn frame_ring(&self) -> &FrameRing<A> {
        &self.frame_ring
    }

    #[inline]
    pub fn constants(&self) -> &ConstantBufferManager<A> {
        &self.constants
    }

    #[inline]
    pub fn samplers(&self) -> &SamplerTable {
        &self.samplers
    }

    #[inline]
    pub fn pipeline(&self) -> &ScenePipeline<A> {
        &self.pipeline
    }

    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    #[inline]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Slot of the current frame, or of the next one between frames.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.scheduler.frame_index()
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.scheduler.frame_count()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.ctx.frames_in_flight()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.swapchain.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.swapchain.height()
    }

    #[inline]
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }
}

impl<A: Api> Drop for Renderer<A> {
    fn drop(&mut self) {
        if self.scheduler.phase() != FramePhase::Idle {
            warn!("Renderer dropped mid-frame ({})", self.scheduler.phase());
        }
        if let Err(e) = self.ctx.flush() {
            error!("Failed to flush GPU during shutdown: {}", e);
        }
        info!(
            "Renderer shut down after {} frames",
            self.scheduler.frame_count()
        );
    }
}
