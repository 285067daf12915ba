//! Backend abstraction.
//!
//! The core is written once against these traits and instantiated with a
//! concrete [`Api`]: `d3d12::D3d12` on Windows, or
//! [`crate::null::Null`], a deterministic software model used by tests and
//! headless runs.
//!
//! Each trait mirrors the Direct3D 12 object of the same name. Methods that
//! record into a command list take `&mut self`; everything else is `&self`
//! and safe to call from any thread.

use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

use raw_window_handle::RawWindowHandle;

use crate::error::RhiResult;
use crate::pipeline::{GraphicsPipelineDesc, RootSignatureDesc};
use crate::types::{
    AdapterInfo, BufferDesc, CpuDescriptor, DebugMessage, DescriptorHeapDesc,
    DescriptorHeapType, FeatureLevel, Format, GpuDescriptor, GpuVirtualAddress, IndexBufferView,
    InstanceDesc, PowerPreference, PresentStatus, PrimitiveTopology, SamplerDesc, ScissorRect,
    ShaderModel, SwapchainDesc, SwapchainFlags, TextureDesc, TransitionBarrier, VertexBufferView,
    Viewport,
};

/// A graphics backend: the set of object types it provides.
pub trait Api: Clone + fmt::Debug + Sized + Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    type Instance: Instance<A = Self>;
    type Adapter: Adapter<A = Self>;
    type Device: Device<A = Self>;
    type Queue: Queue<A = Self>;
    type Fence: Fence;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<A = Self>;
    type DescriptorHeap: DescriptorHeap;
    type Resource: Resource;
    type Swapchain: Swapchain<A = Self>;
    type RootSignature: fmt::Debug + Send + Sync;
    type PipelineState: fmt::Debug + Send + Sync;
}

/// Window surface a swap chain is created for.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHandle {
    pub raw: Option<RawWindowHandle>,
}

impl SurfaceHandle {
    pub fn new(raw: RawWindowHandle) -> Self {
        Self { raw: Some(raw) }
    }

    /// A surface with no window behind it. Only the null backend accepts it.
    pub fn headless() -> Self {
        Self { raw: None }
    }
}

// SAFETY: the handle is an opaque window identifier; it is only dereferenced
// by the backend on the thread that creates the swap chain.
unsafe impl Send for SurfaceHandle {}
unsafe impl Sync for SurfaceHandle {}

/// Entry point: the DXGI factory on D3D12.
pub trait Instance: Sized + Send + Sync {
    type A: Api;

    fn init(desc: &InstanceDesc) -> RhiResult<Self>;

    /// Adapters in `preference` order, or in default order when `None`.
    fn enumerate_adapters(
        &self,
        preference: Option<PowerPreference>,
    ) -> RhiResult<Vec<<Self::A as Api>::Adapter>>;

    /// Whether presenting with tearing (variable refresh) is supported.
    fn supports_tearing(&self) -> bool;

    fn create_swapchain(
        &self,
        queue: &<Self::A as Api>::Queue,
        surface: &SurfaceHandle,
        desc: &SwapchainDesc,
    ) -> RhiResult<<Self::A as Api>::Swapchain>;
}

pub trait Adapter: Send + Sync {
    type A: Api;

    fn info(&self) -> &AdapterInfo;

    /// Checks, without keeping a device, that `level` is supported.
    fn probe(&self, level: FeatureLevel) -> bool;

    fn open(&self, level: FeatureLevel, validation: bool) -> RhiResult<<Self::A as Api>::Device>;
}

pub trait Device: Send + Sync {
    type A: Api;

    fn shader_model(&self) -> ShaderModel;

    /// Creates the direct (graphics) queue.
    fn create_queue(&self) -> RhiResult<<Self::A as Api>::Queue>;

    fn create_fence(&self, initial_value: u64) -> RhiResult<<Self::A as Api>::Fence>;

    fn create_command_allocator(&self) -> RhiResult<<Self::A as Api>::CommandAllocator>;

    /// Creates a command list bound to `allocator`, in the recording state.
    fn create_command_list(
        &self,
        allocator: &<Self::A as Api>::CommandAllocator,
    ) -> RhiResult<<Self::A as Api>::CommandList>;

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32;

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
    ) -> RhiResult<<Self::A as Api>::DescriptorHeap>;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<<Self::A as Api>::Resource>;

    fn create_texture(&self, desc: &TextureDesc<'_>) -> RhiResult<<Self::A as Api>::Resource>;

    fn create_render_target_view(
        &self,
        resource: &<Self::A as Api>::Resource,
        format: Format,
        dest: CpuDescriptor,
    );

    fn create_depth_stencil_view(
        &self,
        resource: &<Self::A as Api>::Resource,
        format: Format,
        dest: CpuDescriptor,
    );

    /// Writes a 2D SRV with no resource behind it; sampling returns zero.
    fn create_null_shader_resource_view(&self, dest: CpuDescriptor);

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor);

    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> RhiResult<<Self::A as Api>::RootSignature>;

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_, <Self::A as Api>::RootSignature>,
    ) -> RhiResult<<Self::A as Api>::PipelineState>;

    /// Removes and returns messages queued by the debug layer.
    fn drain_debug_messages(&self) -> Vec<DebugMessage>;
}

pub trait Queue: Send + Sync {
    type A: Api;

    /// Submits a closed command list.
    fn execute(&self, list: &<Self::A as Api>::CommandList) -> RhiResult<()>;

    /// Sets `fence` to `value` once all previously submitted work retires.
    fn signal(&self, fence: &<Self::A as Api>::Fence, value: u64) -> RhiResult<()>;
}

pub trait Fence: Send + Sync {
    fn completed_value(&self) -> u64;

    /// Blocks until the fence reaches `value`.
    ///
    /// Returns `Ok(false)` if `timeout` expired first.
    fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<bool>;
}

pub trait CommandAllocator: Send + Sync {
    /// Reclaims the memory of every list recorded from this allocator.
    fn reset(&self) -> RhiResult<()>;
}

pub trait DescriptorHeap: Send + Sync {
    fn cpu_start(&self) -> CpuDescriptor;

    /// Start of the shader-visible range, `None` for CPU-only heaps.
    fn gpu_start(&self) -> Option<GpuDescriptor>;
}

/// A committed buffer or texture. Cloning adds a reference.
pub trait Resource: Clone + fmt::Debug + Send + Sync {
    fn gpu_virtual_address(&self) -> GpuVirtualAddress;

    fn size_in_bytes(&self) -> u64;

    /// Maps the whole resource for CPU writes.
    ///
    /// # Safety
    ///
    /// The resource must live in upload memory. The pointer stays valid until
    /// [`unmap`](Self::unmap) or the last clone is dropped, and the caller
    /// must not write ranges the GPU is still reading.
    unsafe fn map(&self) -> RhiResult<NonNull<u8>>;

    /// # Safety
    ///
    /// No pointer returned by [`map`](Self::map) may be used afterwards.
    unsafe fn unmap(&self);
}

pub trait CommandList: Send {
    type A: Api;

    fn reset(&mut self, allocator: &<Self::A as Api>::CommandAllocator) -> RhiResult<()>;

    fn close(&mut self) -> RhiResult<()>;

    fn transition_barriers(&mut self, barriers: &[TransitionBarrier<'_, <Self::A as Api>::Resource>]);

    fn set_graphics_root_signature(&mut self, root_signature: &<Self::A as Api>::RootSignature);

    fn set_pipeline_state(&mut self, pipeline: &<Self::A as Api>::PipelineState);

    fn set_viewports(&mut self, viewports: &[Viewport]);

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]);

    fn set_render_targets(&mut self, render_targets: &[CpuDescriptor], depth_stencil: Option<CpuDescriptor>);

    fn clear_render_target_view(&mut self, rtv: CpuDescriptor, color: [f32; 4]);

    fn clear_depth_stencil_view(&mut self, dsv: CpuDescriptor, depth: Option<f32>, stencil: Option<u8>);

    fn set_descriptor_heaps(&mut self, heaps: &[&<Self::A as Api>::DescriptorHeap]);

    fn set_graphics_root_constant_buffer_view(&mut self, index: u32, address: GpuVirtualAddress);

    fn set_graphics_root_descriptor_table(&mut self, index: u32, base: GpuDescriptor);

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]);

    fn set_index_buffer(&mut self, view: Option<&IndexBufferView>);

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    );
}

pub trait Swapchain: Send {
    type A: Api;

    fn current_back_buffer_index(&self) -> u32;

    fn back_buffer(&self, index: u32) -> RhiResult<<Self::A as Api>::Resource>;

    /// Resizes every buffer. All back-buffer references must be released.
    fn resize_buffers(
        &mut self,
        buffer_count: u32,
        width: u32,
        height: u32,
        flags: SwapchainFlags,
    ) -> RhiResult<()>;

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> RhiResult<PresentStatus>;

    fn set_maximum_frame_latency(&self, latency: u32) -> RhiResult<()>;

    /// Waits on the frame-latency object. `Ok(false)` on timeout, `Ok(true)`
    /// immediately if the swap chain has none.
    fn wait_for_frame_latency(&self, timeout: Duration) -> RhiResult<bool>;
}
