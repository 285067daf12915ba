//! Deterministic software backend.
//!
//! The null backend implements every HAL trait without a GPU. It is what the
//! test suite and `--backend null` run on. See [`gpu`] for what it checks.
//!
//! # Example
//!
//! ```
//! use forge_rhi::hal::{Adapter, Instance};
//! use forge_rhi::null::NullInstance;
//! use forge_rhi::types::{FeatureLevel, InstanceDesc, PowerPreference};
//!
//! let instance = NullInstance::init(&InstanceDesc { validation: true }).unwrap();
//! let adapters = instance
//!     .enumerate_adapters(Some(PowerPreference::HighPerformance))
//!     .unwrap();
//! assert!(adapters[0].probe(FeatureLevel::Level12_0));
//! ```

mod command;
pub mod gpu;
mod swapchain;

use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::hal::{self, Api, SurfaceHandle};
use crate::pipeline::{GraphicsPipelineDesc, RootSignatureDesc};
use crate::types::{
    AdapterInfo, BufferDesc, ComparisonFunc, CpuDescriptor, DebugMessage, DescriptorHeapDesc,
    DescriptorHeapType, FeatureLevel, Format, GpuDescriptor, GpuVirtualAddress, InstanceDesc,
    MemoryKind, PowerPreference, ResourceState, SamplerDesc, ShaderModel, SwapchainDesc,
    TextureDesc,
};

pub use command::NullCommandList;
pub use gpu::{Command, GpuStats, NullGpu, ResourceId, ViewRecord};
pub use swapchain::NullSwapchain;

use gpu::{FenceCell, HostMemory, ResourceInner};

/// The null backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Null;

impl Api for Null {
    const NAME: &'static str = "null";

    type Instance = NullInstance;
    type Adapter = NullAdapter;
    type Device = NullDevice;
    type Queue = NullQueue;
    type Fence = NullFence;
    type CommandAllocator = NullCommandAllocator;
    type CommandList = NullCommandList;
    type DescriptorHeap = NullDescriptorHeap;
    type Resource = NullResource;
    type Swapchain = NullSwapchain;
    type RootSignature = NullRootSignature;
    type PipelineState = NullPipelineState;
}

/// Descriptor increment sizes reported by the null device.
pub const RTV_INCREMENT: u32 = 32;
pub const DSV_INCREMENT: u32 = 8;
pub const CBV_SRV_UAV_INCREMENT: u32 = 32;
pub const SAMPLER_INCREMENT: u32 = 32;

/// Description of a simulated adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullAdapterConfig {
    pub info: AdapterInfo,
    pub max_feature_level: FeatureLevel,
    pub shader_model: ShaderModel,
}

impl NullAdapterConfig {
    pub fn hardware(name: &str, dedicated_video_memory: u64, max_feature_level: FeatureLevel) -> Self {
        Self {
            info: AdapterInfo {
                name: name.to_string(),
                vendor_id: 0x1414,
                device_id: 0x0001,
                dedicated_video_memory,
                is_software: false,
            },
            max_feature_level,
            shader_model: ShaderModel::new(6, 6),
        }
    }

    pub fn software(name: &str) -> Self {
        Self {
            info: AdapterInfo {
                name: name.to_string(),
                vendor_id: 0x1414,
                device_id: 0x008c,
                dedicated_video_memory: 0,
                is_software: true,
            },
            max_feature_level: FeatureLevel::Level12_1,
            shader_model: ShaderModel::new(6, 2),
        }
    }

    pub fn with_shader_model(mut self, shader_model: ShaderModel) -> Self {
        self.shader_model = shader_model;
        self
    }
}

/// Simulated DXGI factory.
#[derive(Debug, Clone)]
pub struct NullInstance {
    adapters: Vec<NullAdapterConfig>,
    tearing: bool,
    validation: bool,
}

impl NullInstance {
    /// An instance exposing exactly `adapters`, in default enumeration order.
    pub fn with_adapters(adapters: Vec<NullAdapterConfig>, tearing: bool, validation: bool) -> Self {
        Self {
            adapters,
            tearing,
            validation,
        }
    }

    fn default_adapters() -> Vec<NullAdapterConfig> {
        vec![
            NullAdapterConfig::software("Null Software Rasterizer"),
            NullAdapterConfig::hardware("Null Integrated GPU", 512 << 20, FeatureLevel::Level12_1),
            NullAdapterConfig::hardware("Null Discrete GPU", 8 << 30, FeatureLevel::Level12_2),
        ]
    }
}

impl hal::Instance for NullInstance {
    type A = Null;

    fn init(desc: &InstanceDesc) -> RhiResult<Self> {
        Ok(Self::with_adapters(Self::default_adapters(), true, desc.validation))
    }

    fn enumerate_adapters(&self, preference: Option<PowerPreference>) -> RhiResult<Vec<NullAdapter>> {
        let mut configs = self.adapters.clone();
        match preference {
            Some(PowerPreference::HighPerformance) => {
                configs.sort_by(|a, b| b.info.dedicated_video_memory.cmp(&a.info.dedicated_video_memory))
            }
            Some(PowerPreference::LowPower) => {
                configs.sort_by_key(|c| c.info.dedicated_video_memory)
            }
            None => {}
        }
        Ok(configs
            .into_iter()
            .map(|config| NullAdapter {
                config,
                validation: self.validation,
            })
            .collect())
    }

    fn supports_tearing(&self) -> bool {
        self.tearing
    }

    fn create_swapchain(
        &self,
        queue: &NullQueue,
        _surface: &SurfaceHandle,
        desc: &SwapchainDesc,
    ) -> RhiResult<NullSwapchain> {
        if desc.flags.contains(crate::types::SwapchainFlags::ALLOW_TEARING) && !self.tearing {
            return Err(RhiError::SwapchainError(
                "tearing requested but not supported".into(),
            ));
        }
        NullSwapchain::new(queue.gpu.clone(), desc)
    }
}

#[derive(Debug, Clone)]
pub struct NullAdapter {
    config: NullAdapterConfig,
    validation: bool,
}

impl hal::Adapter for NullAdapter {
    type A = Null;

    fn info(&self) -> &AdapterInfo {
        &self.config.info
    }

    fn probe(&self, level: FeatureLevel) -> bool {
        level <= self.config.max_feature_level
    }

    fn open(&self, level: FeatureLevel, validation: bool) -> RhiResult<NullDevice> {
        if !self.probe(level) {
            return Err(RhiError::Api {
                context: "D3D12CreateDevice",
                code: 0x887A0004u32 as i32,
                message: format!("{} does not support feature level {level}", self.config.info.name),
            });
        }
        Ok(NullDevice {
            gpu: NullGpu::new(validation || self.validation),
            shader_model: self.config.shader_model,
        })
    }
}

/// Simulated device. Cloning shares the same GPU.
#[derive(Debug, Clone)]
pub struct NullDevice {
    gpu: Arc<NullGpu>,
    shader_model: ShaderModel,
}

impl NullDevice {
    /// The simulated GPU, for inspection in tests.
    pub fn gpu(&self) -> &Arc<NullGpu> {
        &self.gpu
    }

    /// Lets the GPU finish everything submitted so far.
    pub fn complete_all_work(&self) {
        self.gpu.retire_all();
    }

    pub fn stats(&self) -> GpuStats {
        self.gpu.stats()
    }

    pub fn resource_state(&self, resource: &NullResource) -> Option<ResourceState> {
        self.gpu.resource_state(resource.id())
    }

    fn increment(ty: DescriptorHeapType) -> u32 {
        match ty {
            DescriptorHeapType::RenderTarget => RTV_INCREMENT,
            DescriptorHeapType::DepthStencil => DSV_INCREMENT,
            DescriptorHeapType::ShaderResource => CBV_SRV_UAV_INCREMENT,
            DescriptorHeapType::Sampler => SAMPLER_INCREMENT,
        }
    }

    pub(crate) fn texture_size(width: u32, height: u32, format: Format) -> u64 {
        let texel = match format {
            Format::Rgba16Float | Format::D32FloatS8x24Uint | Format::Rg32Float => 8,
            Format::Rgba32Float => 16,
            Format::Rgb32Float => 12,
            Format::D16Unorm | Format::R16Uint => 2,
            _ => 4,
        };
        u64::from(width) * u64::from(height) * texel
    }
}

pub(crate) fn new_resource(
    gpu: &Arc<NullGpu>,
    label: &str,
    size: u64,
    gpu_address: GpuVirtualAddress,
    memory: Option<HostMemory>,
    state: ResourceState,
) -> NullResource {
    let id = gpu.next_id();
    gpu.register_resource(id, label, state);
    NullResource {
        inner: Arc::new(ResourceInner {
            id,
            label: label.to_string(),
            size,
            gpu_address,
            memory,
            gpu: Arc::downgrade(gpu),
        }),
    }
}

impl hal::Device for NullDevice {
    type A = Null;

    fn shader_model(&self) -> ShaderModel {
        self.shader_model
    }

    fn create_queue(&self) -> RhiResult<NullQueue> {
        Ok(NullQueue {
            gpu: self.gpu.clone(),
        })
    }

    fn create_fence(&self, initial_value: u64) -> RhiResult<NullFence> {
        Ok(NullFence {
            cell: Arc::new(FenceCell {
                completed: initial_value.into(),
            }),
            gpu: self.gpu.clone(),
        })
    }

    fn create_command_allocator(&self) -> RhiResult<NullCommandAllocator> {
        Ok(NullCommandAllocator {
            id: self.gpu.next_id(),
        })
    }

    fn create_command_list(&self, _allocator: &NullCommandAllocator) -> RhiResult<NullCommandList> {
        Ok(NullCommandList {
            commands: Vec::new(),
            recording: true,
        })
    }

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        Self::increment(ty)
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> RhiResult<NullDescriptorHeap> {
        if desc.capacity == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{:?} heap capacity must be non-zero",
                desc.ty
            )));
        }
        if desc.shader_visible && !desc.ty.can_be_shader_visible() {
            return Err(RhiError::InvalidArgument(format!(
                "{:?} heaps cannot be shader visible",
                desc.ty
            )));
        }
        let bytes = u64::from(desc.capacity) * u64::from(Self::increment(desc.ty));
        let cpu_start = CpuDescriptor(self.gpu.reserve_heap_range(bytes) as usize);
        let gpu_start = desc
            .shader_visible
            .then(|| GpuDescriptor(self.gpu.reserve_gpu_range(bytes)));
        Ok(NullDescriptorHeap {
            ty: desc.ty,
            cpu_start,
            gpu_start,
        })
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<NullResource> {
        if desc.size == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let memory = match desc.memory {
            MemoryKind::Upload => Some(HostMemory::zeroed(desc.size as usize)),
            MemoryKind::Default => None,
        };
        let address = self.gpu.reserve_gpu_range(desc.size);
        let resource = new_resource(&self.gpu, desc.label, desc.size, address, memory, desc.initial_state);
        debug!("Null buffer '{}' created ({} bytes)", desc.label, desc.size);
        Ok(resource)
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> RhiResult<NullResource> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "texture '{}' has zero extent",
                desc.label
            )));
        }
        let size = Self::texture_size(desc.width, desc.height, desc.format);
        // Textures have no GPU virtual address.
        Ok(new_resource(&self.gpu, desc.label, size, 0, None, desc.initial_state))
    }

    fn create_render_target_view(&self, resource: &NullResource, _format: Format, dest: CpuDescriptor) {
        self.gpu.record_view(dest, ViewRecord::RenderTarget(resource.id()));
    }

    fn create_depth_stencil_view(&self, resource: &NullResource, _format: Format, dest: CpuDescriptor) {
        self.gpu.record_view(dest, ViewRecord::DepthStencil(resource.id()));
    }

    fn create_null_shader_resource_view(&self, dest: CpuDescriptor) {
        self.gpu.record_view(dest, ViewRecord::NullShaderResource);
    }

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor) {
        self.gpu.record_view(dest, ViewRecord::Sampler(*desc));
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<NullRootSignature> {
        Ok(NullRootSignature {
            id: self.gpu.next_id(),
            desc: desc.clone(),
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_, NullRootSignature>,
    ) -> RhiResult<NullPipelineState> {
        if desc.vertex_shader.is_empty() || desc.pixel_shader.is_empty() {
            return Err(RhiError::PipelineError("empty shader bytecode".into()));
        }
        Ok(NullPipelineState {
            id: self.gpu.next_id(),
            root_signature: desc.root_signature.id,
            render_target_format: desc.render_target_format,
            depth_format: desc.depth_format,
            depth_compare: desc.depth.compare,
        })
    }

    fn drain_debug_messages(&self) -> Vec<DebugMessage> {
        self.gpu.take_messages()
    }
}

#[derive(Debug)]
pub struct NullQueue {
    gpu: Arc<NullGpu>,
}

impl hal::Queue for NullQueue {
    type A = Null;

    fn execute(&self, list: &NullCommandList) -> RhiResult<()> {
        if list.recording {
            return Err(RhiError::CommandListState {
                expected: "closed",
                actual: "recording",
            });
        }
        self.gpu.execute(&list.commands);
        Ok(())
    }

    fn signal(&self, fence: &NullFence, value: u64) -> RhiResult<()> {
        self.gpu.signal(fence.cell.clone(), value);
        Ok(())
    }
}

pub struct NullFence {
    cell: Arc<FenceCell>,
    gpu: Arc<NullGpu>,
}

impl std::fmt::Debug for NullFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullFence")
            .field("completed", &self.cell.completed.load(Ordering::Relaxed))
            .finish()
    }
}

impl hal::Fence for NullFence {
    fn completed_value(&self) -> u64 {
        self.cell.completed.load(Ordering::Acquire)
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<bool> {
        if self.completed_value() >= value {
            return Ok(true);
        }
        if self.gpu.retire_until(&self.cell, value) {
            return Ok(true);
        }
        match timeout {
            // The value is never signaled; a bounded wait expires.
            Some(_) => Ok(false),
            None => Err(RhiError::FenceWait(format!(
                "fence value {value} is never signaled (completed {})",
                self.completed_value()
            ))),
        }
    }
}

#[derive(Debug)]
pub struct NullCommandAllocator {
    pub id: u64,
}

impl hal::CommandAllocator for NullCommandAllocator {
    fn reset(&self) -> RhiResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullDescriptorHeap {
    pub(crate) ty: DescriptorHeapType,
    cpu_start: CpuDescriptor,
    gpu_start: Option<GpuDescriptor>,
}

impl hal::DescriptorHeap for NullDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptor {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptor> {
        self.gpu_start
    }
}

/// A simulated committed resource. Upload buffers own real host memory.
#[derive(Clone)]
pub struct NullResource {
    inner: Arc<ResourceInner>,
}

impl NullResource {
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Copies `len` bytes at `offset` out of an upload buffer.
    ///
    /// Returns an empty vector for resources without host memory.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.inner
            .memory
            .as_ref()
            .map(|memory| memory.read(offset, len))
            .unwrap_or_default()
    }

    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for NullResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullResource")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("size", &self.inner.size)
            .finish()
    }
}

impl hal::Resource for NullResource {
    fn gpu_virtual_address(&self) -> GpuVirtualAddress {
        self.inner.gpu_address
    }

    fn size_in_bytes(&self) -> u64 {
        self.inner.size
    }

    unsafe fn map(&self) -> RhiResult<NonNull<u8>> {
        self.inner
            .memory
            .as_ref()
            .map(HostMemory::ptr)
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!("'{}' is not in upload memory", self.inner.label))
            })
    }

    unsafe fn unmap(&self) {}
}

#[derive(Debug)]
pub struct NullRootSignature {
    pub id: u64,
    pub desc: RootSignatureDesc,
}

#[derive(Debug)]
pub struct NullPipelineState {
    pub id: u64,
    pub root_signature: u64,
    pub render_target_format: Format,
    pub depth_format: Format,
    pub depth_compare: ComparisonFunc,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Adapter, CommandList, Device, Fence, Instance, Queue, Resource};

    fn device() -> NullDevice {
        let instance = NullInstance::init(&InstanceDesc { validation: true }).unwrap();
        let adapters = instance.enumerate_adapters(None).unwrap();
        adapters[2].open(FeatureLevel::Level12_0, true).unwrap()
    }

    #[test]
    fn test_enumeration_orders() {
        let instance = NullInstance::init(&InstanceDesc::default()).unwrap();
        let names = |pref| {
            instance
                .enumerate_adapters(pref)
                .unwrap()
                .iter()
                .map(|a| a.info().name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(None)[0], "Null Software Rasterizer");
        assert_eq!(names(Some(PowerPreference::HighPerformance))[0], "Null Discrete GPU");
        assert_eq!(names(Some(PowerPreference::LowPower))[0], "Null Software Rasterizer");
    }

    #[test]
    fn test_fence_retires_in_submission_order() {
        let device = device();
        let queue = device.create_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        queue.signal(&fence, 1).unwrap();
        queue.signal(&fence, 2).unwrap();

        // Nothing retires until someone waits.
        assert_eq!(fence.completed_value(), 0);
        assert!(fence.wait(1, None).unwrap());
        assert_eq!(fence.completed_value(), 1);
        assert_eq!(device.gpu().pending_signals(), 1);

        device.complete_all_work();
        assert_eq!(fence.completed_value(), 2);
    }

    #[test]
    fn test_waiting_on_unsignaled_value() {
        let device = device();
        let fence = device.create_fence(0).unwrap();
        assert!(fence.wait(0, None).unwrap());
        assert!(!fence.wait(5, Some(Duration::from_millis(1))).unwrap());
        assert!(matches!(fence.wait(5, None), Err(RhiError::FenceWait(_))));
    }

    #[test]
    fn test_execute_requires_closed_list() {
        let device = device();
        let queue = device.create_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        assert!(queue.execute(&list).is_err());
        list.close().unwrap();
        queue.execute(&list).unwrap();
    }

    #[test]
    fn test_barrier_mismatch_is_reported() {
        let device = device();
        let queue = device.create_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let texture = device
            .create_texture(&TextureDesc {
                label: "target",
                width: 4,
                height: 4,
                format: Format::Rgba8Unorm,
                usage: crate::types::TextureUsage::RENDER_TARGET,
                initial_state: ResourceState::Present,
                clear_value: None,
            })
            .unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        list.transition_barriers(&[crate::types::TransitionBarrier {
            resource: &texture,
            before: ResourceState::DepthRead,
            after: ResourceState::RenderTarget,
        }]);
        list.close().unwrap();
        queue.execute(&list).unwrap();

        let messages = device.drain_debug_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, gpu::message_id::BARRIER_BEFORE_MISMATCH);
        assert_eq!(device.resource_state(&texture), Some(ResourceState::RenderTarget));
    }

    #[test]
    fn test_upload_buffer_memory_is_stable() {
        let device = device();
        let buffer = device
            .create_buffer(&BufferDesc {
                label: "upload",
                size: 1024,
                memory: MemoryKind::Upload,
                initial_state: ResourceState::GenericRead,
            })
            .unwrap();
        assert_eq!(buffer.gpu_virtual_address() % (64 * 1024), 0);
        let ptr = unsafe { buffer.map().unwrap() };
        unsafe { ptr.as_ptr().add(16).write(0xAB) };
        assert_eq!(buffer.read_bytes(16, 1), vec![0xAB]);
        let again = unsafe { buffer.map().unwrap() };
        assert_eq!(ptr, again);
    }

    #[test]
    fn test_shader_visible_heaps_have_gpu_start() {
        let device = device();
        let heap = device
            .create_descriptor_heap(&DescriptorHeapDesc {
                ty: DescriptorHeapType::Sampler,
                capacity: 64,
                shader_visible: true,
            })
            .unwrap();
        assert!(hal::DescriptorHeap::gpu_start(&heap).is_some());
        assert!(
            device
                .create_descriptor_heap(&DescriptorHeapDesc {
                    ty: DescriptorHeapType::RenderTarget,
                    capacity: 4,
                    shader_visible: true,
                })
                .is_err()
        );
    }
}
