//! Direct3D 12 backend.
//!
//! Implements the HAL traits with the `windows` crate: a DXGI factory,
//! adapters enumerated by GPU preference, an `ID3D12Device` with its info
//! queue, committed resources, and a flip-model swap chain.
//!
//! Every native call is `unsafe`; the wrappers uphold the usual D3D12 rules
//! (resources outlive the lists that reference them, mapped pointers are not
//! used after `Unmap`) through the ownership of the core types built on top.

mod command;
mod conv;
mod swapchain;

use std::ffi::{CString, c_void};
use std::mem::size_of;
use std::ptr::NonNull;
use std::time::Duration;

use tracing::{debug, info, warn};
use windows::Win32::Foundation::{BOOL, CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};
use windows::core::{Interface, PCSTR};

use crate::error::{ApiContext, RhiError, RhiResult};
use crate::hal::{self, Api, SurfaceHandle};
use crate::pipeline::{GraphicsPipelineDesc, RootParameter, RootSignatureDesc};
use crate::types::{
    AdapterInfo, BufferDesc, ClearValue, CpuDescriptor, DebugMessage, DescriptorHeapDesc,
    DescriptorHeapType, FeatureLevel, Format, GpuDescriptor, GpuVirtualAddress, InstanceDesc,
    MemoryKind, MessageSeverity, PowerPreference, SamplerDesc, ShaderModel, SwapchainDesc,
    TextureDesc, TextureUsage,
};

pub use command::D3d12CommandList;
pub use swapchain::D3d12Swapchain;

/// The Direct3D 12 backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D3d12;

impl Api for D3d12 {
    const NAME: &'static str = "d3d12";

    type Instance = D3d12Instance;
    type Adapter = D3d12Adapter;
    type Device = D3d12Device;
    type Queue = D3d12Queue;
    type Fence = D3d12Fence;
    type CommandAllocator = D3d12CommandAllocator;
    type CommandList = D3d12CommandList;
    type DescriptorHeap = D3d12DescriptorHeap;
    type Resource = D3d12Resource;
    type Swapchain = D3d12Swapchain;
    type RootSignature = D3d12RootSignature;
    type PipelineState = D3d12PipelineState;
}

// SAFETY (for the impls below): D3D12 and DXGI objects are free-threaded.
// Command lists are the exception and are only used through `&mut`.
macro_rules! free_threaded {
    ($($ty:ty),* $(,)?) => {
        $(
            unsafe impl Send for $ty {}
            unsafe impl Sync for $ty {}
        )*
    };
}

free_threaded!(
    D3d12Instance,
    D3d12Adapter,
    D3d12Device,
    D3d12Queue,
    D3d12Fence,
    D3d12CommandAllocator,
    D3d12DescriptorHeap,
    D3d12Resource,
    D3d12RootSignature,
    D3d12PipelineState,
);

/// DXGI factory.
pub struct D3d12Instance {
    factory: IDXGIFactory6,
    tearing: bool,
}

impl hal::Instance for D3d12Instance {
    type A = D3d12;

    fn init(desc: &InstanceDesc) -> RhiResult<Self> {
        unsafe {
            if desc.validation {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug).ok().and(debug) {
                    Some(debug) => {
                        debug.EnableDebugLayer();
                        info!("D3D12 debug layer enabled");
                    }
                    None => warn!("D3D12 debug layer requested but not installed"),
                }
            }

            let flags = if desc.validation {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory6 =
                CreateDXGIFactory2(flags).context("CreateDXGIFactory2")?;

            let mut allow_tearing = BOOL(0);
            let tearing = factory
                .CheckFeatureSupport(
                    DXGI_FEATURE_PRESENT_ALLOW_TEARING,
                    &mut allow_tearing as *mut BOOL as *mut c_void,
                    size_of::<BOOL>() as u32,
                )
                .is_ok()
                && allow_tearing.as_bool();

            debug!("Created DXGI factory (tearing supported: {})", tearing);
            Ok(Self { factory, tearing })
        }
    }

    fn enumerate_adapters(&self, preference: Option<PowerPreference>) -> RhiResult<Vec<D3d12Adapter>> {
        let mut adapters = Vec::new();
        for index in 0.. {
            let adapter: windows::core::Result<IDXGIAdapter1> = unsafe {
                match preference {
                    Some(preference) => self
                        .factory
                        .EnumAdapterByGpuPreference(index, gpu_preference(preference)),
                    None => self.factory.EnumAdapters1(index),
                }
            };
            // DXGI_ERROR_NOT_FOUND ends the enumeration.
            let Ok(adapter) = adapter else { break };
            let desc = unsafe { adapter.GetDesc1() }.context("IDXGIAdapter1::GetDesc1")?;

            let name_len = desc
                .Description
                .iter()
                .take_while(|&&c| c != 0)
                .count();
            let info = AdapterInfo {
                name: String::from_utf16_lossy(&desc.Description[..name_len]),
                vendor_id: desc.VendorId,
                device_id: desc.DeviceId,
                dedicated_video_memory: desc.DedicatedVideoMemory as u64,
                is_software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
            };
            adapters.push(D3d12Adapter { raw: adapter, info });
        }
        Ok(adapters)
    }

    fn supports_tearing(&self) -> bool {
        self.tearing
    }

    fn create_swapchain(
        &self,
        queue: &D3d12Queue,
        surface: &SurfaceHandle,
        desc: &SwapchainDesc,
    ) -> RhiResult<D3d12Swapchain> {
        D3d12Swapchain::new(&self.factory, &queue.raw, surface, desc)
    }
}

fn gpu_preference(preference: PowerPreference) -> DXGI_GPU_PREFERENCE {
    match preference {
        PowerPreference::HighPerformance => DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
        PowerPreference::LowPower => DXGI_GPU_PREFERENCE_MINIMUM_POWER,
    }
}

pub struct D3d12Adapter {
    raw: IDXGIAdapter1,
    info: AdapterInfo,
}

impl hal::Adapter for D3d12Adapter {
    type A = D3d12;

    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    fn probe(&self, level: FeatureLevel) -> bool {
        unsafe {
            D3D12CreateDevice(
                &self.raw,
                conv::feature_level(level),
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
            .is_ok()
        }
    }

    fn open(&self, level: FeatureLevel, validation: bool) -> RhiResult<D3d12Device> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&self.raw, conv::feature_level(level), &mut device) }
            .context("D3D12CreateDevice")?;
        let raw = device.ok_or_else(|| RhiError::NoSuitableAdapter(level.to_string()))?;

        let info_queue = if validation {
            raw.cast::<ID3D12InfoQueue>().ok()
        } else {
            None
        };
        if let Some(queue) = &info_queue {
            unsafe { queue.SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_CORRUPTION, true) }
                .context("ID3D12InfoQueue::SetBreakOnSeverity")?;
        }

        let shader_model = highest_shader_model(&raw);
        info!(
            "Opened D3D12 device on '{}' (feature level {}, shader model {})",
            self.info.name, level, shader_model
        );

        Ok(D3d12Device {
            raw,
            info_queue,
            shader_model,
        })
    }
}

fn highest_shader_model(device: &ID3D12Device) -> ShaderModel {
    const MODELS: [D3D_SHADER_MODEL; 8] = [
        D3D_SHADER_MODEL_6_7,
        D3D_SHADER_MODEL_6_6,
        D3D_SHADER_MODEL_6_5,
        D3D_SHADER_MODEL_6_4,
        D3D_SHADER_MODEL_6_3,
        D3D_SHADER_MODEL_6_2,
        D3D_SHADER_MODEL_6_1,
        D3D_SHADER_MODEL_6_0,
    ];
    for model in MODELS {
        let mut data = D3D12_FEATURE_DATA_SHADER_MODEL {
            HighestShaderModel: model,
        };
        // Fails with E_INVALIDARG when the runtime does not know `model`.
        let supported = unsafe {
            device.CheckFeatureSupport(
                D3D12_FEATURE_SHADER_MODEL,
                &mut data as *mut _ as *mut c_void,
                size_of::<D3D12_FEATURE_DATA_SHADER_MODEL>() as u32,
            )
        };
        if supported.is_ok() {
            return conv::shader_model(data.HighestShaderModel);
        }
    }
    ShaderModel::new(5, 1)
}

pub struct D3d12Device {
    raw: ID3D12Device,
    info_queue: Option<ID3D12InfoQueue>,
    shader_model: ShaderModel,
}

impl D3d12Device {
    pub fn raw(&self) -> &ID3D12Device {
        &self.raw
    }

    fn committed_resource(
        &self,
        label: &str,
        heap: D3D12_HEAP_TYPE,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
        clear_value: Option<&D3D12_CLEAR_VALUE>,
    ) -> RhiResult<D3d12Resource> {
        let heap_properties = D3D12_HEAP_PROPERTIES {
            Type: heap,
            CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
            MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
            CreationNodeMask: 1,
            VisibleNodeMask: 1,
        };
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.raw.CreateCommittedResource(
                &heap_properties,
                D3D12_HEAP_FLAG_NONE,
                desc,
                state,
                clear_value.map(|v| v as *const _),
                &mut resource,
            )
        }
        .context("CreateCommittedResource")?;
        let raw = resource.ok_or_else(|| {
            RhiError::InvalidArgument(format!("CreateCommittedResource returned no '{label}'"))
        })?;
        set_name(&raw, label);

        let gpu_address = if desc.Dimension == D3D12_RESOURCE_DIMENSION_BUFFER {
            unsafe { raw.GetGPUVirtualAddress() }
        } else {
            0
        };
        Ok(D3d12Resource {
            raw,
            size: desc.Width * u64::from(desc.Height),
            gpu_address,
        })
    }
}

/// Null-terminated UTF-16 copy of `label` for debug names.
fn wide_label(label: &str) -> Vec<u16> {
    label.encode_utf16().chain(Some(0)).collect()
}

fn set_name(object: &ID3D12Resource, label: &str) {
    let wide = wide_label(label);
    // Names only show up in debug tools.
    if let Err(e) = unsafe { object.SetName(windows::core::PCWSTR(wide.as_ptr())) } {
        warn!("Failed to set debug name {:?}: {}", label, e);
    }
}

#[inline]
fn cpu_handle(descriptor: CpuDescriptor) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: descriptor.0 }
}

impl hal::Device for D3d12Device {
    type A = D3d12;

    fn shader_model(&self) -> ShaderModel {
        self.shader_model
    }

    fn create_queue(&self) -> RhiResult<D3d12Queue> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        let raw = unsafe { self.raw.CreateCommandQueue(&desc) }.context("CreateCommandQueue")?;
        Ok(D3d12Queue { raw })
    }

    fn create_fence(&self, initial_value: u64) -> RhiResult<D3d12Fence> {
        let raw = unsafe { self.raw.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .context("CreateFence")?;
        let event = unsafe { CreateEventW(None, false, false, None) }.context("CreateEventW")?;
        Ok(D3d12Fence { raw, event })
    }

    fn create_command_allocator(&self) -> RhiResult<D3d12CommandAllocator> {
        let raw = unsafe { self.raw.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
            .context("CreateCommandAllocator")?;
        Ok(D3d12CommandAllocator { raw })
    }

    fn create_command_list(&self, allocator: &D3d12CommandAllocator) -> RhiResult<D3d12CommandList> {
        let raw: ID3D12GraphicsCommandList = unsafe {
            self.raw.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator.raw,
                None::<&ID3D12PipelineState>,
            )
        }
        .context("CreateCommandList")?;
        Ok(D3d12CommandList::new(raw))
    }

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        unsafe { self.raw.GetDescriptorHandleIncrementSize(conv::heap_type(ty)) }
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> RhiResult<D3d12DescriptorHeap> {
        let raw_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: conv::heap_type(desc.ty),
            NumDescriptors: desc.capacity,
            Flags: if desc.shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let raw: ID3D12DescriptorHeap =
            unsafe { self.raw.CreateDescriptorHeap(&raw_desc) }.context("CreateDescriptorHeap")?;
        let cpu_start = CpuDescriptor(unsafe { raw.GetCPUDescriptorHandleForHeapStart() }.ptr);
        let gpu_start = desc
            .shader_visible
            .then(|| GpuDescriptor(unsafe { raw.GetGPUDescriptorHandleForHeapStart() }.ptr));
        Ok(D3d12DescriptorHeap {
            raw,
            cpu_start,
            gpu_start,
        })
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<D3d12Resource> {
        let heap = match desc.memory {
            MemoryKind::Default => D3D12_HEAP_TYPE_DEFAULT,
            MemoryKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
        };
        let raw_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        };
        self.committed_resource(
            desc.label,
            heap,
            &raw_desc,
            conv::resource_state(desc.initial_state),
            None,
        )
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> RhiResult<D3d12Resource> {
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.usage.contains(TextureUsage::RENDER_TARGET) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        }
        if desc.usage.contains(TextureUsage::DEPTH_STENCIL) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
            if !desc.usage.contains(TextureUsage::SHADER_RESOURCE) {
                flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
            }
        }
        let format = conv::format(desc.format);
        let raw_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: u64::from(desc.width),
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };
        let clear_value = desc.clear_value.map(|value| match value {
            ClearValue::Color(color) => D3D12_CLEAR_VALUE {
                Format: format,
                Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
            },
            ClearValue::DepthStencil { depth, stencil } => D3D12_CLEAR_VALUE {
                Format: format,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                        Depth: depth,
                        Stencil: stencil,
                    },
                },
            },
        });
        self.committed_resource(
            desc.label,
            D3D12_HEAP_TYPE_DEFAULT,
            &raw_desc,
            conv::resource_state(desc.initial_state),
            clear_value.as_ref(),
        )
    }

    fn create_render_target_view(&self, resource: &D3d12Resource, format: Format, dest: CpuDescriptor) {
        let desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: conv::format(format),
            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV {
                    MipSlice: 0,
                    PlaneSlice: 0,
                },
            },
        };
        unsafe {
            self.raw
                .CreateRenderTargetView(&resource.raw, Some(&desc as *const _), cpu_handle(dest))
        };
    }

    fn create_depth_stencil_view(&self, resource: &D3d12Resource, format: Format, dest: CpuDescriptor) {
        let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
            Format: conv::format(format),
            ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
            Flags: D3D12_DSV_FLAG_NONE,
            Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
            },
        };
        unsafe {
            self.raw
                .CreateDepthStencilView(&resource.raw, Some(&desc as *const _), cpu_handle(dest))
        };
    }

    fn create_null_shader_resource_view(&self, dest: CpuDescriptor) {
        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MipLevels: 1,
                    ..Default::default()
                },
            },
        };
        unsafe {
            self.raw.CreateShaderResourceView(
                None::<&ID3D12Resource>,
                Some(&desc as *const _),
                cpu_handle(dest),
            )
        };
    }

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor) {
        let address = conv::address_mode(desc.address_mode);
        let raw_desc = D3D12_SAMPLER_DESC {
            Filter: conv::filter(desc.filter),
            AddressU: address,
            AddressV: address,
            AddressW: address,
            MipLODBias: 0.0,
            MaxAnisotropy: desc.max_anisotropy,
            ComparisonFunc: conv::comparison(desc.comparison),
            BorderColor: [0.0; 4],
            MinLOD: desc.min_lod,
            MaxLOD: desc.max_lod,
        };
        unsafe { self.raw.CreateSampler(&raw_desc, cpu_handle(dest)) };
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> RhiResult<D3d12RootSignature> {
        // One range per table parameter; must outlive serialization.
        let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = desc
            .parameters
            .iter()
            .map(|parameter| match *parameter {
                RootParameter::DescriptorTable {
                    range_type,
                    base_register,
                    count,
                    ..
                } => D3D12_DESCRIPTOR_RANGE {
                    RangeType: conv::range_type(range_type),
                    NumDescriptors: count,
                    BaseShaderRegister: base_register,
                    RegisterSpace: 0,
                    OffsetInDescriptorsFromTableStart: 0,
                },
                RootParameter::ConstantBufferView { .. } => D3D12_DESCRIPTOR_RANGE::default(),
            })
            .collect();

        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(&ranges)
            .map(|(parameter, range)| match *parameter {
                RootParameter::ConstantBufferView {
                    register,
                    visibility,
                } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        Descriptor: D3D12_ROOT_DESCRIPTOR {
                            ShaderRegister: register,
                            RegisterSpace: 0,
                        },
                    },
                    ShaderVisibility: conv::visibility(visibility),
                },
                RootParameter::DescriptorTable { visibility, .. } => D3D12_ROOT_PARAMETER {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: 1,
                            pDescriptorRanges: range,
                        },
                    },
                    ShaderVisibility: conv::visibility(visibility),
                },
            })
            .collect();

        let raw_desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 0,
            pStaticSamplers: std::ptr::null(),
            Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        let serialized = unsafe {
            D3D12SerializeRootSignature(
                &raw_desc,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut blob,
                Some(&mut error as *mut _),
            )
        };
        if let Err(err) = serialized {
            let message = error
                .map(|blob| blob_to_string(&blob))
                .unwrap_or_else(|| err.message().to_string());
            return Err(RhiError::PipelineError(format!(
                "root signature serialization failed: {message}"
            )));
        }
        let blob = blob.ok_or_else(|| {
            RhiError::PipelineError("root signature serialization produced no blob".into())
        })?;
        let bytes = unsafe {
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
        };
        let raw = unsafe { self.raw.CreateRootSignature(0, bytes) }.context("CreateRootSignature")?;
        Ok(D3d12RootSignature { raw })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_, D3d12RootSignature>,
    ) -> RhiResult<D3d12PipelineState> {
        let semantics = desc
            .input_layout
            .iter()
            .map(|element| {
                CString::new(element.semantic)
                    .map_err(|_| RhiError::PipelineError(format!("bad semantic {}", element.semantic)))
            })
            .collect::<RhiResult<Vec<_>>>()?;
        let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(&semantics)
            .map(|(element, name)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr() as *const u8),
                SemanticIndex: element.semantic_index,
                Format: conv::format(element.format),
                InputSlot: 0,
                AlignedByteOffset: element.offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let mut blend = D3D12_BLEND_DESC::default();
        blend.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: desc.alpha_blend.into(),
            SrcBlend: D3D12_BLEND_SRC_ALPHA,
            DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_ZERO,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            ..Default::default()
        };

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = conv::format(desc.render_target_format);

        let raw_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // SAFETY: borrowed for the duration of the call, never released.
            pRootSignature: unsafe { std::mem::transmute_copy(&desc.root_signature.raw) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.vertex_shader.as_ptr() as *const c_void,
                BytecodeLength: desc.vertex_shader.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.pixel_shader.as_ptr() as *const c_void,
                BytecodeLength: desc.pixel_shader.len(),
            },
            BlendState: blend,
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: conv::cull_mode(desc.cull_mode),
                FrontCounterClockwise: (desc.front_face
                    == crate::pipeline::FrontFace::CounterClockwise)
                    .into(),
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: desc.depth.test_enable.into(),
                DepthWriteMask: if desc.depth.write_enable {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: conv::comparison(desc.depth.compare),
                StencilEnable: false.into(),
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: elements.as_ptr(),
                NumElements: elements.len() as u32,
            },
            PrimitiveTopologyType: conv::topology_type(desc.topology_type),
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            DSVFormat: conv::format(desc.depth_format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };

        let raw = unsafe { self.raw.CreateGraphicsPipelineState(&raw_desc) }
            .context("CreateGraphicsPipelineState")?;
        Ok(D3d12PipelineState { raw })
    }

    fn drain_debug_messages(&self) -> Vec<DebugMessage> {
        let Some(queue) = &self.info_queue else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        unsafe {
            let count = queue.GetNumStoredMessagesAllowedByRetrievalFilter();
            for index in 0..count {
                let mut length = 0usize;
                if queue.GetMessage(index, None, &mut length).is_err() || length == 0 {
                    continue;
                }
                // D3D12_MESSAGE is followed by its description in one block.
                let mut storage = vec![0u64; length.div_ceil(8)];
                let message = storage.as_mut_ptr() as *mut D3D12_MESSAGE;
                if queue.GetMessage(index, Some(message), &mut length).is_err() {
                    continue;
                }
                let message = &*message;
                let description = if message.pDescription.is_null() {
                    String::new()
                } else {
                    let bytes = std::slice::from_raw_parts(
                        message.pDescription,
                        message.DescriptionByteLength.saturating_sub(1),
                    );
                    String::from_utf8_lossy(bytes).into_owned()
                };
                messages.push(DebugMessage {
                    severity: match message.Severity {
                        D3D12_MESSAGE_SEVERITY_CORRUPTION => MessageSeverity::Corruption,
                        D3D12_MESSAGE_SEVERITY_ERROR => MessageSeverity::Error,
                        D3D12_MESSAGE_SEVERITY_WARNING => MessageSeverity::Warning,
                        _ => MessageSeverity::Info,
                    },
                    id: message.ID.0,
                    description,
                });
            }
            queue.ClearStoredMessages();
        }
        messages
    }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes =
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
    }
}

pub struct D3d12Queue {
    raw: ID3D12CommandQueue,
}

impl hal::Queue for D3d12Queue {
    type A = D3d12;

    fn execute(&self, list: &D3d12CommandList) -> RhiResult<()> {
        let list: ID3D12CommandList = list.raw().cast().context("ID3D12CommandList cast")?;
        unsafe { self.raw.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn signal(&self, fence: &D3d12Fence, value: u64) -> RhiResult<()> {
        unsafe { self.raw.Signal(&fence.raw, value) }.context("ID3D12CommandQueue::Signal")
    }
}

/// Fence plus the event the CPU blocks on.
pub struct D3d12Fence {
    raw: ID3D12Fence,
    event: HANDLE,
}

impl hal::Fence for D3d12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.raw.GetCompletedValue() }
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> RhiResult<bool> {
        if self.completed_value() >= value {
            return Ok(true);
        }
        unsafe {
            self.raw
                .SetEventOnCompletion(value, self.event)
                .context("ID3D12Fence::SetEventOnCompletion")?;
            let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u128::from(INFINITE - 1)) as u32);
            match WaitForSingleObject(self.event, millis) {
                WAIT_OBJECT_0 => Ok(true),
                WAIT_TIMEOUT => Ok(false),
                other => Err(RhiError::FenceWait(format!(
                    "WaitForSingleObject returned {:#x}",
                    other.0
                ))),
            }
        }
    }
}

impl Drop for D3d12Fence {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.event) } {
            warn!("Failed to close fence event: {}", e);
        }
    }
}

pub struct D3d12CommandAllocator {
    raw: ID3D12CommandAllocator,
}

impl hal::CommandAllocator for D3d12CommandAllocator {
    fn reset(&self) -> RhiResult<()> {
        unsafe { self.raw.Reset() }.context("ID3D12CommandAllocator::Reset")
    }
}

pub struct D3d12DescriptorHeap {
    raw: ID3D12DescriptorHeap,
    cpu_start: CpuDescriptor,
    gpu_start: Option<GpuDescriptor>,
}

impl hal::DescriptorHeap for D3d12DescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptor {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptor> {
        self.gpu_start
    }
}

/// A committed resource. Cloning adds a COM reference.
#[derive(Clone)]
pub struct D3d12Resource {
    raw: ID3D12Resource,
    size: u64,
    gpu_address: GpuVirtualAddress,
}

impl D3d12Resource {
    pub fn raw(&self) -> &ID3D12Resource {
        &self.raw
    }
}

impl std::fmt::Debug for D3d12Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D3d12Resource")
            .field("size", &self.size)
            .field("gpu_address", &format_args!("{:#x}", self.gpu_address))
            .finish()
    }
}

impl hal::Resource for D3d12Resource {
    fn gpu_virtual_address(&self) -> GpuVirtualAddress {
        self.gpu_address
    }

    fn size_in_bytes(&self) -> u64 {
        self.size
    }

    unsafe fn map(&self) -> RhiResult<NonNull<u8>> {
        let mut data: *mut c_void = std::ptr::null_mut();
        // An empty read range: the CPU never reads upload memory.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        unsafe { self.raw.Map(0, Some(&read_range as *const _), Some(&mut data as *mut _)) }
            .context("ID3D12Resource::Map")?;
        NonNull::new(data as *mut u8)
            .ok_or_else(|| RhiError::InvalidArgument("Map returned a null pointer".into()))
    }

    unsafe fn unmap(&self) {
        unsafe { self.raw.Unmap(0, None) };
    }
}

pub struct D3d12RootSignature {
    raw: ID3D12RootSignature,
}

impl std::fmt::Debug for D3d12RootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("D3d12RootSignature")
    }
}

pub struct D3d12PipelineState {
    raw: ID3D12PipelineState,
}

impl std::fmt::Debug for D3d12PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("D3d12PipelineState")
    }
}
