//! Backend-neutral vocabulary shared by the HAL traits and the core.
//!
//! The names and semantics follow Direct3D 12 closely: the core is written
//! against an explicit API with descriptor heaps, resource states and
//! transition barriers, and these types describe exactly that model.

use std::fmt;

use bitflags::bitflags;
use forge_core::config::{ColorFormat, DepthFormat};

/// GPU virtual address of a buffer location.
pub type GpuVirtualAddress = u64;

/// CPU address of a descriptor slot. Zero is never a valid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CpuDescriptor(pub usize);

impl CpuDescriptor {
    /// Returns the descriptor `index * increment` bytes past this one.
    #[inline]
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as usize * increment as usize)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// GPU address of a descriptor slot in a shader-visible heap, zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    #[inline]
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Descriptor heap types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    RenderTarget,
    DepthStencil,
    /// Constant buffer, shader resource and unordered access views.
    ShaderResource,
    Sampler,
}

impl DescriptorHeapType {
    pub const ALL: [DescriptorHeapType; 4] = [
        DescriptorHeapType::RenderTarget,
        DescriptorHeapType::DepthStencil,
        DescriptorHeapType::ShaderResource,
        DescriptorHeapType::Sampler,
    ];

    /// Only CBV/SRV/UAV and sampler heaps can be bound to shaders.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(
            self,
            DescriptorHeapType::ShaderResource | DescriptorHeapType::Sampler
        )
    }
}

/// Descriptor heap creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    pub ty: DescriptorHeapType,
    pub capacity: u32,
    pub shader_visible: bool,
}

/// Texel formats used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgb10a2Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgb32Float,
    Rg32Float,
    R32Uint,
    R16Uint,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8x24Uint,
    D16Unorm,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8x24Uint | Format::D16Unorm
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8x24Uint)
    }
}

impl From<ColorFormat> for Format {
    fn from(format: ColorFormat) -> Self {
        match format {
            ColorFormat::Bgra8Unorm => Format::Bgra8Unorm,
            ColorFormat::Rgba8Unorm => Format::Rgba8Unorm,
            ColorFormat::Rgb10a2Unorm => Format::Rgb10a2Unorm,
            ColorFormat::Rgba16Float => Format::Rgba16Float,
        }
    }
}

impl From<DepthFormat> for Format {
    fn from(format: DepthFormat) -> Self {
        match format {
            DepthFormat::D32Float => Format::D32Float,
            DepthFormat::D24UnormS8Uint => Format::D24UnormS8Uint,
            DepthFormat::D32FloatS8x24Uint => Format::D32FloatS8x24Uint,
            DepthFormat::D16Unorm => Format::D16Unorm,
        }
    }
}

/// Resource usage states.
///
/// `Present` and `Common` are the same state on the GPU. They are kept
/// separate so logs say what the code meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    DepthRead,
    PixelShaderResource,
    NonPixelShaderResource,
    VertexAndConstantBuffer,
    IndexBuffer,
    CopyDest,
    CopySource,
    GenericRead,
    UnorderedAccess,
}

impl ResourceState {
    /// True when both names denote the same GPU state.
    pub fn matches(self, other: ResourceState) -> bool {
        let canonical = |s: ResourceState| match s {
            ResourceState::Present => ResourceState::Common,
            s => s,
        };
        canonical(self) == canonical(other)
    }
}

/// A state transition of every subresource of `resource`.
pub struct TransitionBarrier<'a, R> {
    pub resource: &'a R,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl<R> fmt::Debug for TransitionBarrier<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionBarrier")
            .field("before", &self.before)
            .field("after", &self.after)
            .finish()
    }
}

/// Memory pool a buffer or texture is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// GPU-local, not CPU visible.
    Default,
    /// CPU-writable, GPU-readable. Persistently mappable.
    Upload,
}

/// Committed buffer creation parameters.
#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub memory: MemoryKind,
    pub initial_state: ResourceState,
}

bitflags! {
    /// How a texture may be bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TextureUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
    }
}

/// Optimized clear value baked into a render or depth target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

/// Committed 2D texture creation parameters.
#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
    pub clear_value: Option<ClearValue>,
}

/// Viewport in render-target pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Scissor rectangle, right and bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub location: GpuVirtualAddress,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub location: GpuVirtualAddress,
    pub size_in_bytes: u32,
    pub format: IndexFormat,
}

/// Depth test and sampler comparison functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Sampler filtering modes, in the order they appear in the sampler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    MinMagMipPoint,
    MinMagPointMipLinear,
    MinPointMagLinearMipPoint,
    MinPointMagMipLinear,
    MinLinearMagMipPoint,
    MinLinearMagPointMipLinear,
    MinMagLinearMipPoint,
    MinMagMipLinear,
    Anisotropic,
    ComparisonMinMagMipLinear,
    ComparisonAnisotropic,
}

impl Filter {
    pub const ALL: [Filter; 11] = [
        Filter::MinMagMipPoint,
        Filter::MinMagPointMipLinear,
        Filter::MinPointMagLinearMipPoint,
        Filter::MinPointMagMipLinear,
        Filter::MinLinearMagMipPoint,
        Filter::MinLinearMagPointMipLinear,
        Filter::MinMagLinearMipPoint,
        Filter::MinMagMipLinear,
        Filter::Anisotropic,
        Filter::ComparisonMinMagMipLinear,
        Filter::ComparisonAnisotropic,
    ];

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Filter::ComparisonMinMagMipLinear | Filter::ComparisonAnisotropic
        )
    }

    pub fn is_anisotropic(self) -> bool {
        matches!(self, Filter::Anisotropic | Filter::ComparisonAnisotropic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Mirror,
}

impl AddressMode {
    pub const ALL: [AddressMode; 3] = [AddressMode::Wrap, AddressMode::Clamp, AddressMode::Mirror];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_mode: AddressMode,
    pub max_anisotropy: u32,
    pub comparison: ComparisonFunc,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl SamplerDesc {
    pub fn new(filter: Filter, address_mode: AddressMode) -> Self {
        Self {
            filter,
            address_mode,
            max_anisotropy: if filter.is_anisotropic() { 16 } else { 1 },
            comparison: if filter.is_comparison() {
                ComparisonFunc::LessEqual
            } else {
                ComparisonFunc::Never
            },
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

/// Device feature levels, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
    Level12_2,
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
            FeatureLevel::Level12_2 => "12_2",
        };
        f.write_str(name)
    }
}

/// HLSL shader model, ordered by version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderModel {
    pub major: u8,
    pub minor: u8,
}

impl ShaderModel {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Order in which adapters are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPreference {
    HighPerformance,
    LowPower,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
    pub is_software: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceDesc {
    /// Enable the debug layer and its message queue.
    pub validation: bool,
}

bitflags! {
    /// Swap-chain creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SwapchainFlags: u32 {
        const FRAME_LATENCY_WAITABLE = 1 << 0;
        const ALLOW_TEARING = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
    pub flags: SwapchainFlags,
}

/// Outcome of a present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// The window is not visible. Nothing was shown, the frame still counts.
    Occluded,
    /// The swap chain no longer matches the surface and must be resized.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
    Corruption,
}

/// A message drained from the debug layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    pub severity: MessageSeverity,
    pub id: i32,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_offset() {
        let cpu = CpuDescriptor(0x1000);
        assert_eq!(cpu.offset(3, 32), CpuDescriptor(0x1060));
        let gpu = GpuDescriptor(0x8000_0000);
        assert_eq!(gpu.offset(2, 32).0, 0x8000_0040);
        assert!(CpuDescriptor::default().is_null());
    }

    #[test]
    fn test_present_and_common_are_one_state() {
        assert!(ResourceState::Present.matches(ResourceState::Common));
        assert!(!ResourceState::Present.matches(ResourceState::RenderTarget));
    }

    #[test]
    fn test_shader_model_ordering() {
        assert!(ShaderModel::new(6, 6) > ShaderModel::new(6, 0));
        assert!(ShaderModel::new(5, 1) < ShaderModel::new(6, 0));
        assert_eq!(ShaderModel::new(6, 5).to_string(), "6.5");
    }

    #[test]
    fn test_sampler_table_shape() {
        assert_eq!(Filter::ALL.len() * AddressMode::ALL.len(), 33);
        let desc = SamplerDesc::new(Filter::ComparisonAnisotropic, AddressMode::Clamp);
        assert_eq!(desc.max_anisotropy, 16);
        assert_eq!(desc.comparison, ComparisonFunc::LessEqual);
    }

    #[test]
    fn test_settings_formats_convert() {
        assert_eq!(Format::from(ColorFormat::Rgb10a2Unorm), Format::Rgb10a2Unorm);
        assert!(Format::from(DepthFormat::D24UnormS8Uint).has_stencil());
        assert!(Format::from(DepthFormat::D32Float).is_depth());
    }
}
