//! Conversions from backend-neutral types to D3D12/DXGI enums.

use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::pipeline::{CullMode, DescriptorRangeType, ShaderVisibility, TopologyType};
use crate::types::{
    AddressMode, ComparisonFunc, DescriptorHeapType, FeatureLevel, Filter, Format, IndexFormat,
    PrimitiveTopology, ResourceState, ShaderModel,
};

pub fn format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::Bgra8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::Rgb10a2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::Rgb32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::D32FloatS8x24Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
        Format::D16Unorm => DXGI_FORMAT_D16_UNORM,
    }
}

pub fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        ResourceState::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::VertexAndConstantBuffer => {
            D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER
        }
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
    }
}

pub fn heap_type(ty: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorHeapType::ShaderResource => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

pub fn feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level11_1 => D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

/// `D3D_SHADER_MODEL_6_5` is `0x65`.
pub fn shader_model(model: D3D_SHADER_MODEL) -> ShaderModel {
    ShaderModel::new((model.0 >> 4) as u8, (model.0 & 0xF) as u8)
}

pub fn comparison(func: ComparisonFunc) -> D3D12_COMPARISON_FUNC {
    match func {
        ComparisonFunc::Never => D3D12_COMPARISON_FUNC_NEVER,
        ComparisonFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        ComparisonFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        ComparisonFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        ComparisonFunc::Greater => D3D12_COMPARISON_FUNC_GREATER,
        ComparisonFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        ComparisonFunc::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        ComparisonFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn filter(filter: Filter) -> D3D12_FILTER {
    match filter {
        Filter::MinMagMipPoint => D3D12_FILTER_MIN_MAG_MIP_POINT,
        Filter::MinMagPointMipLinear => D3D12_FILTER_MIN_MAG_POINT_MIP_LINEAR,
        Filter::MinPointMagLinearMipPoint => D3D12_FILTER_MIN_POINT_MAG_LINEAR_MIP_POINT,
        Filter::MinPointMagMipLinear => D3D12_FILTER_MIN_POINT_MAG_MIP_LINEAR,
        Filter::MinLinearMagMipPoint => D3D12_FILTER_MIN_LINEAR_MAG_MIP_POINT,
        Filter::MinLinearMagPointMipLinear => D3D12_FILTER_MIN_LINEAR_MAG_POINT_MIP_LINEAR,
        Filter::MinMagLinearMipPoint => D3D12_FILTER_MIN_MAG_LINEAR_MIP_POINT,
        Filter::MinMagMipLinear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        Filter::Anisotropic => D3D12_FILTER_ANISOTROPIC,
        Filter::ComparisonMinMagMipLinear => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_LINEAR,
        Filter::ComparisonAnisotropic => D3D12_FILTER_COMPARISON_ANISOTROPIC,
    }
}

pub fn address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
    }
}

pub fn topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
    }
}

pub fn topology_type(ty: TopologyType) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match ty {
        TopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        TopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        TopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

pub fn index_format(format: IndexFormat) -> DXGI_FORMAT {
    match format {
        IndexFormat::U16 => DXGI_FORMAT_R16_UINT,
        IndexFormat::U32 => DXGI_FORMAT_R32_UINT,
    }
}

pub fn cull_mode(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

pub fn visibility(visibility: ShaderVisibility) -> D3D12_SHADER_VISIBILITY {
    match visibility {
        ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
        ShaderVisibility::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
    }
}

pub fn range_type(ty: DescriptorRangeType) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match ty {
        DescriptorRangeType::ShaderResource => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorRangeType::ConstantBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        DescriptorRangeType::UnorderedAccess => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        DescriptorRangeType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
    }
}
