//! Static sampler table.
//!
//! Every combination of [`Filter`] and [`AddressMode`] is created once, in
//! one contiguous block of the shader-visible sampler heap, so shaders pick
//! a sampler by index (`s0`..`s32`) from a single descriptor table.
//!
//! Slots are filter-major: `index = filter * 3 + address_mode`.

use tracing::debug;

use forge_rhi::descriptor::{DescriptorHeapManager, DescriptorRange};
use forge_rhi::hal::{Api, Device};
use forge_rhi::types::{AddressMode, DescriptorHeapType, Filter, GpuDescriptor, SamplerDesc};
use forge_rhi::RhiResult;

/// Number of samplers in the table.
pub const SAMPLER_COUNT: u32 = (Filter::ALL.len() * AddressMode::ALL.len()) as u32;

pub struct SamplerTable {
    range: DescriptorRange,
}

impl SamplerTable {
    pub fn new<A: Api>(device: &A::Device, heaps: &DescriptorHeapManager<A>) -> RhiResult<Self> {
        let range = heaps.allocate_contiguous(DescriptorHeapType::Sampler, SAMPLER_COUNT)?;
        for (i, handle) in range.iter().enumerate() {
            device.create_sampler(&Self::desc_at(i), handle.cpu);
        }
        debug!(
            "Created {} samplers at sampler slot {}",
            SAMPLER_COUNT,
            range.first().index
        );
        Ok(Self { range })
    }

    fn desc_at(i: usize) -> SamplerDesc {
        let modes = AddressMode::ALL.len();
        SamplerDesc::new(Filter::ALL[i / modes], AddressMode::ALL[i % modes])
    }

    /// Position of a combination inside the table.
    pub fn index_of(filter: Filter, address_mode: AddressMode) -> u32 {
        let filter = Filter::ALL.iter().position(|f| *f == filter).unwrap_or(0);
        let mode = AddressMode::ALL
            .iter()
            .position(|m| *m == address_mode)
            .unwrap_or(0);
        (filter * AddressMode::ALL.len() + mode) as u32
    }

    /// Base address bound as the sampler descriptor table.
    #[inline]
    pub fn gpu_base(&self) -> GpuDescriptor {
        self.range.first().gpu
    }

    #[inline]
    pub fn first_index(&self) -> u32 {
        self.range.first().index
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}
