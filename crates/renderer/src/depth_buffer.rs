//! Depth buffer management.
//!
//! This module owns the depth-stencil texture the scene pass renders into
//! and the depth-stencil view that points at it.
//!
//! # Overview
//!
//! - [`DepthBuffer`] wraps a committed texture and one DSV slot
//! - The optimized clear value comes from the active [`DepthConvention`]
//! - Between frames the buffer rests in `DepthRead`; the renderer moves it
//!   to `DepthWrite` for the scene pass and back afterwards
//!
//! Resizing and rebuilding keep the same DSV slot, so the handle recorded
//! by the renderer stays valid.
//!
//! # Example
//!
//! ```
//! use forge_core::config::{DescriptorCapacities, DepthMode};
//! use forge_renderer::depth_buffer::DepthBuffer;
//! use forge_renderer::depth_convention::DepthConvention;
//! use forge_rhi::descriptor::DescriptorHeapManager;
//! use forge_rhi::device::{DeviceConfig, DeviceContext};
//! use forge_rhi::null::Null;
//! use forge_rhi::types::Format;
//!
//! # fn main() -> forge_rhi::RhiResult<()> {
//! let ctx = DeviceContext::<Null>::new(&DeviceConfig::default())?;
//! let heaps = DescriptorHeapManager::<Null>::new(ctx.device(), &DescriptorCapacities::default())?;
//! let convention = DepthConvention::new(DepthMode::ReversedZ);
//!
//! let depth = DepthBuffer::new(ctx.device(), &heaps, 1920, 1080, Format::D32Float, &convention)?;
//! assert_eq!(depth.clear_depth(), 0.0);
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info};

use forge_rhi::descriptor::{Descriptor, DescriptorHeapManager};
use forge_rhi::device::DeviceContext;
use forge_rhi::hal::{Api, Device};
use forge_rhi::types::{
    CpuDescriptor, DescriptorHeapType, Format, ResourceState, TextureDesc, TextureUsage,
};
use forge_rhi::{RhiError, RhiResult};

use crate::depth_convention::DepthConvention;

/// Default depth buffer format (32-bit floating point).
pub const DEFAULT_DEPTH_FORMAT: Format = Format::D32Float;

/// Depth-stencil target for the scene pass.
///
/// # Resource Lifetime
///
/// The texture is replaced on resize and on a depth convention change. The
/// GPU must be idle at that point; the renderer flushes first.
pub struct DepthBuffer<A: Api> {
    texture: A::Resource,
    dsv: Descriptor,
    format: Format,
    width: u32,
    height: u32,
    /// Clear value the texture was created with.
    clear_depth: f32,
    state: ResourceState,
}

impl<A: Api> DepthBuffer<A> {
    /// Creates a depth buffer and its view.
    ///
    /// # Arguments
    ///
    /// * `device` - Device that owns the texture
    /// * `heaps` - Heaps the DSV slot is allocated from
    /// * `width` - Width in pixels
    /// * `height` - Height in pixels
    /// * `format` - A depth format (see [`Format::is_depth`])
    /// * `convention` - Supplies the optimized clear value
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `format` is not a depth format
    /// - The DSV heap is exhausted
    /// - Texture creation fails (including a zero extent)
    pub fn new(
        device: &A::Device,
        heaps: &DescriptorHeapManager<A>,
        width: u32,
        height: u32,
        format: Format,
        convention: &DepthConvention,
    ) -> RhiResult<Self> {
        if !format.is_depth() {
            return Err(RhiError::InvalidArgument(format!(
                "{format:?} is not a depth format"
            )));
        }

        let dsv = heaps.allocate(DescriptorHeapType::DepthStencil)?;
        let clear_depth = convention.clear_depth();
        let texture = Self::create_texture(device, width, height, format, convention)?;
        device.create_depth_stencil_view(&texture, format, dsv.cpu());

        info!(
            "Depth buffer created: {}x{}, {:?}, clear {}",
            width, height, format, clear_depth
        );

        Ok(Self {
            texture,
            dsv,
            format,
            width,
            height,
            clear_depth,
            state: ResourceState::DepthRead,
        })
    }

    fn create_texture(
        device: &A::Device,
        width: u32,
        height: u32,
        format: Format,
        convention: &DepthConvention,
    ) -> RhiResult<A::Resource> {
        device.create_texture(&TextureDesc {
            label: "depth buffer",
            width,
            height,
            format,
            usage: TextureUsage::DEPTH_STENCIL,
            initial_state: ResourceState::DepthRead,
            clear_value: Some(convention.clear_value()),
        })
    }

    /// Replaces the texture with one of the new extent.
    ///
    /// A zero extent is skipped and returns `Ok(false)`, as is the current
    /// extent. The DSV slot is rewritten in place.
    pub fn resize(
        &mut self,
        device: &A::Device,
        width: u32,
        height: u32,
        convention: &DepthConvention,
    ) -> RhiResult<bool> {
        if width == 0 || height == 0 {
            debug!("Skipping depth buffer resize to {}x{}", width, height);
            return Ok(false);
        }
        if width == self.width && height == self.height {
            return Ok(false);
        }
        self.recreate(device, width, height, convention)?;
        info!("Depth buffer resized to {}x{}", width, height);
        Ok(true)
    }

    /// Recreates the texture at the current extent so its optimized clear
    /// value follows a changed depth convention.
    pub fn rebuild(&mut self, device: &A::Device, convention: &DepthConvention) -> RhiResult<()> {
        self.recreate(device, self.width, self.height, convention)?;
        debug!("Depth buffer rebuilt for {:?}", convention.mode());
        Ok(())
    }

    fn recreate(
        &mut self,
        device: &A::Device,
        width: u32,
        height: u32,
        convention: &DepthConvention,
    ) -> RhiResult<()> {
        let texture = Self::create_texture(device, width, height, self.format, convention)?;
        device.create_depth_stencil_view(&texture, self.format, self.dsv.cpu());
        self.texture = texture;
        self.width = width;
        self.height = height;
        self.clear_depth = convention.clear_depth();
        self.state = ResourceState::DepthRead;
        Ok(())
    }

    /// Records `DepthRead -> DepthWrite`.
    pub fn transition_to_depth_write(&mut self, ctx: &mut DeviceContext<A>) -> RhiResult<()> {
        self.transition(ctx, ResourceState::DepthRead, ResourceState::DepthWrite)
    }

    /// Records `DepthWrite -> DepthRead`.
    pub fn transition_to_depth_read(&mut self, ctx: &mut DeviceContext<A>) -> RhiResult<()> {
        self.transition(ctx, ResourceState::DepthWrite, ResourceState::DepthRead)
    }

    fn transition(
        &mut self,
        ctx: &mut DeviceContext<A>,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        if self.state != before {
            return Err(RhiError::StateMismatch {
                resource: "depth buffer".into(),
                expected: before,
                actual: self.state,
            });
        }
        ctx.barrier(&self.texture, before, after)?;
        self.state = after;
        Ok(())
    }

    #[inline]
    pub fn dsv(&self) -> CpuDescriptor {
        self.dsv.cpu()
    }

    /// DSV slot index in the depth-stencil heap.
    #[inline]
    pub fn dsv_index(&self) -> u32 {
        self.dsv.index()
    }

    #[inline]
    pub fn resource(&self) -> &A::Resource {
        &self.texture
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn has_stencil(&self) -> bool {
        self.format.has_stencil()
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
    pub fn clear_depth(&self) -> f32 {
        self.clear_depth
    }

    /// Tracked resource state.
    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }
}

impl<A: Api> Drop for DepthBuffer<A> {
    fn drop(&mut self) {
        debug!("Destroyed depth buffer {}x{}", self.width, self.height);
    }
}
