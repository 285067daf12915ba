//! Constant buffers updated once per frame.
//!
//! Per-frame globals and per-view camera data change exactly once per frame,
//! so they live in small persistent upload buffers, one per frame in flight,
//! instead of the [`FrameRing`]. Writing `buffer[i]` is safe once the frame
//! that last used slot `i` has retired, which `begin_frame` guarantees.
//!
//! Per-object constants change per draw and go through the ring.

use std::marker::PhantomData;

use bytemuck::Pod;
use tracing::debug;

use forge_core::config::CONSTANT_BUFFER_ALIGNMENT;
use forge_rhi::buffer::{Buffer, BufferUsage};
use forge_rhi::hal::Api;
use forge_rhi::types::GpuVirtualAddress;
use forge_rhi::{RhiError, RhiResult};

use crate::frame_ring::{FrameRing, align_up};
use crate::ubo::{ObjectPsConstants, ObjectVsConstants, PerFrameConstants, PerViewConstants};

/// One `T` per frame in flight, each in its own 256-byte aligned resource.
pub struct PersistentConstantBuffer<A: Api, T: Pod> {
    buffers: Vec<Buffer<A>>,
    _marker: PhantomData<T>,
}

impl<A: Api, T: Pod> PersistentConstantBuffer<A, T> {
    pub fn new(device: &A::Device, label: &str, frames_in_flight: usize) -> RhiResult<Self> {
        let size = align_up(std::mem::size_of::<T>() as u64, CONSTANT_BUFFER_ALIGNMENT);
        let buffers = (0..frames_in_flight)
            .map(|i| Buffer::new(device, &format!("{label} {i}"), BufferUsage::Constant, size))
            .collect::<RhiResult<Vec<_>>>()?;
        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    /// Overwrites the copy owned by frame slot `frame`.
    pub fn update(&mut self, frame: usize, value: &T) -> RhiResult<()> {
        self.slot_mut(frame)?.write_pod(0, value)
    }

    /// Address to bind as a root constant buffer view.
    pub fn gpu_address(&self, frame: usize) -> RhiResult<GpuVirtualAddress> {
        self.buffers
            .get(frame)
            .map(Buffer::gpu_address)
            .ok_or_else(|| Self::out_of_range(frame, self.buffers.len()))
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.buffers.len()
    }

    /// The resource backing slot `frame`.
    pub fn buffer(&self, frame: usize) -> Option<&Buffer<A>> {
        self.buffers.get(frame)
    }

    fn slot_mut(&mut self, frame: usize) -> RhiResult<&mut Buffer<A>> {
        let count = self.buffers.len();
        self.buffers
            .get_mut(frame)
            .ok_or_else(|| Self::out_of_range(frame, count))
    }

    fn out_of_range(frame: usize, count: usize) -> RhiError {
        RhiError::InvalidArgument(format!(
            "frame {frame} out of range for {count} constant buffers"
        ))
    }
}

/// The renderer's constant data: persistent per-frame and per-view buffers,
/// and per-object blocks suballocated from the frame ring.
pub struct ConstantBufferManager<A: Api> {
    per_frame: PersistentConstantBuffer<A, PerFrameConstants>,
    per_view: PersistentConstantBuffer<A, PerViewConstants>,
}

impl<A: Api> ConstantBufferManager<A> {
    pub fn new(device: &A::Device, frames_in_flight: usize) -> RhiResult<Self> {
        let manager = Self {
            per_frame: PersistentConstantBuffer::new(device, "per-frame constants", frames_in_flight)?,
            per_view: PersistentConstantBuffer::new(device, "per-view constants", frames_in_flight)?,
        };
        debug!(
            "Created persistent constant buffers for {} frames",
            frames_in_flight
        );
        Ok(manager)
    }

    pub fn update_per_frame(&mut self, frame: usize, constants: &PerFrameConstants) -> RhiResult<()> {
        self.per_frame.update(frame, constants)
    }

    pub fn update_per_view(&mut self, frame: usize, constants: &PerViewConstants) -> RhiResult<()> {
        self.per_view.update(frame, constants)
    }

    pub fn per_frame_gpu_address(&self, frame: usize) -> RhiResult<GpuVirtualAddress> {
        self.per_frame.gpu_address(frame)
    }

    pub fn per_view_gpu_address(&self, frame: usize) -> RhiResult<GpuVirtualAddress> {
        self.per_view.gpu_address(frame)
    }

    /// Copies per-object vertex constants into the current ring slot.
    pub fn update_per_object_vs(
        &self,
        ring: &FrameRing<A>,
        constants: &ObjectVsConstants,
    ) -> RhiResult<GpuVirtualAddress> {
        ring.allocate_constants(constants)
    }

    /// Copies per-object pixel constants into the current ring slot.
    pub fn update_per_object_ps(
        &self,
        ring: &FrameRing<A>,
        constants: &ObjectPsConstants,
    ) -> RhiResult<GpuVirtualAddress> {
        ring.allocate_constants(constants)
    }

    pub fn per_frame(&self) -> &PersistentConstantBuffer<A, PerFrameConstants> {
        &self.per_frame
    }

    pub fn per_view(&self) -> &PersistentConstantBuffer<A, PerViewConstants> {
        &self.per_view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_rhi::device::{DeviceConfig, DeviceContext};
    use forge_rhi::null::Null;
    use glam::{Mat4, Vec3, Vec4};

    fn context() -> DeviceContext<Null> {
        DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap()
    }

    #[test]
    fn test_slots_are_256_aligned_and_distinct() {
        let ctx = context();
        let manager = ConstantBufferManager::<Null>::new(ctx.device(), 2).unwrap();
        let a = manager.per_frame_gpu_address(0).unwrap();
        let b = manager.per_frame_gpu_address(1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a % 256, 0);
        assert_eq!(b % 256, 0);
        assert_eq!(manager.per_view().buffer(0).unwrap().size(), 256);
        assert!(manager.per_view_gpu_address(2).is_err());
    }

    #[test]
    fn test_update_writes_only_its_slot() {
        let ctx = context();
        let mut manager = ConstantBufferManager::<Null>::new(ctx.device(), 2).unwrap();
        let constants = PerFrameConstants {
            frame_number: 42,
            ..Default::default()
        };
        manager.update_per_frame(1, &constants).unwrap();

        let read = |frame: usize| {
            manager
                .per_frame()
                .buffer(frame)
                .unwrap()
                .resource()
                .read_bytes(8, 4)
        };
        assert_eq!(read(1), 42u32.to_ne_bytes().to_vec());
        assert_eq!(read(0), vec![0; 4]);
    }

    #[test]
    fn test_per_view_roundtrip_bytes() {
        let ctx = context();
        let mut manager = ConstantBufferManager::<Null>::new(ctx.device(), 1).unwrap();
        let constants = PerViewConstants::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::X, 0.1, 100.0);
        manager.update_per_view(0, &constants).unwrap();
        let bytes = manager
            .per_view()
            .buffer(0)
            .unwrap()
            .resource()
            .read_bytes(0, PerViewConstants::SIZE);
        assert_eq!(bytes, bytemuck::bytes_of(&constants).to_vec());
    }

    #[test]
    fn test_per_object_uses_ring() {
        let ctx = context();
        let manager = ConstantBufferManager::<Null>::new(ctx.device(), 2).unwrap();
        let mut ring = FrameRing::<Null>::new(ctx.device(), 2, 4096).unwrap();
        ring.begin_frame(&ctx, 0).unwrap();

        let vs = manager
            .update_per_object_vs(&ring, &ObjectVsConstants::identity())
            .unwrap();
        let ps = manager
            .update_per_object_ps(&ring, &ObjectPsConstants::new(Vec4::ONE))
            .unwrap();
        assert_eq!(ps - vs, 256);
        assert_eq!(ring.used(0), 512);
    }
}
