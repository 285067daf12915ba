//! Per-frame linear allocator for transient constant data.
//!
//! Each frame in flight owns one persistently mapped upload buffer (a slot).
//! Allocation is a bump of the slot's `used` counter; nothing is ever freed
//! individually. The whole slot is reset when the frame that owns it begins
//! again, after the fence value of its previous submission has retired.
//!
//! # Overview
//!
//! ```text
//! begin_frame(i):  wait completed >= submitted_fence[i], used[i] = 0
//! allocate(n):     offset = align_up(used[i], 256), used[i] = offset + n
//! end_frame(v):    submitted_fence[i] = v
//! ```
//!
//! A returned address is valid until `begin_frame` is next called for the
//! same slot. It must be bound on the current frame's command list only.
//!
//! # Thread Safety
//!
//! `allocate` takes `&self`: the `used` counter is advanced with a lock-free
//! compare-exchange loop, so disjoint ranges can be filled from several
//! recording threads. The mapped pointer and GPU base of a slot never change.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use tracing::{debug, info, trace};

use forge_core::config::CONSTANT_BUFFER_ALIGNMENT;
use forge_rhi::buffer::{Buffer, BufferUsage};
use forge_rhi::device::DeviceContext;
use forge_rhi::hal::Api;
use forge_rhi::types::GpuVirtualAddress;
use forge_rhi::{RhiError, RhiResult};

/// Rounds `value` up to a multiple of `alignment`, a power of two.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// A range handed out by [`FrameRing::allocate`].
#[derive(Debug)]
pub struct Suballocation {
    gpu_address: GpuVirtualAddress,
    offset: u64,
    size: u64,
    cpu: NonNull<u8>,
}

impl Suballocation {
    #[inline]
    pub fn gpu_address(&self) -> GpuVirtualAddress {
        self.gpu_address
    }

    /// Offset from the start of the slot.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copies `data` to the start of the range.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] if `data` is larger than the range.
    pub fn write(&mut self, data: &[u8]) -> RhiResult<()> {
        if data.len() as u64 > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "{} bytes do not fit a {} byte suballocation",
                data.len(),
                self.size
            )));
        }
        // SAFETY: the range [offset, offset + size) of the mapped slot was
        // reserved for this suballocation alone.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.cpu.as_ptr(), data.len());
        }
        Ok(())
    }
}

struct RingSlot<A: Api> {
    buffer: Buffer<A>,
    used: AtomicU64,
    submitted_fence: u64,
}

/// Ring of per-frame upload buffers.
pub struct FrameRing<A: Api> {
    slots: Vec<RingSlot<A>>,
    capacity: u64,
    current: usize,
}

impl<A: Api> FrameRing<A> {
    /// Creates `frames_in_flight` slots of `capacity` bytes each.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] if `capacity` is zero or not a multiple
    /// of 256, or a buffer creation error.
    pub fn new(device: &A::Device, frames_in_flight: usize, capacity: u64) -> RhiResult<Self> {
        if capacity == 0 || capacity % CONSTANT_BUFFER_ALIGNMENT != 0 {
            return Err(RhiError::InvalidArgument(format!(
                "ring capacity {capacity} must be a non-zero multiple of {CONSTANT_BUFFER_ALIGNMENT}"
            )));
        }
        let slots = (0..frames_in_flight)
            .map(|i| {
                let buffer = Buffer::new(
                    device,
                    &format!("frame ring {i}"),
                    BufferUsage::Constant,
                    capacity,
                )?;
                Ok(RingSlot {
                    buffer,
                    used: AtomicU64::new(0),
                    submitted_fence: 0,
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Frame ring created: {} slots of {} KiB",
            frames_in_flight,
            capacity / 1024
        );

        Ok(Self {
            slots,
            capacity,
            current: 0,
        })
    }

    /// Makes slot `frame` current once the GPU is done with it, and empties it.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] for an out-of-range slot, or the fence
    /// wait error.
    pub fn begin_frame(&mut self, ctx: &DeviceContext<A>, frame: usize) -> RhiResult<()> {
        let slot = self.slots.get_mut(frame).ok_or_else(|| {
            RhiError::InvalidArgument(format!("frame ring has no slot {frame}"))
        })?;
        ctx.wait_for_fence_value(slot.submitted_fence)?;
        slot.used.store(0, Ordering::Release);
        self.current = frame;
        trace!("Frame ring slot {} reset", frame);
        Ok(())
    }

    /// Reserves `bytes` at an `alignment` boundary in the current slot.
    ///
    /// Alignments below 256 are raised to 256.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidArgument`] for zero bytes or a non power of two
    ///   alignment
    /// - [`RhiError::RingBufferExhausted`] when the slot cannot hold the
    ///   request; the slot is left unchanged
    pub fn allocate(&self, bytes: u64, alignment: u64) -> RhiResult<Suballocation> {
        if bytes == 0 || !alignment.is_power_of_two() {
            return Err(RhiError::InvalidArgument(format!(
                "ring allocation of {bytes} bytes with alignment {alignment}"
            )));
        }
        let alignment = alignment.max(CONSTANT_BUFFER_ALIGNMENT);
        let slot = &self.slots[self.current];
        let capacity = self.capacity;

        let mut offset = 0;
        let reserved = slot
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                offset = align_up(used, alignment);
                let end = offset.checked_add(bytes)?;
                (end <= capacity).then_some(end)
            });
        if reserved.is_err() {
            return Err(RhiError::RingBufferExhausted {
                requested: bytes,
                offset,
                capacity,
            });
        }

        // SAFETY: offset + bytes <= capacity, the size of the mapping.
        let cpu = unsafe {
            NonNull::new_unchecked(slot.buffer.mapped_ptr().as_ptr().add(offset as usize))
        };
        Ok(Suballocation {
            gpu_address: slot.buffer.gpu_address() + offset,
            offset,
            size: bytes,
            cpu,
        })
    }

    /// Copies `data` into a fresh 256-byte aligned block and returns its
    /// address. The block is rounded up to a multiple of 256 bytes, the
    /// granularity of a constant buffer view.
    pub fn allocate_constant_buffer(&self, data: &[u8]) -> RhiResult<GpuVirtualAddress> {
        let size = align_up(data.len() as u64, CONSTANT_BUFFER_ALIGNMENT);
        let mut allocation = self.allocate(size, CONSTANT_BUFFER_ALIGNMENT)?;
        allocation.write(data)?;
        Ok(allocation.gpu_address())
    }

    /// Typed form of [`allocate_constant_buffer`](Self::allocate_constant_buffer).
    pub fn allocate_constants<T: Pod>(&self, value: &T) -> RhiResult<GpuVirtualAddress> {
        self.allocate_constant_buffer(bytemuck::bytes_of(value))
    }

    /// Records the fence value that guards the current slot.
    pub fn end_frame(&mut self, fence_value: u64) {
        let slot = &mut self.slots[self.current];
        slot.submitted_fence = fence_value;
        trace!(
            "Frame ring slot {} closed at {} bytes, fence {}",
            self.current,
            slot.used.load(Ordering::Acquire),
            fence_value
        );
    }

    /// Bytes used in slot `frame`.
    pub fn used(&self, frame: usize) -> u64 {
        self.slots[frame].used.load(Ordering::Acquire)
    }

    /// Fence value the GPU must pass before slot `frame` is reused.
    pub fn submitted_fence(&self, frame: usize) -> u64 {
        self.slots[frame].submitted_fence
    }

    /// GPU address of the start of slot `frame`.
    pub fn slot_gpu_address(&self, frame: usize) -> GpuVirtualAddress {
        self.slots[frame].buffer.gpu_address()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }
}

impl<A: Api> Drop for FrameRing<A> {
    fn drop(&mut self) {
        debug!("Destroyed frame ring ({} slots)", self.slots.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_rhi::device::DeviceConfig;
    use forge_rhi::null::Null;

    fn setup(capacity: u64) -> (DeviceContext<Null>, FrameRing<Null>) {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        let ring = FrameRing::new(ctx.device(), 2, capacity).unwrap();
        (ctx, ring)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_rejects_unaligned_capacity() {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        assert!(FrameRing::<Null>::new(ctx.device(), 2, 1000).is_err());
        assert!(FrameRing::<Null>::new(ctx.device(), 2, 0).is_err());
    }

    #[test]
    fn test_offsets_are_aligned_and_in_range() {
        let (ctx, mut ring) = setup(4096);
        ring.begin_frame(&ctx, 0).unwrap();
        let base = ring.slot_gpu_address(0);

        let a = ring.allocate(100, 256).unwrap();
        let b = ring.allocate(4, 16).unwrap();
        let c = ring.allocate(300, 512).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 256);
        assert_eq!(c.offset(), 512);
        assert_eq!(ring.used(0), 812);
        for allocation in [&a, &b, &c] {
            assert_eq!(allocation.offset() % 256, 0);
            assert!(allocation.gpu_address() >= base);
            assert!(allocation.gpu_address() < base + ring.used(0));
        }
    }

    #[test]
    fn test_constant_buffer_rounds_to_256() {
        let (ctx, mut ring) = setup(4096);
        ring.begin_frame(&ctx, 0).unwrap();
        ring.allocate_constants(&[1.0f32; 4]).unwrap();
        ring.allocate_constants(&[2.0f32; 4]).unwrap();
        assert_eq!(ring.used(0), 512);
    }

    #[test]
    fn test_data_lands_in_slot() {
        let (ctx, mut ring) = setup(4096);
        ring.begin_frame(&ctx, 1).unwrap();
        ring.allocate_constants(&7u32).unwrap();
        let address = ring.allocate_constants(&0xABCDu32).unwrap();
        assert_eq!(address, ring.slot_gpu_address(1) + 256);
        let bytes = ring.slots[1].buffer.resource().read_bytes(256, 4);
        assert_eq!(bytes, 0xABCDu32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_exhaustion_leaves_slot_unchanged() {
        let (ctx, mut ring) = setup(1024);
        ring.begin_frame(&ctx, 0).unwrap();
        ring.allocate(768, 256).unwrap();
        let err = ring.allocate(512, 256).unwrap_err();
        assert!(matches!(
            err,
            RhiError::RingBufferExhausted {
                requested: 512,
                offset: 768,
                capacity: 1024
            }
        ));
        assert_eq!(ring.used(0), 768);
        assert!(ring.allocate(256, 256).is_ok());
    }

    #[test]
    fn test_suballocation_write_bounds() {
        let (ctx, mut ring) = setup(1024);
        ring.begin_frame(&ctx, 0).unwrap();
        let mut allocation = ring.allocate(8, 256).unwrap();
        assert!(allocation.write(&[0; 16]).is_err());
        assert!(allocation.write(&[0; 8]).is_ok());
    }

    #[test]
    fn test_begin_frame_waits_for_submitted_fence() {
        let (mut ctx, mut ring) = setup(1024);
        ring.begin_frame(&ctx, 0).unwrap();
        ring.allocate(256, 256).unwrap();
        let fence = ctx.signal().unwrap();
        ring.end_frame(fence);
        assert_eq!(ring.submitted_fence(0), 1);
        assert!(ctx.completed_fence_value() < 1);

        ring.begin_frame(&ctx, 0).unwrap();
        assert!(ctx.completed_fence_value() >= 1);
        assert_eq!(ring.used(0), 0);
    }

    #[test]
    fn test_slot_out_of_range() {
        let (ctx, mut ring) = setup(1024);
        assert!(ring.begin_frame(&ctx, 2).is_err());
    }

    #[test]
    fn test_concurrent_allocations_are_disjoint() {
        let (ctx, mut ring) = setup(64 * 1024);
        ring.begin_frame(&ctx, 0).unwrap();
        let ring = &ring;
        let mut offsets: Vec<u64> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        (0..16)
                            .map(|_| ring.allocate(256, 256).unwrap().offset())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 64);
        assert_eq!(ring.used(0), 64 * 256);
    }
}
