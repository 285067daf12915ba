//! Descriptor heap management.
//!
//! This module hands out typed descriptor slots from the four descriptor
//! heaps:
//! - [`DescriptorIndexAllocator`] tracks which slot indices are in use
//! - [`DescriptorHeap`] owns one heap and turns indices into addresses
//! - [`DescriptorHeapManager`] owns one heap of each type
//!
//! # Overview
//!
//! Single slots come from a LIFO free list first and from a linear cursor
//! otherwise, so a slot freed a moment ago is the next one reused. Blocks of
//! consecutive slots (descriptor tables) only ever come from the cursor,
//! because the free list cannot guarantee adjacency. Freed blocks go back
//! onto the free list one index at a time.
//!
//! [`Descriptor`] and [`DescriptorRange`] own their slots and return them
//! on drop. Code that manages slot lifetimes by hand (UI libraries asking
//! for raw addresses) uses the `*_handle` and `*_raw` variants instead.
//!
//! # Example
//!
//! ```
//! use forge_rhi::descriptor::DescriptorHeap;
//! use forge_rhi::hal::{Adapter, Instance};
//! use forge_rhi::null::{Null, NullInstance};
//! use forge_rhi::types::{DescriptorHeapDesc, DescriptorHeapType, FeatureLevel, InstanceDesc};
//!
//! # fn main() -> forge_rhi::RhiResult<()> {
//! # let instance = NullInstance::init(&InstanceDesc::default())?;
//! # let device = instance.enumerate_adapters(None)?[2].open(FeatureLevel::Level12_0, false)?;
//! let heap = DescriptorHeap::<Null>::new(
//!     &device,
//!     &DescriptorHeapDesc {
//!         ty: DescriptorHeapType::ShaderResource,
//!         capacity: 64,
//!         shader_visible: true,
//!     },
//! )?;
//!
//! let texture_view = heap.allocate()?;
//! assert_eq!(texture_view.index(), 0);
//! drop(texture_view);
//!
//! // The slot is back on the free list.
//! assert_eq!(heap.allocate()?.index(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Each allocator is guarded by its own mutex, so slots may be allocated and
//! freed from any thread. Turning an index into addresses is plain
//! arithmetic and takes no lock.

use std::sync::Arc;

use forge_core::config::DescriptorCapacities;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::hal::{self, Api, Device};
use crate::types::{CpuDescriptor, DescriptorHeapDesc, DescriptorHeapType, GpuDescriptor};

#[derive(Debug)]
struct AllocatorState {
    cursor: u32,
    free_list: Vec<u32>,
    /// One bit per slot, set while the slot is handed out.
    issued: Vec<u64>,
    issued_count: u32,
}

impl AllocatorState {
    #[inline]
    fn is_issued(&self, index: u32) -> bool {
        self.issued[(index / 64) as usize] & (1 << (index % 64)) != 0
    }

    #[inline]
    fn set_issued(&mut self, index: u32, issued: bool) {
        let word = &mut self.issued[(index / 64) as usize];
        if issued {
            *word |= 1 << (index % 64);
            self.issued_count += 1;
        } else {
            *word &= !(1 << (index % 64));
            self.issued_count -= 1;
        }
    }
}

/// Slot index allocator for one descriptor heap.
///
/// Every index handed out is outstanding exactly once: a slot is only
/// returned again after it has been freed, and freeing a slot that is not
/// outstanding is ignored with a warning.
#[derive(Debug)]
pub struct DescriptorIndexAllocator {
    heap_type: DescriptorHeapType,
    capacity: u32,
    state: Mutex<AllocatorState>,
}

impl DescriptorIndexAllocator {
    pub fn new(heap_type: DescriptorHeapType, capacity: u32) -> Self {
        Self {
            heap_type,
            capacity,
            state: Mutex::new(AllocatorState {
                cursor: 0,
                free_list: Vec::new(),
                issued: vec![0; capacity.div_ceil(64) as usize],
                issued_count: 0,
            }),
        }
    }

    /// Allocates one slot, preferring the most recently freed one.
    ///
    /// # Errors
    ///
    /// [`RhiError::DescriptorHeapExhausted`] when the cursor has reached the
    /// capacity and the free list is empty.
    pub fn allocate(&self) -> RhiResult<u32> {
        let mut state = self.state.lock();
        let index = match state.free_list.pop() {
            Some(index) => index,
            None if state.cursor < self.capacity => {
                let index = state.cursor;
                state.cursor += 1;
                index
            }
            None => {
                return Err(RhiError::DescriptorHeapExhausted {
                    heap: self.heap_type,
                    capacity: self.capacity,
                    requested: 1,
                });
            }
        };
        state.set_issued(index, true);
        Ok(index)
    }

    /// Allocates `count` consecutive slots from the cursor.
    ///
    /// The free list is never used, even if it holds a long enough run.
    /// Returns the first index.
    ///
    /// # Errors
    ///
    /// [`RhiError::DescriptorHeapExhausted`] if `cursor + count` exceeds the
    /// capacity, [`RhiError::InvalidArgument`] if `count` is zero.
    pub fn allocate_contiguous(&self, count: u32) -> RhiResult<u32> {
        if count == 0 {
            return Err(RhiError::InvalidArgument(
                "contiguous descriptor block of zero slots".into(),
            ));
        }
        let mut state = self.state.lock();
        let first = state.cursor;
        if u64::from(first) + u64::from(count) > u64::from(self.capacity) {
            return Err(RhiError::DescriptorHeapExhausted {
                heap: self.heap_type,
                capacity: self.capacity,
                requested: count,
            });
        }
        state.cursor += count;
        for index in first..first + count {
            state.set_issued(index, true);
        }
        Ok(first)
    }

    /// Returns one slot to the free list.
    ///
    /// Returns `false`, and changes nothing, if `index` is out of range or
    /// not currently allocated.
    pub fn free(&self, index: u32) -> bool {
        let mut state = self.state.lock();
        self.free_locked(&mut state, index)
    }

    /// Returns `count` consecutive slots, pushing them in ascending order.
    ///
    /// Returns how many slots were actually freed.
    pub fn free_contiguous(&self, first: u32, count: u32) -> u32 {
        let mut state = self.state.lock();
        (first..first.saturating_add(count))
            .filter(|&index| self.free_locked(&mut state, index))
            .count() as u32
    }

    fn free_locked(&self, state: &mut AllocatorState, index: u32) -> bool {
        if index >= self.capacity || !state.is_issued(index) {
            warn!(
                "Ignoring free of {:?} descriptor {} (not allocated)",
                self.heap_type, index
            );
            return false;
        }
        state.set_issued(index, false);
        state.free_list.push(index);
        true
    }

    #[inline]
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots currently handed out.
    pub fn issued_count(&self) -> u32 {
        self.state.lock().issued_count
    }

    /// Next never-used index.
    pub fn cursor(&self) -> u32 {
        self.state.lock().cursor
    }

    pub fn free_list_len(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn is_issued(&self, index: u32) -> bool {
        index < self.capacity && self.state.lock().is_issued(index)
    }
}

/// Addresses of one descriptor slot.
///
/// A handle is plain data; it does not own its slot. See [`Descriptor`] for
/// the owning form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub heap_type: DescriptorHeapType,
    pub index: u32,
    pub cpu: CpuDescriptor,
    /// Zero unless the heap is shader visible.
    pub gpu: GpuDescriptor,
}

impl DescriptorHandle {
    pub const INVALID_INDEX: u32 = u32::MAX;

    /// A handle that refers to no slot.
    pub const fn invalid(heap_type: DescriptorHeapType) -> Self {
        Self {
            heap_type,
            index: Self::INVALID_INDEX,
            cpu: CpuDescriptor(0),
            gpu: GpuDescriptor(0),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.index != Self::INVALID_INDEX && !self.cpu.is_null()
    }

    #[inline]
    pub fn is_shader_visible(&self) -> bool {
        !self.gpu.is_null()
    }
}

/// An owned descriptor slot, returned to its heap on drop.
#[derive(Debug)]
pub struct Descriptor {
    handle: DescriptorHandle,
    allocator: Option<Arc<DescriptorIndexAllocator>>,
}

impl Descriptor {
    #[inline]
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.handle.index
    }

    #[inline]
    pub fn cpu(&self) -> CpuDescriptor {
        self.handle.cpu
    }

    #[inline]
    pub fn gpu(&self) -> GpuDescriptor {
        self.handle.gpu
    }

    /// Gives up ownership; the slot stays allocated until freed by hand.
    pub fn into_raw(mut self) -> DescriptorHandle {
        self.allocator = None;
        self.handle
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            allocator.free(self.handle.index);
        }
    }
}

/// An owned block of consecutive descriptor slots, returned on drop.
#[derive(Debug)]
pub struct DescriptorRange {
    first: DescriptorHandle,
    count: u32,
    increment: u32,
    allocator: Option<Arc<DescriptorIndexAllocator>>,
}

impl DescriptorRange {
    /// Handle of the first slot. Its GPU address is what gets bound as a
    /// descriptor table.
    #[inline]
    pub fn first(&self) -> DescriptorHandle {
        self.first
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Handle of slot `i` of the block, if `i < len()`.
    pub fn handle(&self, i: u32) -> Option<DescriptorHandle> {
        (i < self.count).then(|| DescriptorHandle {
            heap_type: self.first.heap_type,
            index: self.first.index + i,
            cpu: self.first.cpu.offset(i, self.increment),
            gpu: if self.first.gpu.is_null() {
                GpuDescriptor(0)
            } else {
                self.first.gpu.offset(i, self.increment)
            },
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = DescriptorHandle> + '_ {
        (0..self.count).filter_map(|i| self.handle(i))
    }

    /// Gives up ownership, returning the first handle and the count.
    pub fn into_raw(mut self) -> (DescriptorHandle, u32) {
        self.allocator = None;
        (self.first, self.count)
    }
}

impl Drop for DescriptorRange {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            allocator.free_contiguous(self.first.index, self.count);
        }
    }
}

/// One descriptor heap and its slot allocator.
pub struct DescriptorHeap<A: Api> {
    raw: A::DescriptorHeap,
    ty: DescriptorHeapType,
    shader_visible: bool,
    capacity: u32,
    increment: u32,
    cpu_start: CpuDescriptor,
    gpu_start: GpuDescriptor,
    allocator: Arc<DescriptorIndexAllocator>,
}

impl<A: Api> DescriptorHeap<A> {
    /// Creates a heap.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the heap cannot be created, including a
    /// zero capacity or a shader-visible RTV/DSV heap.
    pub fn new(device: &A::Device, desc: &DescriptorHeapDesc) -> RhiResult<Self> {
        let raw = device.create_descriptor_heap(desc)?;
        let increment = device.descriptor_increment_size(desc.ty);
        let cpu_start = hal::DescriptorHeap::cpu_start(&raw);
        let gpu_start = if desc.shader_visible {
            hal::DescriptorHeap::gpu_start(&raw).unwrap_or_default()
        } else {
            GpuDescriptor(0)
        };

        debug!(
            "Created {:?} descriptor heap ({} slots, increment {}, shader visible {})",
            desc.ty, desc.capacity, increment, desc.shader_visible
        );

        Ok(Self {
            raw,
            ty: desc.ty,
            shader_visible: desc.shader_visible,
            capacity: desc.capacity,
            increment,
            cpu_start,
            gpu_start,
            allocator: Arc::new(DescriptorIndexAllocator::new(desc.ty, desc.capacity)),
        })
    }

    #[inline]
    pub fn raw(&self) -> &A::DescriptorHeap {
        &self.raw
    }

    #[inline]
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.ty
    }

    #[inline]
    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn increment_size(&self) -> u32 {
        self.increment
    }

    #[inline]
    pub fn cpu_start(&self) -> CpuDescriptor {
        self.cpu_start
    }

    #[inline]
    pub fn gpu_start(&self) -> GpuDescriptor {
        self.gpu_start
    }

    pub fn allocator(&self) -> &Arc<DescriptorIndexAllocator> {
        &self.allocator
    }

    /// Addresses of slot `index`, allocated or not.
    ///
    /// # Errors
    ///
    /// [`RhiError::DescriptorIndexOutOfRange`] if `index >= capacity`.
    pub fn handle_at(&self, index: u32) -> RhiResult<DescriptorHandle> {
        if index >= self.capacity {
            return Err(RhiError::DescriptorIndexOutOfRange {
                heap: self.ty,
                index,
                capacity: self.capacity,
            });
        }
        Ok(self.materialize(index))
    }

    #[inline]
    fn materialize(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            heap_type: self.ty,
            index,
            cpu: self.cpu_start.offset(index, self.increment),
            gpu: if self.shader_visible {
                self.gpu_start.offset(index, self.increment)
            } else {
                GpuDescriptor(0)
            },
        }
    }

    /// Allocates an owned slot.
    pub fn allocate(&self) -> RhiResult<Descriptor> {
        let handle = self.allocate_handle()?;
        Ok(Descriptor {
            handle,
            allocator: Some(self.allocator.clone()),
        })
    }

    /// Allocates an owned block of `count` consecutive slots.
    pub fn allocate_contiguous(&self, count: u32) -> RhiResult<DescriptorRange> {
        let first = self.allocator.allocate_contiguous(count)?;
        Ok(DescriptorRange {
            first: self.materialize(first),
            count,
            increment: self.increment,
            allocator: Some(self.allocator.clone()),
        })
    }

    /// Allocates a slot the caller frees with [`Self::free_handle`].
    pub fn allocate_handle(&self) -> RhiResult<DescriptorHandle> {
        let index = self.allocator.allocate()?;
        Ok(self.materialize(index))
    }

    /// Frees a slot from [`Self::allocate_handle`].
    ///
    /// Invalid handles, handles of another heap type and slots that are not
    /// allocated are ignored; returns whether the slot was freed.
    pub fn free_handle(&self, handle: DescriptorHandle) -> bool {
        if !handle.is_valid() || handle.heap_type != self.ty {
            return false;
        }
        self.allocator.free(handle.index)
    }

    /// Frees `count` slots starting at `first`. Returns how many were freed.
    pub fn free_contiguous(&self, first: DescriptorHandle, count: u32) -> u32 {
        if !first.is_valid() || first.heap_type != self.ty {
            return 0;
        }
        self.allocator.free_contiguous(first.index, count)
    }

    /// Allocates a slot and returns only its raw addresses.
    pub fn allocate_raw(&self) -> RhiResult<(CpuDescriptor, GpuDescriptor)> {
        let handle = self.allocate_handle()?;
        Ok((handle.cpu, handle.gpu))
    }

    /// Frees a slot from [`Self::allocate_raw`], recovering its index from
    /// the CPU address.
    pub fn free_raw(&self, cpu: CpuDescriptor, gpu: GpuDescriptor) -> bool {
        let Some(index) = self.index_of(cpu) else {
            warn!(
                "Ignoring free of {:#x}: not a slot of the {:?} heap",
                cpu.0, self.ty
            );
            return false;
        };
        if self.shader_visible && self.materialize(index).gpu != gpu {
            warn!(
                "GPU address {:#x} does not match slot {} of the {:?} heap",
                gpu.0, index, self.ty
            );
        }
        self.allocator.free(index)
    }

    /// Slot index of a CPU address inside this heap.
    pub fn index_of(&self, cpu: CpuDescriptor) -> Option<u32> {
        let offset = cpu.0.checked_sub(self.cpu_start.0)?;
        let increment = self.increment as usize;
        if offset % increment != 0 {
            return None;
        }
        let index = u32::try_from(offset / increment).ok()?;
        (index < self.capacity).then_some(index)
    }

    pub fn issued_count(&self) -> u32 {
        self.allocator.issued_count()
    }
}

/// The four descriptor heaps of a device.
///
/// RTV and DSV heaps are CPU-only; the CBV/SRV/UAV and sampler heaps are
/// shader visible and are the two heaps bound with `SetDescriptorHeaps`.
pub struct DescriptorHeapManager<A: Api> {
    render_target: DescriptorHeap<A>,
    depth_stencil: DescriptorHeap<A>,
    shader_resource: DescriptorHeap<A>,
    sampler: DescriptorHeap<A>,
}

impl<A: Api> DescriptorHeapManager<A> {
    /// Creates the four heaps with the given capacities.
    pub fn new(device: &A::Device, capacities: &DescriptorCapacities) -> RhiResult<Self> {
        let heap = |ty, capacity, shader_visible| {
            DescriptorHeap::new(
                device,
                &DescriptorHeapDesc {
                    ty,
                    capacity,
                    shader_visible,
                },
            )
        };

        let manager = Self {
            render_target: heap(
                DescriptorHeapType::RenderTarget,
                capacities.render_target,
                false,
            )?,
            depth_stencil: heap(
                DescriptorHeapType::DepthStencil,
                capacities.depth_stencil,
                false,
            )?,
            shader_resource: heap(
                DescriptorHeapType::ShaderResource,
                capacities.shader_resource,
                true,
            )?,
            sampler: heap(DescriptorHeapType::Sampler, capacities.sampler, true)?,
        };

        info!(
            "Descriptor heaps created (RTV {}, DSV {}, CBV/SRV/UAV {}, sampler {})",
            capacities.render_target,
            capacities.depth_stencil,
            capacities.shader_resource,
            capacities.sampler
        );
        Ok(manager)
    }

    pub fn heap(&self, ty: DescriptorHeapType) -> &DescriptorHeap<A> {
        match ty {
            DescriptorHeapType::RenderTarget => &self.render_target,
            DescriptorHeapType::DepthStencil => &self.depth_stencil,
            DescriptorHeapType::ShaderResource => &self.shader_resource,
            DescriptorHeapType::Sampler => &self.sampler,
        }
    }

    pub fn allocate(&self, ty: DescriptorHeapType) -> RhiResult<Descriptor> {
        self.heap(ty).allocate()
    }

    pub fn allocate_handle(&self, ty: DescriptorHeapType) -> RhiResult<DescriptorHandle> {
        self.heap(ty).allocate_handle()
    }

    pub fn free(&self, ty: DescriptorHeapType, handle: DescriptorHandle) -> bool {
        self.heap(ty).free_handle(handle)
    }

    pub fn allocate_contiguous(
        &self,
        ty: DescriptorHeapType,
        count: u32,
    ) -> RhiResult<DescriptorRange> {
        self.heap(ty).allocate_contiguous(count)
    }

    pub fn free_contiguous(&self, ty: DescriptorHeapType, first: DescriptorHandle, count: u32) -> u32 {
        self.heap(ty).free_contiguous(first, count)
    }

    pub fn allocate_raw(&self, ty: DescriptorHeapType) -> RhiResult<(CpuDescriptor, GpuDescriptor)> {
        self.heap(ty).allocate_raw()
    }

    pub fn free_raw(&self, ty: DescriptorHeapType, cpu: CpuDescriptor, gpu: GpuDescriptor) -> bool {
        self.heap(ty).free_raw(cpu, gpu)
    }

    /// The CBV/SRV/UAV and sampler heaps, in binding order.
    pub fn shader_visible_heaps(&self) -> [&A::DescriptorHeap; 2] {
        [self.shader_resource.raw(), self.sampler.raw()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Adapter, Instance};
    use crate::null::{Null, NullDevice, NullInstance, CBV_SRV_UAV_INCREMENT, SAMPLER_INCREMENT};
    use crate::types::{FeatureLevel, InstanceDesc};

    fn device() -> NullDevice {
        let instance = NullInstance::init(&InstanceDesc::default()).unwrap();
        instance.enumerate_adapters(None).unwrap()[2]
            .open(FeatureLevel::Level12_0, true)
            .unwrap()
    }

    fn heap(ty: DescriptorHeapType, capacity: u32) -> DescriptorHeap<Null> {
        DescriptorHeap::new(
            &device(),
            &DescriptorHeapDesc {
                ty,
                capacity,
                shader_visible: ty.can_be_shader_visible(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_allocate_free_allocate_returns_same_index() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::ShaderResource, 8);
        let a = allocator.allocate().unwrap();
        allocator.free(a);
        assert_eq!(allocator.allocate().unwrap(), a);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::ShaderResource, 64);
        let indices: Vec<u32> = (0..10).map(|_| allocator.allocate().unwrap()).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());

        assert!(allocator.free(4));
        assert!(allocator.free(7));
        assert_eq!(allocator.allocate().unwrap(), 7);
        assert_eq!(allocator.allocate().unwrap(), 4);
        assert_eq!(allocator.allocate().unwrap(), 10);
    }

    #[test]
    fn test_exhaustion() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::DepthStencil, 2);
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        let err = allocator.allocate().unwrap_err();
        assert!(matches!(
            err,
            RhiError::DescriptorHeapExhausted {
                capacity: 2,
                requested: 1,
                ..
            }
        ));

        allocator.free(1);
        assert_eq!(allocator.allocate().unwrap(), 1);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::Sampler, 4);
        let index = allocator.allocate().unwrap();
        assert!(allocator.free(index));
        assert!(!allocator.free(index));
        assert!(!allocator.free(3));
        assert!(!allocator.free(DescriptorHandle::INVALID_INDEX));
        assert_eq!(allocator.free_list_len(), 1);
        assert_eq!(allocator.issued_count(), 0);
    }

    #[test]
    fn test_contiguous_uses_cursor_only() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::Sampler, 40);
        let a = allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        allocator.free(a);

        // Slot 0 is free, but a block never comes from the free list.
        assert_eq!(allocator.allocate_contiguous(4).unwrap(), 2);
        assert_eq!(allocator.cursor(), 6);
        assert!(allocator.allocate_contiguous(35).is_err());
        assert!(allocator.allocate_contiguous(0).is_err());
    }

    #[test]
    fn test_contiguous_round_trip_restores_issued_count() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::ShaderResource, 128);
        allocator.allocate().unwrap();
        let before = allocator.issued_count();
        let first = allocator.allocate_contiguous(16).unwrap();
        assert_eq!(allocator.issued_count(), before + 16);
        assert_eq!(allocator.free_contiguous(first, 16), 16);
        assert_eq!(allocator.issued_count(), before);
    }

    #[test]
    fn test_issued_count_tracks_allocations_minus_frees() {
        let allocator = DescriptorIndexAllocator::new(DescriptorHeapType::ShaderResource, 256);
        let mut live = Vec::new();
        for round in 0..200u32 {
            if round % 3 == 2 {
                let index = live.remove((round as usize * 7) % live.len());
                assert!(allocator.free(index));
            } else {
                let index = allocator.allocate().unwrap();
                assert!(!live.contains(&index), "index {index} handed out twice");
                live.push(index);
            }
            assert_eq!(allocator.issued_count() as usize, live.len());
        }
    }

    #[test]
    fn test_handle_addresses() {
        let heap = heap(DescriptorHeapType::ShaderResource, 16);
        let handle = heap.handle_at(3).unwrap();
        assert_eq!(
            handle.cpu.0 - heap.cpu_start().0,
            3 * CBV_SRV_UAV_INCREMENT as usize
        );
        assert_eq!(
            handle.gpu.0 - heap.gpu_start().0,
            3 * CBV_SRV_UAV_INCREMENT as u64
        );
        assert!(handle.is_valid());
        assert!(handle.is_shader_visible());

        assert!(matches!(
            heap.handle_at(16),
            Err(RhiError::DescriptorIndexOutOfRange {
                index: 16,
                capacity: 16,
                ..
            })
        ));
    }

    #[test]
    fn test_cpu_only_heap_has_no_gpu_address() {
        let heap = heap(DescriptorHeapType::RenderTarget, 4);
        let handle = heap.allocate_handle().unwrap();
        assert!(handle.is_valid());
        assert!(!handle.is_shader_visible());
    }

    #[test]
    fn test_owned_descriptor_frees_on_drop() {
        let heap = heap(DescriptorHeapType::ShaderResource, 8);
        let descriptor = heap.allocate().unwrap();
        assert_eq!(heap.issued_count(), 1);
        drop(descriptor);
        assert_eq!(heap.issued_count(), 0);
    }

    #[test]
    fn test_into_raw_keeps_slot() {
        let heap = heap(DescriptorHeapType::ShaderResource, 8);
        let handle = heap.allocate().unwrap().into_raw();
        assert_eq!(heap.issued_count(), 1);
        assert!(heap.free_handle(handle));
        assert!(!heap.free_handle(handle));
        assert!(!heap.free_handle(DescriptorHandle::invalid(DescriptorHeapType::ShaderResource)));
    }

    #[test]
    fn test_sampler_table_block() {
        let heap = heap(DescriptorHeapType::Sampler, 2048);
        let block = heap.allocate_contiguous(33).unwrap();
        assert_eq!(block.first().index, 0);
        let addresses: Vec<usize> = block.iter().map(|h| h.cpu.0).collect();
        assert_eq!(addresses.len(), 33);
        for pair in addresses.windows(2) {
            assert_eq!(pair[1] - pair[0], SAMPLER_INCREMENT as usize);
        }
        assert!(block.handle(33).is_none());

        drop(block);
        assert_eq!(heap.allocator().cursor(), 33);
        // Freed in ascending order, so the free list pops 32 first.
        assert_eq!(heap.allocate_handle().unwrap().index, 32);
    }

    #[test]
    fn test_raw_round_trip() {
        let heap = heap(DescriptorHeapType::ShaderResource, 8);
        heap.allocate_handle().unwrap();
        let (cpu, gpu) = heap.allocate_raw().unwrap();
        assert_eq!(heap.index_of(cpu), Some(1));
        assert!(heap.free_raw(cpu, gpu));
        assert_eq!(heap.allocate_handle().unwrap().index, 1);

        assert_eq!(heap.index_of(CpuDescriptor(cpu.0 + 1)), None);
        assert_eq!(heap.index_of(CpuDescriptor(1)), None);
        assert!(!heap.free_raw(CpuDescriptor(cpu.0 + 1), gpu));
    }

    #[test]
    fn test_manager_heaps() {
        let device = device();
        let manager = DescriptorHeapManager::<Null>::new(
            &device,
            &DescriptorCapacities {
                render_target: 4,
                depth_stencil: 2,
                shader_resource: 64,
                sampler: 64,
            },
        )
        .unwrap();

        for ty in DescriptorHeapType::ALL {
            assert_eq!(manager.heap(ty).heap_type(), ty);
            assert_eq!(
                manager.heap(ty).is_shader_visible(),
                ty.can_be_shader_visible()
            );
        }

        let handle = manager
            .allocate_handle(DescriptorHeapType::RenderTarget)
            .unwrap();
        // Handles are tied to their heap type.
        assert!(!manager.free(DescriptorHeapType::DepthStencil, handle));
        assert!(manager.free(DescriptorHeapType::RenderTarget, handle));
    }

    #[test]
    fn test_allocator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DescriptorIndexAllocator>();
        assert_send_sync::<Descriptor>();
    }
}
