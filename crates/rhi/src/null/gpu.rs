//! The simulated GPU shared by every null object created from one device.
//!
//! Work is not executed, but everything the debug layer would check is:
//! barrier before-states are compared with the tracked state of each
//! resource when a list is executed, clears must target views whose
//! resources are in the matching state, and draws need a root signature and
//! pipeline. Fence signals are queued in submission order and only retire
//! when the CPU waits on them (or [`NullGpu::retire_all`] is called), so the
//! GPU always lags the CPU the way real hardware does.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::types::{
    CpuDescriptor, DebugMessage, DescriptorHeapType, GpuDescriptor, GpuVirtualAddress,
    IndexBufferView, MessageSeverity, PresentStatus, PrimitiveTopology, ResourceState,
    SamplerDesc, ScissorRect, VertexBufferView, Viewport,
};

/// Identifier of a simulated resource.
pub type ResourceId = u64;

/// Message ids reported by the null debug layer.
pub mod message_id {
    pub const BARRIER_BEFORE_MISMATCH: i32 = 527;
    pub const CLEAR_RTV_WRONG_STATE: i32 = 1001;
    pub const CLEAR_DSV_WRONG_STATE: i32 = 1002;
    pub const VIEW_OF_DESTROYED_RESOURCE: i32 = 1003;
    pub const DRAW_WITHOUT_PIPELINE: i32 = 1004;
    pub const PRESENT_WRONG_STATE: i32 = 1005;
}

/// A command recorded into a null command list.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    SetRootSignature(u64),
    SetPipelineState(u64),
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<ScissorRect>),
    SetRenderTargets {
        render_targets: Vec<CpuDescriptor>,
        depth_stencil: Option<CpuDescriptor>,
    },
    ClearRenderTarget {
        rtv: CpuDescriptor,
        color: [f32; 4],
    },
    ClearDepthStencil {
        dsv: CpuDescriptor,
        depth: Option<f32>,
        stencil: Option<u8>,
    },
    SetDescriptorHeaps(Vec<DescriptorHeapType>),
    SetRootConstantBufferView {
        index: u32,
        address: GpuVirtualAddress,
    },
    SetRootDescriptorTable {
        index: u32,
        base: GpuDescriptor,
    },
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(Option<IndexBufferView>),
    SetPrimitiveTopology(PrimitiveTopology),
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
}

/// What a descriptor slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewRecord {
    RenderTarget(ResourceId),
    DepthStencil(ResourceId),
    NullShaderResource,
    Sampler(SamplerDesc),
}

/// Counters exposed for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub command_lists_executed: u64,
    pub signals: u64,
    /// Fence waits that found the value not yet reached.
    pub blocking_waits: u64,
    pub barriers: u64,
    pub draws: u64,
    pub presents: u64,
    pub frame_latency_waits: u64,
}

pub(crate) struct FenceCell {
    pub(crate) completed: AtomicU64,
}

struct PendingSignal {
    fence: Arc<FenceCell>,
    value: u64,
}

#[derive(Default)]
struct GpuState {
    resources: HashMap<ResourceId, (String, ResourceState)>,
    views: HashMap<usize, ViewRecord>,
    pending: VecDeque<PendingSignal>,
    messages: Vec<DebugMessage>,
    last_command_list: Vec<Command>,
    present_overrides: VecDeque<PresentStatus>,
    stats: GpuStats,
}

/// Shared state of one simulated device.
pub struct NullGpu {
    validation: bool,
    next_id: AtomicU64,
    next_gpu_address: AtomicU64,
    next_heap_base: AtomicU64,
    state: Mutex<GpuState>,
}

impl std::fmt::Debug for NullGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullGpu")
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

const GPU_ADDRESS_BASE: u64 = 0x0001_0000_0000;
const HEAP_BASE: u64 = 0x0010_0000;
const PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

impl NullGpu {
    pub(crate) fn new(validation: bool) -> Arc<Self> {
        Arc::new(Self {
            validation,
            next_id: AtomicU64::new(1),
            next_gpu_address: AtomicU64::new(GPU_ADDRESS_BASE),
            next_heap_base: AtomicU64::new(HEAP_BASE),
            state: Mutex::new(GpuState::default()),
        })
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn reserve_gpu_range(&self, size: u64) -> GpuVirtualAddress {
        let size = size.max(1).next_multiple_of(PLACEMENT_ALIGNMENT);
        self.next_gpu_address.fetch_add(size, Ordering::Relaxed)
    }

    /// Reserves address space for a descriptor heap. Bases never overlap.
    pub(crate) fn reserve_heap_range(&self, bytes: u64) -> u64 {
        let bytes = bytes.max(1).next_multiple_of(PLACEMENT_ALIGNMENT);
        self.next_heap_base.fetch_add(bytes, Ordering::Relaxed)
    }

    pub(crate) fn register_resource(&self, id: ResourceId, label: &str, state: ResourceState) {
        self.state
            .lock()
            .resources
            .insert(id, (label.to_string(), state));
    }

    pub(crate) fn unregister_resource(&self, id: ResourceId) {
        self.state.lock().resources.remove(&id);
    }

    pub(crate) fn record_view(&self, dest: CpuDescriptor, view: ViewRecord) {
        self.state.lock().views.insert(dest.0, view);
    }

    /// Tracked state of a live resource, as of the last executed list.
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.state.lock().resources.get(&id).map(|(_, s)| *s)
    }

    pub fn view(&self, dest: CpuDescriptor) -> Option<ViewRecord> {
        self.state.lock().views.get(&dest.0).copied()
    }

    pub fn stats(&self) -> GpuStats {
        self.state.lock().stats
    }

    /// Commands of the most recently executed list.
    pub fn last_command_list(&self) -> Vec<Command> {
        self.state.lock().last_command_list.clone()
    }

    /// Number of queued signals the GPU has not retired yet.
    pub fn pending_signals(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Makes the next present return `status` instead of presenting.
    pub fn inject_present_status(&self, status: PresentStatus) {
        self.state.lock().present_overrides.push_back(status);
    }

    /// Retires every queued signal.
    pub fn retire_all(&self) {
        let mut state = self.state.lock();
        while let Some(signal) = state.pending.pop_front() {
            signal.fence.completed.fetch_max(signal.value, Ordering::AcqRel);
        }
    }

    /// Retires queued signals in order until `fence` reaches `value`.
    ///
    /// Returns whether the value was reached.
    pub(crate) fn retire_until(&self, fence: &Arc<FenceCell>, value: u64) -> bool {
        let mut state = self.state.lock();
        state.stats.blocking_waits += 1;
        while fence.completed.load(Ordering::Acquire) < value {
            let Some(signal) = state.pending.pop_front() else {
                return false;
            };
            signal.fence.completed.fetch_max(signal.value, Ordering::AcqRel);
        }
        true
    }

    pub(crate) fn signal(&self, fence: Arc<FenceCell>, value: u64) {
        let mut state = self.state.lock();
        state.stats.signals += 1;
        state.pending.push_back(PendingSignal { fence, value });
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    pub(crate) fn take_messages(&self) -> Vec<DebugMessage> {
        std::mem::take(&mut self.state.lock().messages)
    }

    pub(crate) fn note_frame_latency_wait(&self) {
        self.state.lock().stats.frame_latency_waits += 1;
    }

    /// Runs the validation a debug layer performs on `ExecuteCommandLists`
    /// and applies the barriers to the tracked states.
    pub(crate) fn execute(&self, commands: &[Command]) {
        let mut state = self.state.lock();
        let mut messages = Vec::new();
        let mut root_signature = false;
        let mut pipeline = false;

        for command in commands {
            match command {
                Command::Barrier {
                    resource,
                    before,
                    after,
                } => {
                    state.stats.barriers += 1;
                    match state.resources.get_mut(resource) {
                        Some((label, tracked)) => {
                            if !tracked.matches(*before) {
                                messages.push(error(
                                    message_id::BARRIER_BEFORE_MISMATCH,
                                    format!(
                                        "ResourceBarrier: before state {before:?} of '{label}' does not match tracked state {tracked:?}"
                                    ),
                                ));
                            }
                            *tracked = *after;
                        }
                        None => messages.push(error(
                            message_id::VIEW_OF_DESTROYED_RESOURCE,
                            format!("ResourceBarrier: resource {resource} was destroyed"),
                        )),
                    }
                }
                Command::ClearRenderTarget { rtv, .. } => {
                    if let Some(message) = check_view(
                        &state,
                        *rtv,
                        ResourceState::RenderTarget,
                        message_id::CLEAR_RTV_WRONG_STATE,
                    ) {
                        messages.push(message);
                    }
                }
                Command::ClearDepthStencil { dsv, .. } => {
                    if let Some(message) = check_view(
                        &state,
                        *dsv,
                        ResourceState::DepthWrite,
                        message_id::CLEAR_DSV_WRONG_STATE,
                    ) {
                        messages.push(message);
                    }
                }
                Command::SetRootSignature(_) => root_signature = true,
                Command::SetPipelineState(_) => pipeline = true,
                Command::DrawIndexedInstanced { .. } => {
                    state.stats.draws += 1;
                    if !root_signature || !pipeline {
                        messages.push(error(
                            message_id::DRAW_WITHOUT_PIPELINE,
                            "DrawIndexedInstanced: no root signature or pipeline state bound"
                                .to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }

        state.stats.command_lists_executed += 1;
        state.last_command_list = commands.to_vec();
        if self.validation {
            state.messages.extend(messages);
        }
        trace!("Null GPU executed {} commands", commands.len());
    }

    /// Validates a present of `buffer` and returns an injected status if any.
    pub(crate) fn present(&self, buffer: ResourceId) -> Option<PresentStatus> {
        let mut state = self.state.lock();
        if let Some(status) = state.present_overrides.pop_front() {
            return Some(status);
        }
        state.stats.presents += 1;
        let tracked = state.resources.get(&buffer).map(|(_, s)| *s);
        match tracked {
            Some(s) if s.matches(ResourceState::Present) => {}
            other => {
                if self.validation {
                    state.messages.push(error(
                        message_id::PRESENT_WRONG_STATE,
                        format!("Present: back buffer is in {other:?}, expected Present"),
                    ));
                }
            }
        }
        None
    }
}

fn error(id: i32, description: String) -> DebugMessage {
    DebugMessage {
        severity: MessageSeverity::Error,
        id,
        description,
    }
}

fn check_view(
    state: &GpuState,
    view: CpuDescriptor,
    required: ResourceState,
    id: i32,
) -> Option<DebugMessage> {
    let resource = match state.views.get(&view.0) {
        Some(ViewRecord::RenderTarget(r)) | Some(ViewRecord::DepthStencil(r)) => *r,
        _ => {
            return Some(error(
                id,
                format!("Clear: descriptor {:#x} holds no target view", view.0),
            ));
        }
    };
    match state.resources.get(&resource) {
        Some((_, tracked)) if tracked.matches(required) => None,
        Some((label, tracked)) => Some(error(
            id,
            format!("Clear: '{label}' is in {tracked:?}, expected {required:?}"),
        )),
        None => Some(error(
            message_id::VIEW_OF_DESTROYED_RESOURCE,
            format!("Clear: descriptor {:#x} refers to a destroyed resource", view.0),
        )),
    }
}

/// Backing memory of an upload buffer. Never moves while the resource lives.
pub(crate) struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostMemory {
    pub(crate) fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let raw = Box::into_raw(boxed) as *mut u8;
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, len }
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let end = offset
            .checked_add(len)
            .map_or(self.len, |end| end.min(self.len));
        let start = offset.min(end);
        // SAFETY: the range is clamped to the allocation.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(start), end - start).to_vec() }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: ptr and len come from the boxed slice leaked in `zeroed`.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

// SAFETY: the memory is plain bytes; writers coordinate through fences.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

pub(crate) struct ResourceInner {
    pub(crate) id: ResourceId,
    pub(crate) label: String,
    pub(crate) size: u64,
    pub(crate) gpu_address: GpuVirtualAddress,
    pub(crate) memory: Option<HostMemory>,
    pub(crate) gpu: Weak<NullGpu>,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        if let Some(gpu) = self.gpu.upgrade() {
            gpu.unregister_resource(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_memory_read_is_clamped() {
        let memory = HostMemory::zeroed(64);
        assert_eq!(memory.read(0, 16).len(), 16);
        assert_eq!(memory.read(60, 16).len(), 4);
        assert!(memory.read(100, 4).is_empty());
        assert_eq!(memory.read(8, usize::MAX).len(), 56);
        assert!(memory.read(usize::MAX, usize::MAX).is_empty());
    }
}
