use std::mem::ManuallyDrop;

use windows::Win32::Graphics::Direct3D12::*;

use super::{D3d12, D3d12CommandAllocator, D3d12DescriptorHeap, D3d12PipelineState, D3d12Resource, D3d12RootSignature, conv};
use crate::error::{ApiContext, RhiResult};
use crate::hal;
use crate::types::{
    CpuDescriptor, GpuDescriptor, GpuVirtualAddress, IndexBufferView, PrimitiveTopology,
    ScissorRect, TransitionBarrier, VertexBufferView, Viewport,
};

/// Direct graphics command list.
pub struct D3d12CommandList {
    raw: ID3D12GraphicsCommandList,
}

// SAFETY: a command list may move between threads; recording requires `&mut`.
unsafe impl Send for D3d12CommandList {}

impl D3d12CommandList {
    pub(super) fn new(raw: ID3D12GraphicsCommandList) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &ID3D12GraphicsCommandList {
        &self.raw
    }
}

#[inline]
fn cpu(descriptor: CpuDescriptor) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: descriptor.0 }
}

fn transition(barrier: &TransitionBarrier<'_, D3d12Resource>) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // SAFETY: borrowed without AddRef; the barrier never outlives
                // the call and is never dropped.
                pResource: unsafe { std::mem::transmute_copy(barrier.resource.raw()) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: conv::resource_state(barrier.before),
                StateAfter: conv::resource_state(barrier.after),
            }),
        },
    }
}

impl hal::CommandList for D3d12CommandList {
    type A = D3d12;

    fn reset(&mut self, allocator: &D3d12CommandAllocator) -> RhiResult<()> {
        unsafe { self.raw.Reset(&allocator.raw, None::<&ID3D12PipelineState>) }
            .context("ID3D12GraphicsCommandList::Reset")
    }

    fn close(&mut self) -> RhiResult<()> {
        unsafe { self.raw.Close() }.context("ID3D12GraphicsCommandList::Close")
    }

    fn transition_barriers(&mut self, barriers: &[TransitionBarrier<'_, D3d12Resource>]) {
        if barriers.is_empty() {
            return;
        }
        let raw: Vec<D3D12_RESOURCE_BARRIER> = barriers.iter().map(transition).collect();
        unsafe { self.raw.ResourceBarrier(&raw) };
    }

    fn set_graphics_root_signature(&mut self, root_signature: &D3d12RootSignature) {
        unsafe { self.raw.SetGraphicsRootSignature(&root_signature.raw) };
    }

    fn set_pipeline_state(&mut self, pipeline: &D3d12PipelineState) {
        unsafe { self.raw.SetPipelineState(&pipeline.raw) };
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        let raw: Vec<D3D12_VIEWPORT> = viewports
            .iter()
            .map(|v| D3D12_VIEWPORT {
                TopLeftX: v.x,
                TopLeftY: v.y,
                Width: v.width,
                Height: v.height,
                MinDepth: v.min_depth,
                MaxDepth: v.max_depth,
            })
            .collect();
        unsafe { self.raw.RSSetViewports(&raw) };
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        let raw: Vec<windows::Win32::Foundation::RECT> = rects
            .iter()
            .map(|r| windows::Win32::Foundation::RECT {
                left: r.left,
                top: r.top,
                right: r.right,
                bottom: r.bottom,
            })
            .collect();
        unsafe { self.raw.RSSetScissorRects(&raw) };
    }

    fn set_render_targets(&mut self, render_targets: &[CpuDescriptor], depth_stencil: Option<CpuDescriptor>) {
        let rtvs: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> = render_targets.iter().copied().map(cpu).collect();
        let dsv = depth_stencil.map(cpu);
        unsafe {
            self.raw.OMSetRenderTargets(
                rtvs.len() as u32,
                Some(rtvs.as_ptr()),
                false,
                dsv.as_ref().map(|d| d as *const _),
            )
        };
    }

    fn clear_render_target_view(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        unsafe { self.raw.ClearRenderTargetView(cpu(rtv), &color, None) };
    }

    fn clear_depth_stencil_view(&mut self, dsv: CpuDescriptor, depth: Option<f32>, stencil: Option<u8>) {
        let mut flags = D3D12_CLEAR_FLAGS(0);
        if depth.is_some() {
            flags |= D3D12_CLEAR_FLAG_DEPTH;
        }
        if stencil.is_some() {
            flags |= D3D12_CLEAR_FLAG_STENCIL;
        }
        unsafe {
            self.raw.ClearDepthStencilView(
                cpu(dsv),
                flags,
                depth.unwrap_or(0.0),
                stencil.unwrap_or(0),
                &[],
            )
        };
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&D3d12DescriptorHeap]) {
        let raw: Vec<Option<ID3D12DescriptorHeap>> =
            heaps.iter().map(|heap| Some(heap.raw.clone())).collect();
        unsafe { self.raw.SetDescriptorHeaps(&raw) };
    }

    fn set_graphics_root_constant_buffer_view(&mut self, index: u32, address: GpuVirtualAddress) {
        unsafe { self.raw.SetGraphicsRootConstantBufferView(index, address) };
    }

    fn set_graphics_root_descriptor_table(&mut self, index: u32, base: GpuDescriptor) {
        unsafe {
            self.raw
                .SetGraphicsRootDescriptorTable(index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.0 })
        };
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        let raw: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
            .iter()
            .map(|v| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: v.location,
                SizeInBytes: v.size_in_bytes,
                StrideInBytes: v.stride_in_bytes,
            })
            .collect();
        unsafe { self.raw.IASetVertexBuffers(start_slot, Some(&raw)) };
    }

    fn set_index_buffer(&mut self, view: Option<&IndexBufferView>) {
        let raw = view.map(|v| D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: v.location,
            SizeInBytes: v.size_in_bytes,
            Format: conv::index_format(v.format),
        });
        unsafe { self.raw.IASetIndexBuffer(raw.as_ref().map(|v| v as *const _)) };
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        unsafe { self.raw.IASetPrimitiveTopology(conv::topology(topology)) };
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        unsafe {
            self.raw.DrawIndexedInstanced(
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            )
        };
    }
}
