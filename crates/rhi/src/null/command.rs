use super::gpu::Command;
use super::{
    Null, NullCommandAllocator, NullDescriptorHeap, NullPipelineState, NullResource,
    NullRootSignature,
};
use crate::error::{RhiError, RhiResult};
use crate::hal::CommandList;
use crate::types::{
    CpuDescriptor, GpuDescriptor, GpuVirtualAddress, IndexBufferView, PrimitiveTopology,
    ScissorRect, TransitionBarrier, VertexBufferView, Viewport,
};

/// A command list that records [`Command`]s for the simulated GPU.
#[derive(Debug)]
pub struct NullCommandList {
    pub(crate) commands: Vec<Command>,
    pub(crate) recording: bool,
}

impl NullCommandList {
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Commands recorded since the last reset.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn push(&mut self, command: Command) {
        debug_assert!(self.recording, "recording into a closed command list");
        self.commands.push(command);
    }
}

impl CommandList for NullCommandList {
    type A = Null;

    fn reset(&mut self, _allocator: &NullCommandAllocator) -> RhiResult<()> {
        if self.recording {
            return Err(RhiError::CommandListState {
                expected: "closed",
                actual: "recording",
            });
        }
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        if !self.recording {
            return Err(RhiError::CommandListState {
                expected: "recording",
                actual: "closed",
            });
        }
        self.recording = false;
        Ok(())
    }

    fn transition_barriers(&mut self, barriers: &[TransitionBarrier<'_, NullResource>]) {
        for barrier in barriers {
            self.push(Command::Barrier {
                resource: barrier.resource.id(),
                before: barrier.before,
                after: barrier.after,
            });
        }
    }

    fn set_graphics_root_signature(&mut self, root_signature: &NullRootSignature) {
        self.push(Command::SetRootSignature(root_signature.id));
    }

    fn set_pipeline_state(&mut self, pipeline: &NullPipelineState) {
        self.push(Command::SetPipelineState(pipeline.id));
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.push(Command::SetViewports(viewports.to_vec()));
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        self.push(Command::SetScissorRects(rects.to_vec()));
    }

    fn set_render_targets(&mut self, render_targets: &[CpuDescriptor], depth_stencil: Option<CpuDescriptor>) {
        self.push(Command::SetRenderTargets {
            render_targets: render_targets.to_vec(),
            depth_stencil,
        });
    }

    fn clear_render_target_view(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        self.push(Command::ClearRenderTarget { rtv, color });
    }

    fn clear_depth_stencil_view(&mut self, dsv: CpuDescriptor, depth: Option<f32>, stencil: Option<u8>) {
        self.push(Command::ClearDepthStencil {
            dsv,
            depth,
            stencil,
        });
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&NullDescriptorHeap]) {
        self.push(Command::SetDescriptorHeaps(
            heaps.iter().map(|heap| heap.ty).collect(),
        ));
    }

    fn set_graphics_root_constant_buffer_view(&mut self, index: u32, address: GpuVirtualAddress) {
        self.push(Command::SetRootConstantBufferView { index, address });
    }

    fn set_graphics_root_descriptor_table(&mut self, index: u32, base: GpuDescriptor) {
        self.push(Command::SetRootDescriptorTable { index, base });
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.push(Command::SetVertexBuffers {
            start_slot,
            views: views.to_vec(),
        });
    }

    fn set_index_buffer(&mut self, view: Option<&IndexBufferView>) {
        self.push(Command::SetIndexBuffer(view.copied()));
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.push(Command::SetPrimitiveTopology(topology));
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.push(Command::DrawIndexedInstanced {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        });
    }
}
