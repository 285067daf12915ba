//! GPU buffer management.
//!
//! This module handles vertex, index and constant buffers living in upload
//! memory. Each buffer is mapped once at creation and stays mapped until it
//! is dropped.
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used
//! - [`Buffer`] wraps a committed upload resource and its mapped pointer
//! - [`MeshBuffers`] pairs a vertex and an index buffer with their views
//!
//! # Example
//!
//! ```
//! use forge_rhi::buffer::{Buffer, BufferUsage};
//! use forge_rhi::hal::{Adapter, Instance};
//! use forge_rhi::null::{Null, NullInstance};
//! use forge_rhi::types::{FeatureLevel, InstanceDesc};
//!
//! # fn main() -> forge_rhi::RhiResult<()> {
//! # let instance = NullInstance::init(&InstanceDesc::default())?;
//! # let device = instance.enumerate_adapters(None)?[2].open(FeatureLevel::Level12_0, false)?;
//! let positions: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let buffer = Buffer::<Null>::new_with_data(
//!     &device,
//!     "triangle",
//!     BufferUsage::Vertex,
//!     bytemuck::cast_slice(&positions),
//! )?;
//! assert_eq!(buffer.size(), 24);
//! # Ok(())
//! # }
//! ```

use std::ptr::NonNull;

use bytemuck::Pod;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::hal::{Api, Device, Resource};
use crate::types::{
    BufferDesc, GpuVirtualAddress, IndexBufferView, IndexFormat, MemoryKind, PrimitiveTopology,
    ResourceState, VertexBufferView,
};
use crate::vertex::Vertex;

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Constant buffer - read by shaders through a root CBV
    Constant,
}

impl BufferUsage {
    /// Upload-heap resources are created in, and never leave, `GenericRead`.
    pub fn initial_state(self) -> ResourceState {
        ResourceState::GenericRead
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Constant => "constant",
        }
    }
}

/// Persistently mapped upload buffer.
///
/// # Thread Safety
///
/// The mapped pointer is never reallocated, so the buffer can be moved
/// between threads. Writes through `&mut self` are exclusive; writes a GPU
/// frame may still be reading are the caller's responsibility, which is what
/// the per-frame fence guards are for.
pub struct Buffer<A: Api> {
    resource: A::Resource,
    mapped: NonNull<u8>,
    size: u64,
    usage: BufferUsage,
    label: String,
}

// SAFETY: `mapped` points into memory owned by `resource`, which is itself
// Send + Sync; mutation requires `&mut self`.
unsafe impl<A: Api> Send for Buffer<A> {}
unsafe impl<A: Api> Sync for Buffer<A> {}

impl<A: Api> Buffer<A> {
    /// Creates a zeroed buffer of `size` bytes and maps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be created or mapped.
    pub fn new(device: &A::Device, label: &str, usage: BufferUsage, size: u64) -> RhiResult<Self> {
        let resource = device.create_buffer(&BufferDesc {
            label,
            size,
            memory: MemoryKind::Upload,
            initial_state: usage.initial_state(),
        })?;
        // SAFETY: the resource is in upload memory and is kept alive by `self`.
        let mapped = unsafe { resource.map()? };

        debug!(
            "Created {} buffer '{}' ({} bytes)",
            usage.name(),
            label,
            size
        );

        Ok(Self {
            resource,
            mapped,
            size,
            usage,
            label: label.to_string(),
        })
    }

    /// Creates a buffer holding `data`.
    pub fn new_with_data(
        device: &A::Device,
        label: &str,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let mut buffer = Self::new(device, label, usage, data.len() as u64)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` to `offset`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] if the range exceeds the buffer.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> RhiResult<()> {
        let end = offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidArgument(format!(
                "write of {} bytes at {} exceeds buffer '{}' ({} bytes)",
                data.len(),
                offset,
                self.label,
                self.size
            )));
        }
        // SAFETY: bounds checked above; the mapping is valid for `size` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.mapped.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Copies a plain-old-data value to `offset`.
    pub fn write_pod<T: Pod>(&mut self, offset: u64, value: &T) -> RhiResult<()> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn resource(&self) -> &A::Resource {
        &self.resource
    }

    #[inline]
    pub fn gpu_address(&self) -> GpuVirtualAddress {
        self.resource.gpu_virtual_address()
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Base of the CPU mapping.
    #[inline]
    pub fn mapped_ptr(&self) -> NonNull<u8> {
        self.mapped
    }
}

impl<A: Api> Drop for Buffer<A> {
    fn drop(&mut self) {
        // SAFETY: the mapped pointer is not used past this point.
        unsafe { self.resource.unmap() };
        debug!("Destroyed {} buffer '{}'", self.usage.name(), self.label);
    }
}

/// Vertex and index buffers of one mesh, with the views used to bind them.
pub struct MeshBuffers<A: Api> {
    vertex_buffer: Buffer<A>,
    index_buffer: Buffer<A>,
    vertex_view: VertexBufferView,
    index_view: IndexBufferView,
    index_count: u32,
    topology: PrimitiveTopology,
}

impl<A: Api> MeshBuffers<A> {
    /// Uploads a triangle-list mesh.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] for an empty mesh, or a buffer creation
    /// error.
    pub fn new(
        device: &A::Device,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> RhiResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RhiError::InvalidArgument(format!(
                "mesh '{label}' has no geometry"
            )));
        }

        let vertex_buffer = Buffer::new_with_data(
            device,
            &format!("{label} vertices"),
            BufferUsage::Vertex,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = Buffer::new_with_data(
            device,
            &format!("{label} indices"),
            BufferUsage::Index,
            bytemuck::cast_slice(indices),
        )?;

        let vertex_view = VertexBufferView {
            location: vertex_buffer.gpu_address(),
            size_in_bytes: vertex_buffer.size() as u32,
            stride_in_bytes: Vertex::stride(),
        };
        let index_view = IndexBufferView {
            location: index_buffer.gpu_address(),
            size_in_bytes: index_buffer.size() as u32,
            format: IndexFormat::U32,
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_view,
            index_view,
            index_count: indices.len() as u32,
            topology: PrimitiveTopology::TriangleList,
        })
    }

    #[inline]
    pub fn vertex_view(&self) -> VertexBufferView {
        self.vertex_view
    }

    #[inline]
    pub fn index_view(&self) -> IndexBufferView {
        self.index_view
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn vertex_buffer(&self) -> &Buffer<A> {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &Buffer<A> {
        &self.index_buffer
    }
}
