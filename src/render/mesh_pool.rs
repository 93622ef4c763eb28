//! Unified vertex/index buffers shared by every culling group
//!
//! Meshes are packed into one vertex buffer and one index buffer so a whole
//! group can be drawn with a single multi-draw. Ranges of released meshes go
//! to per-buffer free lists and are reused best-fit.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::backend::{BufferId, BufferKind, RenderBackend, grown_size};
use crate::core::{Mesh, MeshId};
use crate::error::{GpuError, RenderError, Result};
use crate::render::staging::StagingBuffer;

/// Where a mesh landed in the pool, in the units a draw command wants
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshRange {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}

#[derive(Debug)]
struct MeshAlloc {
    mesh: Arc<Mesh>,
    vertex_offset: u32,
    vertex_count: u32,
    index_offset: u32,
    index_count: u32,
    ref_count: u32,
    uploaded: bool,
}

/// A free block in the vertex or index buffer for memory reclamation
#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    offset: u32,
    count: u32,
}

/// Free blocks are kept sorted by offset and never touch each other
#[derive(Debug, Default)]
struct BlockList {
    next_offset: u32,
    free: Vec<FreeBlock>,
}

impl BlockList {
    fn alloc(&mut self, count: u32) -> u32 {
        match find_free_block(&self.free, count) {
            Some(idx) => {
                let block = &mut self.free[idx];
                let offset = block.offset;
                // If block is larger, keep the remainder in place
                if block.count > count {
                    block.offset += count;
                    block.count -= count;
                } else {
                    self.free.remove(idx);
                }
                offset
            }
            None => {
                let offset = self.next_offset;
                self.next_offset += count;
                offset
            }
        }
    }

    /// Return a range, merging it with free neighbors
    fn release(&mut self, offset: u32, count: u32) {
        if count == 0 {
            return;
        }
        let idx = self.free.partition_point(|block| block.offset < offset);
        self.free.insert(idx, FreeBlock { offset, count });

        if let Some(next) = self.free.get(idx + 1).copied() {
            if offset + count == next.offset {
                self.free[idx].count += next.count;
                self.free.remove(idx + 1);
            }
        }
        let mut idx = idx;
        if idx > 0 {
            let prev = self.free[idx - 1];
            if prev.offset + prev.count == self.free[idx].offset {
                self.free[idx - 1].count += self.free[idx].count;
                self.free.remove(idx);
                idx -= 1;
            }
        }

        // A free tail gives its space back to the end of the buffer
        let tail = self.free[idx];
        if tail.offset + tail.count == self.next_offset {
            self.next_offset = tail.offset;
            self.free.remove(idx);
        }
    }
}

/// Find a free block that can fit the requested count (best-fit strategy)
fn find_free_block(blocks: &[FreeBlock], count: u32) -> Option<usize> {
    blocks
        .iter()
        .enumerate()
        .filter(|(_, block)| block.count >= count)
        .min_by_key(|(_, block)| block.count - count)
        .map(|(idx, _)| idx)
}

pub struct MeshPool {
    vertex_stride: u32,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    vertices: BlockList,
    indices: BlockList,
    meshes: FxHashMap<MeshId, MeshAlloc>,
}

impl MeshPool {
    pub fn new(
        backend: &mut dyn RenderBackend,
        vertex_stride: u32,
    ) -> std::result::Result<Self, GpuError> {
        debug_assert!(vertex_stride % 4 == 0, "vertex stride must be 4-byte aligned");
        let vertex_buffer =
            backend.create_buffer("Unified Vertex Buffer", 1024, BufferKind::Vertex)?;
        let index_buffer =
            backend.create_buffer("Unified Index Buffer", 1024, BufferKind::Index)?;
        Ok(MeshPool {
            vertex_stride,
            vertex_buffer,
            index_buffer,
            vertices: BlockList::default(),
            indices: BlockList::default(),
            meshes: FxHashMap::default(),
        })
    }

    /// Reference `mesh`, reserving space for it on first use.
    ///
    /// The data reaches the GPU on the next [`MeshPool::flush`].
    pub fn acquire(&mut self, mesh: &Arc<Mesh>) -> Result<()> {
        if let Some(alloc) = self.meshes.get_mut(&mesh.id) {
            alloc.ref_count += 1;
            return Ok(());
        }
        if mesh.vertex_stride != self.vertex_stride {
            return Err(RenderError::VertexLayout {
                expected: self.vertex_stride,
                actual: mesh.vertex_stride,
            });
        }

        let vertex_count = mesh.vertex_count();
        let index_count = mesh.indices.len() as u32;
        let alloc = MeshAlloc {
            mesh: Arc::clone(mesh),
            vertex_offset: self.vertices.alloc(vertex_count),
            vertex_count,
            index_offset: self.indices.alloc(index_count),
            index_count,
            ref_count: 1,
            uploaded: false,
        };
        self.meshes.insert(mesh.id, alloc);
        Ok(())
    }

    /// Drop one reference; the last one frees the mesh's ranges
    pub fn release(&mut self, mesh: MeshId) {
        let Some(alloc) = self.meshes.get_mut(&mesh) else {
            return;
        };
        alloc.ref_count -= 1;
        if alloc.ref_count > 0 {
            return;
        }
        if let Some(alloc) = self.meshes.remove(&mesh) {
            self.vertices.release(alloc.vertex_offset, alloc.vertex_count);
            self.indices.release(alloc.index_offset, alloc.index_count);
        }
    }

    pub fn range(&self, mesh: MeshId) -> Option<MeshRange> {
        self.meshes.get(&mesh).map(|alloc| MeshRange {
            index_count: alloc.index_count,
            first_index: alloc.index_offset,
            base_vertex: alloc.vertex_offset as i32,
        })
    }

    /// Grow the buffers to fit every reservation and stage new meshes
    pub fn flush(
        &mut self,
        backend: &mut dyn RenderBackend,
        staging: &mut StagingBuffer,
    ) -> std::result::Result<(), GpuError> {
        let vertex_bytes = self.vertices.next_offset as u64 * self.vertex_stride as u64;
        let index_bytes = self.indices.next_offset as u64 * 4;
        ensure_size(backend, self.vertex_buffer, vertex_bytes)?;
        ensure_size(backend, self.index_buffer, index_bytes)?;

        let mut uploaded = 0;
        for alloc in self.meshes.values_mut().filter(|a| !a.uploaded) {
            staging.enqueue_copy(
                &alloc.mesh.vertices,
                self.vertex_buffer,
                alloc.vertex_offset as u64 * self.vertex_stride as u64,
            );
            staging.enqueue_copy(
                bytemuck::cast_slice(&alloc.mesh.indices),
                self.index_buffer,
                alloc.index_offset as u64 * 4,
            );
            alloc.uploaded = true;
            uploaded += 1;
        }
        if uploaded > 0 {
            tracing::debug!("Uploading {} meshes to the mesh pool", uploaded);
        }
        Ok(())
    }

    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn delete(&mut self, backend: &mut dyn RenderBackend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
        self.meshes.clear();
        self.vertices = BlockList::default();
        self.indices = BlockList::default();
    }
}

/// Grow `buffer` geometrically until it holds `required` bytes
pub(crate) fn ensure_size(
    backend: &mut dyn RenderBackend,
    buffer: BufferId,
    required: u64,
) -> std::result::Result<(), GpuError> {
    let current = backend.buffer_size(buffer);
    if current < required {
        backend.grow_buffer(buffer, grown_size(current, required))?;
    }
    Ok(())
}
