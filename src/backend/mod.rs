//! GPU backend abstraction
//!
//! Every GPU resource is addressed as a [`BufferId`] plus a byte offset, so
//! buffers can be reallocated without invalidating anything held by callers.
//! [`WgpuBackend`] drives a real device; [`HeadlessBackend`] keeps buffers in
//! host memory and is used by tests and the benchmark binary.

pub mod headless;
pub mod wgpu_backend;

pub use self::headless::{Command, HeadlessBackend};
pub use self::wgpu_backend::{ShaderLibrary, WgpuBackend};

use crate::core::{ContextShader, InstanceType, MaterialRenderState, TextureId};
use crate::error::GpuError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

/// What a buffer is used for; backends derive usage flags from this
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Storage,
    /// Storage buffer that is also read by indirect draws
    Indirect,
    Vertex,
    Index,
    Uniform,
    /// Host-visible transfer source
    Staging,
}

/// A buffer range bound to a fixed shader slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub slot: u32,
    pub buffer: BufferId,
    pub offset: u64,
    /// `None` binds to the end of the buffer
    pub size: Option<u64>,
}

impl BufferBinding {
    pub fn whole(slot: u32, buffer: BufferId) -> Self {
        BufferBinding {
            slot,
            buffer,
            offset: 0,
            size: None,
        }
    }

    pub fn range(slot: u32, buffer: BufferId, offset: u64, size: u64) -> Self {
        BufferBinding {
            slot,
            buffer,
            offset,
            size: Some(size),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComputeProgram {
    /// Frustum culling, specialised per instance type
    Cull(InstanceType),
    /// Writes visible counts into the indirect commands
    Apply,
}

#[derive(Debug)]
pub struct ComputeDispatch<'a> {
    pub label: &'static str,
    pub program: ComputeProgram,
    pub bindings: &'a [BufferBinding],
    pub workgroups: u32,
}

/// Selects a render pipeline from the shader library
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub instance_type: InstanceType,
    pub context: ContextShader,
    pub render_state: MaterialRenderState,
}

#[derive(Debug)]
pub struct IndirectDraw<'a> {
    pub pipeline: PipelineKey,
    pub texture: TextureId,
    pub bindings: &'a [BufferBinding],
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub commands: BufferId,
    /// Byte offset of the first command
    pub offset: u64,
    pub count: u32,
}

/// Everything the draw subsystem needs from a GPU.
///
/// Commands are recorded in call order and execute in that order.
pub trait RenderBackend {
    fn create_buffer(
        &mut self,
        label: &'static str,
        size: u64,
        kind: BufferKind,
    ) -> Result<BufferId, GpuError>;

    /// Reallocate to at least `new_size` bytes, keeping the old contents
    fn grow_buffer(&mut self, buffer: BufferId, new_size: u64) -> Result<(), GpuError>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn buffer_size(&self, buffer: BufferId) -> u64;

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    );

    /// Submit everything recorded so far, returning a fence for it
    fn submit(&mut self) -> FenceId;

    fn is_fence_signaled(&self, fence: FenceId) -> bool;

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>);

    fn draw_indirect(&mut self, draw: &IndirectDraw<'_>);
}

/// Size to grow a buffer to so it can hold `required` bytes
pub fn grown_size(current: u64, required: u64) -> u64 {
    let mut size = current.max(16);
    while size < required {
        size *= 2;
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grown_size_doubles() {
        assert_eq!(grown_size(100, 50), 100);
        assert_eq!(grown_size(100, 150), 200);
        assert_eq!(grown_size(100, 401), 800);
        assert_eq!(grown_size(0, 20), 32);
    }
}
