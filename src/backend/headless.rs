//! In-memory backend
//!
//! Buffers are plain byte vectors and transfers execute immediately in call
//! order. Dispatches and draws are only logged. Fences stay pending until
//! [`HeadlessBackend::signal_all_fences`] is called, which lets tests observe
//! work that the "GPU" has not finished yet.

use rustc_hash::FxHashMap;

use super::{
    BufferBinding, BufferId, BufferKind, ComputeDispatch, ComputeProgram, FenceId, IndirectDraw,
    PipelineKey, RenderBackend,
};
use crate::core::TextureId;
use crate::error::GpuError;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Write {
        buffer: BufferId,
        offset: u64,
        len: u64,
    },
    Copy {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    Submit(FenceId),
    Dispatch {
        label: &'static str,
        program: ComputeProgram,
        bindings: Vec<BufferBinding>,
        workgroups: u32,
    },
    Draw {
        pipeline: PipelineKey,
        texture: TextureId,
        commands: BufferId,
        offset: u64,
        count: u32,
    },
}

struct HeadlessBuffer {
    label: &'static str,
    kind: BufferKind,
    data: Vec<u8>,
}

pub struct HeadlessBackend {
    buffers: FxHashMap<BufferId, HeadlessBuffer>,
    next_buffer: u32,
    fences: Vec<bool>,
    commands: Vec<Command>,
    memory_limit: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_memory_limit(u64::MAX)
    }

    /// A backend that fails allocations once `limit` bytes are live
    pub fn with_memory_limit(limit: u64) -> Self {
        HeadlessBackend {
            buffers: FxHashMap::default(),
            next_buffer: 0,
            fences: Vec::new(),
            commands: Vec::new(),
            memory_limit: limit,
        }
    }

    pub fn buffer_bytes(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_label(&self, buffer: BufferId) -> Option<&'static str> {
        self.buffers.get(&buffer).map(|b| b.label)
    }

    pub fn buffer_kind(&self, buffer: BufferId) -> Option<BufferKind> {
        self.buffers.get(&buffer).map(|b| b.kind)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.buffers.values().map(|b| b.data.len() as u64).sum()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Pretend the GPU caught up with every submission
    pub fn signal_all_fences(&mut self) {
        self.fences.iter_mut().for_each(|f| *f = true);
    }

    /// Signal every fence up to and including `fence`
    pub fn signal_fences_through(&mut self, fence: FenceId) {
        let end = (fence.0 as usize + 1).min(self.fences.len());
        self.fences[..end].iter_mut().for_each(|f| *f = true);
    }

    fn check_limit(&self, label: &'static str, extra: u64) -> Result<(), GpuError> {
        let live = self.allocated_bytes();
        if live.saturating_add(extra) > self.memory_limit {
            tracing::error!("Headless allocation of '{}' ({} bytes) exceeds limit", label, extra);
            return Err(GpuError::OutOfMemory {
                label,
                size: extra,
                limit: self.memory_limit,
            });
        }
        Ok(())
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_buffer(
        &mut self,
        label: &'static str,
        size: u64,
        kind: BufferKind,
    ) -> Result<BufferId, GpuError> {
        self.check_limit(label, size)?;
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            HeadlessBuffer {
                label,
                kind,
                data: vec![0; size as usize],
            },
        );
        Ok(id)
    }

    fn grow_buffer(&mut self, buffer: BufferId, new_size: u64) -> Result<(), GpuError> {
        let (label, current) = match self.buffers.get(&buffer) {
            Some(b) => (b.label, b.data.len() as u64),
            None => return Err(GpuError::UnknownBuffer(buffer.0)),
        };
        if new_size <= current {
            return Ok(());
        }
        self.check_limit(label, new_size - current)?;
        if let Some(b) = self.buffers.get_mut(&buffer) {
            b.data.resize(new_size as usize, 0);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn buffer_size(&self, buffer: BufferId) -> u64 {
        self.buffers
            .get(&buffer)
            .map_or(0, |b| b.data.len() as u64)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer) else {
            tracing::warn!("Write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        target.data[start..start + data.len()].copy_from_slice(data);
        self.commands.push(Command::Write {
            buffer,
            offset,
            len: data.len() as u64,
        });
    }

    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        let Some(source) = self.buffers.get(&src) else {
            tracing::warn!("Copy from unknown buffer {:?}", src);
            return;
        };
        let start = src_offset as usize;
        let bytes = source.data[start..start + size as usize].to_vec();

        let Some(target) = self.buffers.get_mut(&dst) else {
            tracing::warn!("Copy to unknown buffer {:?}", dst);
            return;
        };
        let start = dst_offset as usize;
        target.data[start..start + bytes.len()].copy_from_slice(&bytes);

        self.commands.push(Command::Copy {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    fn submit(&mut self) -> FenceId {
        let fence = FenceId(self.fences.len() as u64);
        self.fences.push(false);
        self.commands.push(Command::Submit(fence));
        fence
    }

    fn is_fence_signaled(&self, fence: FenceId) -> bool {
        self.fences.get(fence.0 as usize).copied().unwrap_or(false)
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) {
        self.commands.push(Command::Dispatch {
            label: dispatch.label,
            program: dispatch.program,
            bindings: dispatch.bindings.to_vec(),
            workgroups: dispatch.workgroups,
        });
    }

    fn draw_indirect(&mut self, draw: &IndirectDraw<'_>) {
        self.commands.push(Command::Draw {
            pipeline: draw.pipeline,
            texture: draw.texture,
            commands: draw.commands,
            offset: draw.offset,
            count: draw.count,
        });
    }
}
