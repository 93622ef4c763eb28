//! Backend for a real `wgpu` device
//!
//! Transfers and compute dispatches are recorded into one pending encoder that
//! is submitted by [`RenderBackend::submit`]. Indirect draws cannot run outside
//! a render pass, so they are recorded and replayed into the caller's pass by
//! [`WgpuBackend::encode_draws`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;

use super::{
    BufferBinding, BufferId, BufferKind, ComputeDispatch, ComputeProgram, FenceId, IndirectDraw,
    PipelineKey, RenderBackend,
};
use crate::constants::COPY_ALIGNMENT;
use crate::core::TextureId;
use crate::error::GpuError;

/// Compiled pipelines and textures the draw subsystem refers to by key
pub trait ShaderLibrary {
    fn compute_pipeline(&self, program: ComputeProgram) -> &wgpu::ComputePipeline;

    fn render_pipeline(&self, key: &PipelineKey) -> &wgpu::RenderPipeline;

    /// Bind group 1 of a render pipeline, `None` for untextured draws
    fn texture_bind_group(&self, texture: TextureId) -> Option<&wgpu::BindGroup>;
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    label: &'static str,
    kind: BufferKind,
}

struct RecordedDraw {
    pipeline: PipelineKey,
    texture: TextureId,
    bindings: Vec<BufferBinding>,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    commands: BufferId,
    offset: u64,
    count: u32,
}

pub struct WgpuBackend<L: ShaderLibrary> {
    device: wgpu::Device,
    queue: wgpu::Queue,
    library: L,
    buffers: FxHashMap<BufferId, GpuBuffer>,
    next_buffer: u32,
    encoder: Option<wgpu::CommandEncoder>,
    fences: FxHashMap<FenceId, Arc<AtomicBool>>,
    next_fence: u64,
    draws: Vec<RecordedDraw>,
}

impl<L: ShaderLibrary> WgpuBackend<L> {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, library: L) -> Self {
        WgpuBackend {
            device,
            queue,
            library,
            buffers: FxHashMap::default(),
            next_buffer: 0,
            encoder: None,
            fences: FxHashMap::default(),
            next_fence: 0,
            draws: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn buffer(&self, buffer: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&buffer).map(|b| &b.buffer)
    }

    /// Let finished submissions signal their fences; call once per frame
    pub fn poll(&mut self) {
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            tracing::warn!("Device poll failed: {}", err);
        }
        self.fences.retain(|_, signaled| !signaled.load(Ordering::Acquire));
    }

    /// Replay the draws recorded since the last call into `pass`.
    ///
    /// Culling dispatches are already submitted by the draw manager's flush,
    /// so they run before the encoder owning `pass`.
    pub fn encode_draws(&mut self, pass: &mut wgpu::RenderPass<'_>) {
        for draw in self.draws.drain(..) {
            let (Some(vertices), Some(indices), Some(commands)) = (
                self.buffers.get(&draw.vertex_buffer),
                self.buffers.get(&draw.index_buffer),
                self.buffers.get(&draw.commands),
            ) else {
                tracing::warn!("Skipping draw with a destroyed buffer");
                continue;
            };
            let pipeline = self.library.render_pipeline(&draw.pipeline);
            let layout = pipeline.get_bind_group_layout(0);
            let Some(bind_group) =
                create_bind_group(&self.device, &self.buffers, "Instance Draw", &layout, &draw.bindings)
            else {
                continue;
            };

            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            if let Some(texture) = self.library.texture_bind_group(draw.texture) {
                pass.set_bind_group(1, texture, &[]);
            }
            pass.set_vertex_buffer(0, vertices.buffer.slice(..));
            pass.set_index_buffer(indices.buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.multi_draw_indexed_indirect(&commands.buffer, draw.offset, draw.count);
        }
    }

    fn allocate(
        &self,
        label: &'static str,
        size: u64,
        kind: BufferKind,
    ) -> Result<wgpu::Buffer, GpuError> {
        let limit = self.device.limits().max_buffer_size;
        let size = size.max(COPY_ALIGNMENT).next_multiple_of(COPY_ALIGNMENT);
        if size > limit {
            tracing::error!("Buffer '{}' of {} bytes exceeds the device limit", label, size);
            return Err(GpuError::OutOfMemory { label, size, limit });
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: usage_of(kind),
            mapped_at_creation: false,
        }))
    }
}

fn usage_of(kind: BufferKind) -> wgpu::BufferUsages {
    let copy = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    match kind {
        BufferKind::Storage => wgpu::BufferUsages::STORAGE | copy,
        BufferKind::Indirect => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT | copy,
        BufferKind::Vertex => wgpu::BufferUsages::VERTEX | copy,
        BufferKind::Index => wgpu::BufferUsages::INDEX | copy,
        BufferKind::Uniform => wgpu::BufferUsages::UNIFORM | copy,
        BufferKind::Staging => copy,
    }
}

fn pending_encoder<'a>(
    device: &wgpu::Device,
    encoder: &'a mut Option<wgpu::CommandEncoder>,
) -> &'a mut wgpu::CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Instancing Encoder"),
        })
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    buffers: &FxHashMap<BufferId, GpuBuffer>,
    label: &'static str,
    layout: &wgpu::BindGroupLayout,
    bindings: &[BufferBinding],
) -> Option<wgpu::BindGroup> {
    let mut entries = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let Some(buffer) = buffers.get(&binding.buffer) else {
            tracing::warn!("'{}' binds destroyed buffer {:?}", label, binding.buffer);
            return None;
        };
        entries.push(wgpu::BindGroupEntry {
            binding: binding.slot,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer.buffer,
                offset: binding.offset,
                size: binding.size.and_then(wgpu::BufferSize::new),
            }),
        });
    }
    Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    }))
}

impl<L: ShaderLibrary> RenderBackend for WgpuBackend<L> {
    fn create_buffer(
        &mut self,
        label: &'static str,
        size: u64,
        kind: BufferKind,
    ) -> Result<BufferId, GpuError> {
        let buffer = self.allocate(label, size, kind)?;
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, GpuBuffer { buffer, label, kind });
        Ok(id)
    }

    fn grow_buffer(&mut self, buffer: BufferId, new_size: u64) -> Result<(), GpuError> {
        let Some(old) = self.buffers.get(&buffer) else {
            return Err(GpuError::UnknownBuffer(buffer.0));
        };
        let current = old.buffer.size();
        if new_size <= current {
            return Ok(());
        }
        let (label, kind) = (old.label, old.kind);
        let replacement = self.allocate(label, new_size, kind)?;
        tracing::debug!("Growing '{}' from {} to {} bytes", label, current, replacement.size());

        // Earlier commands may still target the old buffer, so they go first
        let encoder = pending_encoder(&self.device, &mut self.encoder);
        encoder.copy_buffer_to_buffer(&old.buffer, 0, &replacement, 0, current);
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }

        self.buffers.insert(
            buffer,
            GpuBuffer {
                buffer: replacement,
                label,
                kind,
            },
        );
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        // wgpu keeps the allocation alive until in-flight work is done
        self.buffers.remove(&buffer);
    }

    fn buffer_size(&self, buffer: BufferId) -> u64 {
        self.buffers.get(&buffer).map_or(0, |b| b.buffer.size())
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        match self.buffers.get(&buffer) {
            Some(target) => self.queue.write_buffer(&target.buffer, offset, data),
            None => tracing::warn!("Write to unknown buffer {:?}", buffer),
        }
    }

    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        let (Some(source), Some(target)) = (self.buffers.get(&src), self.buffers.get(&dst)) else {
            tracing::warn!("Copy between unknown buffers {:?} -> {:?}", src, dst);
            return;
        };
        let encoder = pending_encoder(&self.device, &mut self.encoder);
        encoder.copy_buffer_to_buffer(&source.buffer, src_offset, &target.buffer, dst_offset, size);
    }

    fn submit(&mut self) -> FenceId {
        let encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Instancing Encoder"),
                })
        });
        self.queue.submit(std::iter::once(encoder.finish()));

        let fence = FenceId(self.next_fence);
        self.next_fence += 1;
        let signaled = Arc::new(AtomicBool::new(false));
        let callback_flag = Arc::clone(&signaled);
        self.queue.on_submitted_work_done(move || {
            callback_flag.store(true, Ordering::Release);
        });
        self.fences.insert(fence, signaled);
        fence
    }

    fn is_fence_signaled(&self, fence: FenceId) -> bool {
        match self.fences.get(&fence) {
            Some(signaled) => signaled.load(Ordering::Acquire),
            // Pruned by `poll` once signaled
            None => fence.0 < self.next_fence,
        }
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) {
        let pipeline = self.library.compute_pipeline(dispatch.program);
        let layout = pipeline.get_bind_group_layout(0);
        let Some(bind_group) = create_bind_group(
            &self.device,
            &self.buffers,
            dispatch.label,
            &layout,
            dispatch.bindings,
        ) else {
            return;
        };

        let encoder = pending_encoder(&self.device, &mut self.encoder);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dispatch.workgroups, 1, 1);
    }

    fn draw_indirect(&mut self, draw: &IndirectDraw<'_>) {
        self.draws.push(RecordedDraw {
            pipeline: draw.pipeline,
            texture: draw.texture,
            bindings: draw.bindings.to_vec(),
            vertex_buffer: draw.vertex_buffer,
            index_buffer: draw.index_buffer,
            commands: draw.commands,
            offset: draw.offset,
            count: draw.count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_always_allows_copies() {
        for kind in [
            BufferKind::Storage,
            BufferKind::Indirect,
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Uniform,
            BufferKind::Staging,
        ] {
            let usage = usage_of(kind);
            assert!(usage.contains(wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST));
        }
        assert!(usage_of(BufferKind::Indirect).contains(wgpu::BufferUsages::INDIRECT));
    }
}
