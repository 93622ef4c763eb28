//! GPU side of the light storage

use super::storage::LightStorage;
use crate::backend::{BufferBinding, BufferId, BufferKind, RenderBackend, grown_size};
use crate::error::GpuError;
use crate::render::bindings;
use crate::render::staging::StagingBuffer;

pub struct LightBuffers {
    lut: BufferId,
    sections: BufferId,
    partial_upload: bool,
}

impl LightBuffers {
    pub fn new(
        backend: &mut dyn RenderBackend,
        storage: &LightStorage,
        partial_upload: bool,
    ) -> Result<Self, GpuError> {
        let lut = backend.create_buffer("Light LUT", 16, BufferKind::Storage)?;
        let sections =
            backend.create_buffer("Light Sections", storage.capacity_bytes(), BufferKind::Storage)?;
        Ok(LightBuffers {
            lut,
            sections,
            partial_upload,
        })
    }

    /// Queue this frame's light changes on `staging`
    pub fn flush(
        &mut self,
        backend: &mut dyn RenderBackend,
        staging: &mut StagingBuffer,
        storage: &mut LightStorage,
    ) -> Result<(), GpuError> {
        let required = storage.capacity_bytes();
        if backend.buffer_size(self.sections) < required {
            tracing::debug!("Growing light section buffer to {} bytes", required);
            backend.grow_buffer(self.sections, required)?;
            storage.upload_arena(staging, self.sections);
        } else if self.partial_upload {
            storage.upload_changed_sections(staging, self.sections);
        } else {
            storage.upload_all(staging, self.sections);
        }

        if storage.check_needs_lut_rebuild_and_clear() {
            let lut = storage.build_lut();
            let bytes: &[u8] = bytemuck::cast_slice(&lut);
            let size = backend.buffer_size(self.lut);
            if size < bytes.len() as u64 {
                backend.grow_buffer(self.lut, grown_size(size, bytes.len() as u64))?;
            }
            staging.enqueue_copy(bytes, self.lut, 0);
        }
        Ok(())
    }

    pub fn bindings(&self) -> [BufferBinding; 2] {
        [
            BufferBinding::whole(bindings::LIGHT_LUT, self.lut),
            BufferBinding::whole(bindings::LIGHT_SECTION, self.sections),
        ]
    }

    pub fn lut_buffer(&self) -> BufferId {
        self.lut
    }

    pub fn section_buffer(&self) -> BufferId {
        self.sections
    }

    pub fn delete(&mut self, backend: &mut dyn RenderBackend) {
        backend.destroy_buffer(self.lut);
        backend.destroy_buffer(self.sections);
    }
}
