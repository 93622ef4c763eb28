//! Dense per-model instance storage
//!
//! Instances live back to back in `stride`-sized records, zero-padded past
//! the instance size to keep GPU copies aligned. Removing one leaves
//! a hole that [`Instancer::compact`] closes on the next flush by sliding later
//! records down and rewriting the moved handles.

use std::sync::Arc;

use crate::backend::BufferId;
use crate::core::{InstanceHandle, InstancerId, InstancerKey, Model};
use crate::memory::SlotBitmap;
use crate::render::staging::StagingBuffer;

pub struct Instancer {
    id: InstancerId,
    key: InstancerKey,
    model: Arc<Model>,
    manager: u64,
    size: usize,
    stride: usize,
    data: Vec<u8>,
    handles: Vec<Option<InstanceHandle>>,
    changed: SlotBitmap,
    holes: usize,
    /// First instance slot in the group buffers, assigned by the culling group
    base_instance: u32,
    /// Every record must be re-uploaded, e.g. after `base_instance` moved
    needs_full_upload: bool,
}

impl Instancer {
    pub fn new(id: InstancerId, key: InstancerKey, model: Arc<Model>, manager: u64) -> Self {
        Instancer {
            id,
            key,
            model,
            manager,
            size: key.instance_type.size as usize,
            stride: key.instance_type.stride as usize,
            data: Vec::new(),
            handles: Vec::new(),
            changed: SlotBitmap::new(),
            holes: 0,
            base_instance: 0,
            needs_full_upload: true,
        }
    }

    pub fn id(&self) -> InstancerId {
        self.id
    }

    pub fn key(&self) -> &InstancerKey {
        &self.key
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Live instances, not counting holes left by removals
    pub fn instance_count(&self) -> usize {
        self.handles.len() - self.holes
    }

    /// Records currently occupied, holes included
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count() == 0
    }

    pub fn create(&mut self, bytes: &[u8]) -> InstanceHandle {
        debug_assert_eq!(bytes.len(), self.size);
        let index = self.handles.len();
        let handle = InstanceHandle::new(self.manager, self.id, index as u32);
        self.data.extend_from_slice(bytes);
        self.data.resize((index + 1) * self.stride, 0);
        self.handles.push(Some(handle.clone()));
        self.changed.set(index);
        handle
    }

    pub fn write(&mut self, index: usize, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.size);
        let start = index * self.stride;
        self.data[start..start + self.size].copy_from_slice(bytes);
        self.changed.set(index);
    }

    pub fn read(&self, index: usize) -> &[u8] {
        let start = index * self.stride;
        &self.data[start..start + self.size]
    }

    fn record(&self, index: usize) -> &[u8] {
        let start = index * self.stride;
        &self.data[start..start + self.stride]
    }

    /// Detach the instance at `index` and invalidate its handle
    pub fn remove(&mut self, index: usize) {
        if let Some(handle) = self.handles[index].take() {
            handle.clear();
            self.holes += 1;
        }
    }

    /// Close every hole, keeping the relative order of survivors.
    ///
    /// Moved handles get their new index; moved records are marked changed.
    pub fn compact(&mut self) {
        if self.holes == 0 {
            return;
        }

        let mut write = 0;
        for read in 0..self.handles.len() {
            let Some(handle) = self.handles[read].take() else {
                continue;
            };
            if read != write {
                let src = read * self.stride;
                self.data
                    .copy_within(src..src + self.stride, write * self.stride);
                handle.set_index(write as u32);
                self.changed.set(write);
            }
            self.handles[write] = Some(handle);
            write += 1;
        }

        self.handles.truncate(write);
        self.data.truncate(write * self.stride);
        self.holes = 0;
    }

    pub fn base_instance(&self) -> u32 {
        self.base_instance
    }

    pub(crate) fn set_base_instance(&mut self, base: u32) {
        if base != self.base_instance {
            self.base_instance = base;
            self.needs_full_upload = true;
        }
    }

    pub(crate) fn mark_full_upload(&mut self) {
        self.needs_full_upload = true;
    }

    /// Stage changed records into `instances` and their model index into `model_index`.
    ///
    /// Must run after [`Instancer::compact`].
    pub(crate) fn upload(
        &mut self,
        staging: &mut StagingBuffer,
        instances: BufferId,
        model_index: BufferId,
        model: u32,
    ) {
        debug_assert_eq!(self.holes, 0);
        let base = self.base_instance as u64;
        let stride = self.stride as u64;

        if self.needs_full_upload {
            staging.enqueue_copy(&self.data, instances, base * stride);
            let indices = vec![model; self.handles.len()];
            staging.enqueue_copy(bytemuck::cast_slice(&indices), model_index, base * 4);
            self.needs_full_upload = false;
        } else {
            for index in self.changed.iter().filter(|&i| i < self.handles.len()) {
                staging.enqueue_copy(
                    self.record(index),
                    instances,
                    (base + index as u64) * stride,
                );
                staging.enqueue_copy(
                    bytemuck::bytes_of(&model),
                    model_index,
                    (base + index as u64) * 4,
                );
            }
        }
        self.changed.clear();
    }

    pub fn handle(&self, index: usize) -> Option<&InstanceHandle> {
        self.handles.get(index).and_then(Option::as_ref)
    }

    /// Invalidate every handle, used when the owning manager is deleted
    pub(crate) fn clear(&mut self) {
        for handle in self.handles.drain(..).flatten() {
            handle.clear();
        }
        self.data.clear();
        self.changed.clear();
        self.holes = 0;
    }
}
