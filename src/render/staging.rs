//! Batched host → device transfers
//!
//! Copies are queued with [`StagingBuffer::enqueue_copy`] and nothing reaches
//! the GPU until [`StagingBuffer::flush`]. A flush packs every pending source
//! into one contiguous region of a ring-allocated transfer buffer, then issues
//! one copy per contiguous destination span. Regions are handed back by
//! [`StagingBuffer::reclaim`] once the fence of the submission that read them
//! has signaled.

use std::collections::VecDeque;

use crate::backend::{BufferId, BufferKind, FenceId, RenderBackend, grown_size};
use crate::constants::COPY_ALIGNMENT;
use crate::error::GpuError;

#[derive(Debug, Clone, Copy)]
struct PendingCopy {
    dst: BufferId,
    dst_offset: u64,
    src_start: u64,
    len: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    offset: u64,
    len: u64,
    fence: FenceId,
}

/// Where the last flush landed in the transfer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRecord {
    pub buffer: BufferId,
    pub offset: u64,
    pub len: u64,
    pub copies: usize,
}

pub struct StagingBuffer {
    buffer: BufferId,
    capacity: u64,
    head: u64,
    in_flight: VecDeque<InFlight>,
    // Replaced transfer buffers still read by unfinished submissions
    retired: Vec<(BufferId, FenceId)>,
    scratch: Vec<u8>,
    pending: Vec<PendingCopy>,
    last_flush: Option<FlushRecord>,
}

impl StagingBuffer {
    pub fn new(backend: &mut dyn RenderBackend, capacity: u64) -> Result<Self, GpuError> {
        let capacity = capacity.max(COPY_ALIGNMENT);
        let buffer = backend.create_buffer("Staging Buffer", capacity, BufferKind::Staging)?;
        Ok(StagingBuffer {
            buffer,
            capacity,
            head: 0,
            in_flight: VecDeque::new(),
            retired: Vec::new(),
            scratch: Vec::new(),
            pending: Vec::new(),
            last_flush: None,
        })
    }

    /// Queue `src` to be copied to `dst_offset` in `dst` on the next flush.
    ///
    /// The bytes are captured now, so the source may change afterwards.
    pub fn enqueue_copy(&mut self, src: &[u8], dst: BufferId, dst_offset: u64) {
        if src.is_empty() {
            return;
        }
        debug_assert!(
            dst_offset % COPY_ALIGNMENT == 0 && src.len() as u64 % COPY_ALIGNMENT == 0,
            "staging copies must be {COPY_ALIGNMENT}-byte aligned"
        );

        let src_start = self.scratch.len() as u64;
        self.scratch.extend_from_slice(src);
        self.pending.push(PendingCopy {
            dst,
            dst_offset,
            src_start,
            len: src.len() as u64,
        });
    }

    pub fn pending_bytes(&self) -> u64 {
        self.scratch.len() as u64
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Regions written by a flush whose fence has not been reclaimed yet
    pub fn outstanding_regions(&self) -> usize {
        self.in_flight.len()
    }

    pub fn outstanding_bytes(&self) -> u64 {
        self.in_flight.iter().map(|r| r.len).sum()
    }

    pub fn last_flush(&self) -> Option<FlushRecord> {
        self.last_flush
    }

    /// Execute every queued copy.
    pub fn flush(&mut self, backend: &mut dyn RenderBackend) -> Result<(), GpuError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let len = self.scratch.len() as u64;
        let offset = match self.allocate(len) {
            Some(offset) => offset,
            None => {
                self.grow(backend, len)?;
                0
            }
        };

        backend.write_buffer(self.buffer, offset, &self.scratch);

        let spans = coalesce(&self.pending);
        for span in &spans {
            backend.copy_buffer(
                self.buffer,
                offset + span.src_start,
                span.dst,
                span.dst_offset,
                span.len,
            );
        }

        let fence = backend.submit();
        self.in_flight.push_back(InFlight { offset, len, fence });
        self.head = offset + len;

        tracing::trace!(
            "Staging flush: {} bytes in {} copies at offset {}",
            len,
            spans.len(),
            offset
        );
        self.last_flush = Some(FlushRecord {
            buffer: self.buffer,
            offset,
            len,
            copies: spans.len(),
        });

        self.scratch.clear();
        self.pending.clear();
        Ok(())
    }

    /// Recover regions whose transfers the GPU has finished.
    ///
    /// Call once per frame before enqueueing new copies.
    pub fn reclaim(&mut self, backend: &mut dyn RenderBackend) {
        while let Some(front) = self.in_flight.front() {
            if !backend.is_fence_signaled(front.fence) {
                break;
            }
            self.in_flight.pop_front();
        }
        if self.in_flight.is_empty() {
            self.head = 0;
        }

        self.retired.retain(|&(buffer, fence)| {
            if backend.is_fence_signaled(fence) {
                backend.destroy_buffer(buffer);
                false
            } else {
                true
            }
        });
    }

    pub fn delete(&mut self, backend: &mut dyn RenderBackend) {
        backend.destroy_buffer(self.buffer);
        for (buffer, _) in self.retired.drain(..) {
            backend.destroy_buffer(buffer);
        }
        self.in_flight.clear();
        self.scratch.clear();
        self.pending.clear();
    }

    /// Find `len` contiguous free bytes in the ring
    fn allocate(&self, len: u64) -> Option<u64> {
        if len > self.capacity {
            return None;
        }
        let Some(oldest) = self.in_flight.front() else {
            return Some(0);
        };
        let tail = oldest.offset;

        if self.head > tail {
            if self.capacity - self.head >= len {
                Some(self.head)
            } else if tail >= len {
                // Wrap to the front
                Some(0)
            } else {
                None
            }
        } else if self.head < tail {
            (tail - self.head >= len).then_some(self.head)
        } else {
            // Head caught up with the oldest region: the ring is full
            None
        }
    }

    fn grow(&mut self, backend: &mut dyn RenderBackend, required: u64) -> Result<(), GpuError> {
        let new_capacity = grown_size(self.capacity * 2, required);
        tracing::debug!(
            "Growing staging buffer from {} to {} bytes",
            self.capacity,
            new_capacity
        );
        let buffer = backend.create_buffer("Staging Buffer", new_capacity, BufferKind::Staging)?;

        match self.in_flight.back() {
            Some(last) => self.retired.push((self.buffer, last.fence)),
            None => backend.destroy_buffer(self.buffer),
        }

        self.buffer = buffer;
        self.capacity = new_capacity;
        self.in_flight.clear();
        self.head = 0;
        Ok(())
    }
}

/// Merge copies that are contiguous in both the scratch data and the destination
fn coalesce(pending: &[PendingCopy]) -> Vec<PendingCopy> {
    let mut spans: Vec<PendingCopy> = Vec::with_capacity(pending.len());
    for copy in pending {
        if let Some(last) = spans.last_mut() {
            if last.dst == copy.dst
                && last.dst_offset + last.len == copy.dst_offset
                && last.src_start + last.len == copy.src_start
            {
                last.len += copy.len;
                continue;
            }
        }
        spans.push(*copy);
    }
    spans
}
