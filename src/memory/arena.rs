//! Fixed-stride slot allocator
//!
//! The arena hands out integer slot indices over one contiguous host block.
//! Slots are addressed by byte offset, so an index stays meaningful across
//! growth while slices returned by [`Arena::slot`] only live until the next
//! growing [`Arena::alloc`].

pub struct Arena {
    slot_size: usize,
    capacity: usize,
    /// Number of slots ever handed out (high water mark)
    top: usize,
    free_list: Vec<usize>,
    memory: Vec<u8>,
}

impl Arena {
    pub fn new(slot_size: usize, initial_capacity: usize) -> Self {
        assert!(slot_size > 0, "arena slots must have a size");
        let capacity = initial_capacity.max(1);
        Self {
            slot_size,
            capacity,
            top: 0,
            free_list: Vec::new(),
            memory: vec![0; slot_size * capacity],
        }
    }

    /// Reserve a slot, reusing freed slots before growing
    pub fn alloc(&mut self) -> usize {
        if let Some(index) = self.free_list.pop() {
            return index;
        }

        if self.top == self.capacity {
            self.grow();
        }

        let index = self.top;
        self.top += 1;
        index
    }

    /// Return a slot to the free list.
    ///
    /// The caller tracks ownership; freeing a slot twice is a bug.
    pub fn free(&mut self, index: usize) {
        debug_assert!(index < self.top, "freeing slot {index} that was never allocated");
        debug_assert!(
            !self.free_list.contains(&index),
            "slot {index} freed twice"
        );
        self.free_list.push(index);
    }

    pub fn index_to_offset(&self, index: usize) -> usize {
        index * self.slot_size
    }

    pub fn slot(&self, index: usize) -> &[u8] {
        let start = self.index_to_offset(index);
        &self.memory[start..start + self.slot_size]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        let start = self.index_to_offset(index);
        &mut self.memory[start..start + self.slot_size]
    }

    /// The whole backing block, `capacity * slot_size` bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.memory
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Slots currently owned by a caller
    pub fn live_count(&self) -> usize {
        self.top - self.free_list.len()
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity * 2;
        tracing::debug!(
            "Growing arena from {} to {} slots ({} bytes per slot)",
            self.capacity,
            new_capacity,
            self.slot_size
        );
        // Vec::resize keeps the old contents in place at the front
        self.memory.resize(new_capacity * self.slot_size, 0);
        self.capacity = new_capacity;
    }
}
