//! CPU mirror of per-section light data
//!
//! Each requested section owns one arena slot holding an 18x18x18 byte grid:
//! the 16³ section plus a one block border borrowed from its neighbors, so
//! shaders can interpolate across section edges without a second lookup.
//! Every byte is `block | sky << 4`.

use rustc_hash::{FxHashMap, FxHashSet};

use super::engine::{LightEngine, LightLayer};
use super::lut;
use crate::backend::BufferId;
use crate::constants::{LIGHT_SECTION_EDGE, LIGHT_SECTION_SIZE_BYTES, SECTION_SIZE};
use crate::core::SectionPos;
use crate::memory::{Arena, SlotBitmap};
use crate::render::staging::StagingBuffer;

/// Which sampler fills a section's interior during extraction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplePath {
    /// Data layers for the interior, engine queries for the border
    Split,
    /// Engine queries for every sample
    SlowOnly,
}

/// Per-frame counts reported by [`LightStorage::maintain`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintainStats {
    pub removed: usize,
    pub added: usize,
    pub extracted: usize,
}

pub struct LightStorage {
    arena: Arena,
    section_to_slot: FxHashMap<SectionPos, usize>,
    changed: SlotBitmap,
    needs_lut_rebuild: bool,
    requested: Option<FxHashSet<SectionPos>>,
}

impl LightStorage {
    pub fn new(initial_capacity: usize) -> Self {
        LightStorage {
            arena: Arena::new(LIGHT_SECTION_SIZE_BYTES, initial_capacity),
            section_to_slot: FxHashMap::default(),
            changed: SlotBitmap::new(),
            needs_lut_rebuild: false,
            requested: None,
        }
    }

    /// Replace the set of sections that should be resident.
    ///
    /// Takes effect on the next [`LightStorage::maintain`].
    pub fn set_requested_sections(&mut self, sections: FxHashSet<SectionPos>) {
        self.requested = Some(sections);
    }

    pub fn maintain<L: LightEngine + ?Sized>(&mut self, engine: &mut L) -> MaintainStats {
        let mut stats = MaintainStats::default();
        let Some(requested) = self.requested.take() else {
            return stats;
        };

        stats.removed = self.remove_unused_sections(&requested);

        // A section's border samples come from its neighbors, so a light change
        // anywhere in the 3x3x3 neighborhood invalidates it
        let mut to_extract: Vec<SectionPos> = Vec::new();
        for updated in engine.take_updated_sections() {
            to_extract.extend(
                updated
                    .neighborhood()
                    .filter(|n| self.section_to_slot.contains_key(n)),
            );
        }

        for &section in &requested {
            if !self.section_to_slot.contains_key(&section) {
                to_extract.push(section);
                stats.added += 1;
            }
        }

        to_extract.sort_unstable();
        to_extract.dedup();
        for &section in &to_extract {
            self.add_section(&*engine, section);
        }
        stats.extracted = to_extract.len();

        if stats.removed + stats.added > 0 || stats.extracted > 0 {
            tracing::trace!(
                "Light maintenance: -{} +{} sections, {} extracted",
                stats.removed,
                stats.added,
                stats.extracted
            );
        }

        self.requested = Some(requested);
        stats
    }

    fn remove_unused_sections(&mut self, requested: &FxHashSet<SectionPos>) -> usize {
        let before = self.section_to_slot.len();
        let arena = &mut self.arena;
        self.section_to_slot.retain(|section, &mut slot| {
            if requested.contains(section) {
                true
            } else {
                arena.free(slot);
                false
            }
        });

        let removed = before - self.section_to_slot.len();
        if removed > 0 {
            self.needs_lut_rebuild = true;
        }
        removed
    }

    fn add_section<L: LightEngine + ?Sized>(&mut self, engine: &L, section: SectionPos) {
        let slot = self.slot_for_section(section);
        extract_section(engine, section, self.arena.slot_mut(slot), SamplePath::Split);
        self.changed.set(slot);
    }

    /// Slot of `section`, allocating one on first use
    fn slot_for_section(&mut self, section: SectionPos) -> usize {
        if let Some(&slot) = self.section_to_slot.get(&section) {
            return slot;
        }
        let slot = self.arena.alloc();
        self.section_to_slot.insert(section, slot);
        self.needs_lut_rebuild = true;
        slot
    }

    /// Enqueue one copy per changed slot, in ascending slot order
    pub fn upload_changed_sections(&mut self, staging: &mut StagingBuffer, dst: BufferId) {
        for slot in self.changed.iter() {
            staging.enqueue_copy(
                self.arena.slot(slot),
                dst,
                self.arena.index_to_offset(slot) as u64,
            );
        }
        self.changed.clear();
    }

    /// Upload the whole arena if anything changed
    pub fn upload_all(&mut self, staging: &mut StagingBuffer, dst: BufferId) {
        if self.changed.is_empty() {
            return;
        }
        self.upload_arena(staging, dst);
    }

    pub(crate) fn upload_arena(&mut self, staging: &mut StagingBuffer, dst: BufferId) {
        staging.enqueue_copy(self.arena.as_bytes(), dst, 0);
        self.changed.clear();
    }

    pub fn build_lut(&self) -> Vec<u32> {
        lut::build_lut(&self.section_to_slot)
    }

    pub fn check_needs_lut_rebuild_and_clear(&mut self) -> bool {
        std::mem::take(&mut self.needs_lut_rebuild)
    }

    /// Arena capacity in sections
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn capacity_bytes(&self) -> u64 {
        (self.arena.capacity() * LIGHT_SECTION_SIZE_BYTES) as u64
    }

    pub fn slot_of(&self, section: SectionPos) -> Option<usize> {
        self.section_to_slot.get(&section).copied()
    }

    pub fn section_count(&self) -> usize {
        self.section_to_slot.len()
    }

    pub fn changed_count(&self) -> usize {
        self.changed.count()
    }

    pub fn slot_bytes(&self, slot: usize) -> &[u8] {
        self.arena.slot(slot)
    }

    /// Drop every section and release the arena's memory
    pub fn delete(&mut self) {
        self.arena = Arena::new(LIGHT_SECTION_SIZE_BYTES, 1);
        self.section_to_slot.clear();
        self.changed.clear();
        self.requested = None;
        self.needs_lut_rebuild = true;
    }
}

/// Byte offset of local sample `(x, y, z)`, each in `-1..=16`
pub fn sample_offset(x: i32, y: i32, z: i32) -> usize {
    let edge = LIGHT_SECTION_EDGE as i32;
    ((x + 1) + (z + 1) * edge + (y + 1) * edge * edge) as usize
}

/// Fill `out` with the 18³ light samples around `section`
pub fn extract_section<L: LightEngine + ?Sized>(
    engine: &L,
    section: SectionPos,
    out: &mut [u8],
    path: SamplePath,
) {
    debug_assert_eq!(out.len(), LIGHT_SECTION_SIZE_BYTES);

    let origin = section.min_block();
    let block_layer = engine.data_layer(LightLayer::Block, section);
    let sky_layer = engine.data_layer(LightLayer::Sky, section);

    for y in -1..=SECTION_SIZE {
        for z in -1..=SECTION_SIZE {
            for x in -1..=SECTION_SIZE {
                let border = x < 0
                    || y < 0
                    || z < 0
                    || x == SECTION_SIZE
                    || y == SECTION_SIZE
                    || z == SECTION_SIZE;

                let (block, sky) = if border || path == SamplePath::SlowOnly {
                    let pos = origin.offset(x, y, z);
                    (
                        engine.light_value(LightLayer::Block, pos),
                        engine.light_value(LightLayer::Sky, pos),
                    )
                } else {
                    let (lx, ly, lz) = (x as usize, y as usize, z as usize);
                    (
                        block_layer.map_or(0, |l| l.get(lx, ly, lz)),
                        sky_layer.map_or(0, |l| l.get(lx, ly, lz)),
                    )
                };

                out[sample_offset(x, y, z)] = (block & 0xF) | ((sky & 0xF) << 4);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{BufferKind, Command, HeadlessBackend, RenderBackend};
    use crate::core::{BlockPos, DataLayer};

    /// Sections with explicit data layers; everything else is dark
    #[derive(Default)]
    pub(crate) struct TestLightWorld {
        pub block: FxHashMap<SectionPos, DataLayer>,
        pub sky: FxHashMap<SectionPos, DataLayer>,
        pub updated: Vec<SectionPos>,
    }

    impl TestLightWorld {
        pub fn set_block_light(&mut self, pos: BlockPos, level: u8) {
            let (x, y, z) = pos.local();
            self.block
                .entry(SectionPos::from_block(pos))
                .or_default()
                .set(x, y, z, level);
        }

        pub fn set_sky_light(&mut self, pos: BlockPos, level: u8) {
            let (x, y, z) = pos.local();
            self.sky
                .entry(SectionPos::from_block(pos))
                .or_default()
                .set(x, y, z, level);
        }
    }

    impl LightEngine for TestLightWorld {
        fn light_value(&self, layer: LightLayer, pos: BlockPos) -> u8 {
            let (x, y, z) = pos.local();
            self.data_layer(layer, SectionPos::from_block(pos))
                .map_or(0, |l| l.get(x, y, z))
        }

        fn data_layer(&self, layer: LightLayer, section: SectionPos) -> Option<&DataLayer> {
            match layer {
                LightLayer::Block => self.block.get(&section),
                LightLayer::Sky => self.sky.get(&section),
            }
        }

        fn take_updated_sections(&mut self) -> Vec<SectionPos> {
            std::mem::take(&mut self.updated)
        }
    }

    fn requested(sections: &[SectionPos]) -> FxHashSet<SectionPos> {
        sections.iter().copied().collect()
    }

    fn noisy_world() -> TestLightWorld {
        let mut world = TestLightWorld::default();
        let mut seed = 0x2545_f491_u32;
        for _ in 0..600 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let x = (seed % 48) as i32 - 16;
            let y = ((seed >> 8) % 48) as i32 - 16;
            let z = ((seed >> 16) % 48) as i32 - 16;
            world.set_block_light(BlockPos::new(x, y, z), (seed >> 24) as u8 & 0xF);
            world.set_sky_light(BlockPos::new(z, x, y), (seed >> 4) as u8 & 0xF);
        }
        world
    }

    #[test]
    fn test_fast_and_slow_paths_agree() {
        let world = noisy_world();
        for section in SectionPos::new(0, 0, 0).neighborhood() {
            let mut split = vec![0; LIGHT_SECTION_SIZE_BYTES];
            let mut slow = vec![0; LIGHT_SECTION_SIZE_BYTES];
            extract_section(&world, section, &mut split, SamplePath::Split);
            extract_section(&world, section, &mut slow, SamplePath::SlowOnly);
            assert_eq!(split, slow, "paths disagree for {:?}", section);
        }
    }

    #[test]
    fn test_border_samples_come_from_neighbors() {
        let mut world = TestLightWorld::default();
        world.set_block_light(BlockPos::new(16, 0, 0), 9);
        world.set_sky_light(BlockPos::new(-1, 15, 15), 4);

        let mut out = vec![0; LIGHT_SECTION_SIZE_BYTES];
        extract_section(&world, SectionPos::new(0, 0, 0), &mut out, SamplePath::Split);

        assert_eq!(out[sample_offset(16, 0, 0)], 9);
        assert_eq!(out[sample_offset(-1, 15, 15)], 4 << 4);
        assert_eq!(out.iter().filter(|&&b| b != 0).count(), 2);
    }

    #[test]
    fn test_missing_layers_read_as_dark() {
        let world = TestLightWorld::default();
        let mut out = vec![0xAA; LIGHT_SECTION_SIZE_BYTES];
        extract_section(&world, SectionPos::new(3, 3, 3), &mut out, SamplePath::Split);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_never_requested_never_allocated() {
        let mut world = TestLightWorld::default();
        let mut storage = LightStorage::new(4);

        world.updated.push(SectionPos::new(0, 0, 0));
        storage.maintain(&mut world);
        assert_eq!(storage.section_count(), 0);

        storage.set_requested_sections(requested(&[SectionPos::new(1, 0, 0)]));
        world.updated.push(SectionPos::new(0, 0, 0));
        storage.maintain(&mut world);
        assert_eq!(storage.section_count(), 1);
        assert_eq!(storage.slot_of(SectionPos::new(0, 0, 0)), None);
    }

    #[test]
    fn test_dirty_neighbors_are_reextracted() {
        let mut world = TestLightWorld::default();
        let mut storage = LightStorage::new(4);
        let a = SectionPos::new(0, 0, 0);
        let far = SectionPos::new(5, 0, 0);
        storage.set_requested_sections(requested(&[a, far]));
        storage.maintain(&mut world);
        assert!(storage.check_needs_lut_rebuild_and_clear());

        let mut backend = HeadlessBackend::new();
        let mut staging = StagingBuffer::new(&mut backend, 1 << 16).unwrap();
        let dst = backend
            .create_buffer("light", storage.capacity_bytes(), BufferKind::Storage)
            .unwrap();
        storage.upload_changed_sections(&mut staging, dst);
        assert_eq!(storage.changed_count(), 0);

        // Light changes in the neighbor at +x; only `a` is close enough to care
        world.set_block_light(BlockPos::new(16, 3, 3), 12);
        world.updated.push(SectionPos::new(1, 0, 0));
        let stats = storage.maintain(&mut world);

        assert_eq!(stats.extracted, 1);
        assert_eq!(storage.changed_count(), 1);
        assert!(!storage.check_needs_lut_rebuild_and_clear());

        let slot = storage.slot_of(a).unwrap();
        assert_eq!(storage.slot_bytes(slot)[sample_offset(16, 3, 3)], 12);
    }

    #[test]
    fn test_upload_changed_sections() {
        let mut world = noisy_world();
        let mut storage = LightStorage::new(2);
        let sections = [
            SectionPos::new(0, 0, 0),
            SectionPos::new(-1, 0, 0),
            SectionPos::new(0, -1, 1),
        ];
        storage.set_requested_sections(requested(&sections));
        storage.maintain(&mut world);
        assert_eq!(storage.capacity(), 4);

        let mut backend = HeadlessBackend::new();
        let mut staging = StagingBuffer::new(&mut backend, 1 << 16).unwrap();
        let dst = backend
            .create_buffer("light", storage.capacity_bytes(), BufferKind::Storage)
            .unwrap();

        storage.upload_changed_sections(&mut staging, dst);
        assert_eq!(storage.changed_count(), 0);
        assert_eq!(staging.pending_bytes(), 3 * LIGHT_SECTION_SIZE_BYTES as u64);
        staging.flush(&mut backend).unwrap();

        let gpu = backend.buffer_bytes(dst).unwrap();
        for section in sections {
            let slot = storage.slot_of(section).unwrap();
            let start = slot * LIGHT_SECTION_SIZE_BYTES;
            assert_eq!(
                &gpu[start..start + LIGHT_SECTION_SIZE_BYTES],
                storage.slot_bytes(slot)
            );
        }

        // Nothing changed since, so nothing is enqueued
        storage.maintain(&mut world);
        storage.upload_changed_sections(&mut staging, dst);
        storage.upload_all(&mut staging, dst);
        assert_eq!(staging.pending_bytes(), 0);
    }

    #[test]
    fn test_upload_all_copies_whole_arena() {
        let mut world = noisy_world();
        let mut storage = LightStorage::new(4);
        let sections = [SectionPos::new(0, 0, 0), SectionPos::new(0, 1, 0)];
        storage.set_requested_sections(requested(&sections));
        storage.maintain(&mut world);
        assert_eq!(storage.changed_count(), 2);

        let mut backend = HeadlessBackend::new();
        let mut staging = StagingBuffer::new(&mut backend, 1 << 16).unwrap();
        let dst = backend
            .create_buffer("light", storage.capacity_bytes(), BufferKind::Storage)
            .unwrap();
        backend.take_commands();

        storage.upload_all(&mut staging, dst);
        assert_eq!(storage.changed_count(), 0);
        assert_eq!(
            staging.pending_bytes(),
            (storage.capacity() * LIGHT_SECTION_SIZE_BYTES) as u64
        );
        staging.flush(&mut backend).unwrap();

        let copies: Vec<(u64, u64)> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Copy {
                    dst: to,
                    dst_offset,
                    size,
                    ..
                } if *to == dst => Some((*dst_offset, *size)),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![(0, storage.capacity_bytes())]);

        let gpu = backend.buffer_bytes(dst).unwrap();
        for section in sections {
            let slot = storage.slot_of(section).unwrap();
            let start = slot * LIGHT_SECTION_SIZE_BYTES;
            assert_eq!(
                &gpu[start..start + LIGHT_SECTION_SIZE_BYTES],
                storage.slot_bytes(slot)
            );
        }
    }

    #[test]
    fn test_lut_tracks_slots() {
        let mut world = TestLightWorld::default();
        let mut storage = LightStorage::new(8);
        let sections = [SectionPos::new(2, 1, -4), SectionPos::new(-7, 0, 3)];
        storage.set_requested_sections(requested(&sections));
        storage.maintain(&mut world);

        let lut = storage.build_lut();
        for section in sections {
            assert_eq!(lut::lookup(&lut, section), storage.slot_of(section));
        }
    }
}
