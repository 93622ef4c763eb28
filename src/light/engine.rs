//! Interface to the world's light engine

use crate::core::{BlockPos, DataLayer, SectionPos};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LightLayer {
    Block,
    Sky,
}

/// Read access to world lighting, provided by the host.
pub trait LightEngine {
    /// Light level (0..=15) at an arbitrary block
    fn light_value(&self, layer: LightLayer, pos: BlockPos) -> u8;

    /// Raw data layer of a section, `None` when the section stores no light
    fn data_layer(&self, layer: LightLayer, section: SectionPos) -> Option<&DataLayer>;

    /// Sections whose light changed since the previous call
    fn take_updated_sections(&mut self) -> Vec<SectionPos>;
}
