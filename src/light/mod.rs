//! Light data for instanced rendering
//! The world's light around every requested section is mirrored into an arena
//! of fixed-size slots and streamed to the GPU together with a lookup table.

pub mod buffers;
pub mod engine;
pub mod lut;
pub mod storage;

pub use buffers::LightBuffers;
pub use engine::{LightEngine, LightLayer};
pub use storage::{LightStorage, MaintainStats, SamplePath};
