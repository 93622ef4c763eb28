//! Host-side memory layout helpers

pub mod arena;
pub mod bitmap;

pub use arena::Arena;
pub use bitmap::SlotBitmap;
