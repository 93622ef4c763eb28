// GPU backend seam with the wgpu and headless implementations
pub mod backend;

// Core module with fundamental types
pub mod core;

// Error types
pub mod error;

// Light storage, lookup table and GPU light buffers
pub mod light;

// Fixed-size slot allocation
pub mod memory;

// Instancers, culling groups, staging and the draw manager
pub mod render;

// Worker pool for parallel maintenance
pub mod task;

// Settings persistence
pub mod utils;

// Other modules
pub mod constants;

// Re-exports
pub use backend::{BufferId, HeadlessBackend, RenderBackend, ShaderLibrary, WgpuBackend};
pub use constants::*;
pub use core::{
    Environment, Instance, InstanceHandle, InstanceType, Material, Mesh, Model, ModelMesh,
    SectionPos, VisualType,
};
pub use error::{GpuError, RenderError, Result};
pub use light::{LightEngine, LightLayer, LightStorage};
pub use memory::Arena;
pub use render::{CrumblingBlock, DrawManager, Frustum, StagingBuffer, Visual, VisualRegistry};
pub use task::TaskExecutor;
pub use utils::{RenderSettings, load_or_default, save_settings};
