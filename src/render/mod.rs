//! Instanced rendering
//! Contains the staging buffer, instancers, culling groups, the draw manager and crumbling.

pub mod bindings;
pub mod commands;
pub mod crumbling;
pub mod culling_group;
pub mod draw_manager;
pub mod frustum;
pub mod instancer;
pub mod mesh_pool;
pub mod staging;
pub mod visual;

// Re-export commonly used types
pub use commands::{DrawIndexedIndirect, DrawInfoGpu, ModelGpu};
pub use crumbling::CrumblingBlock;
pub use culling_group::{CullingGroup, DrawEntry};
pub use draw_manager::{DrawManager, FlushStats};
pub use frustum::{CullUniforms, Frustum, extract_frustum_planes};
pub use instancer::Instancer;
pub use mesh_pool::{MeshPool, MeshRange};
pub use staging::{FlushRecord, StagingBuffer};
pub use visual::{Visual, VisualId, VisualRegistry};
