//! Core data structures shared by the light and draw subsystems
//! Contains section keys, light data layers, materials, models and instance handles.

pub mod data_layer;
pub mod instance;
pub mod material;
pub mod model;
pub mod section;

// Re-export commonly used types
pub use data_layer::DataLayer;
pub use instance::{
    ContextShader, Environment, GroupKey, Instance, InstanceHandle, InstanceType, InstancerId,
    InstancerKey, ModelId, VisualType,
};
pub use material::{Cutout, Material, MaterialRenderState, TextureId, Transparency, WriteMask};
pub use model::{Mesh, MeshId, Model, ModelMesh};
pub use section::{BlockPos, SectionPos};
