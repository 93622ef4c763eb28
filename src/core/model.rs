use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::core::instance::ModelId;
use crate::core::material::Material;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

/// Indexed geometry, already in the shared vertex format
#[derive(Debug, Clone)]
pub struct Mesh {
    pub id: MeshId,
    pub vertex_stride: u32,
    pub vertices: Vec<u8>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> u32 {
        (self.vertices.len() / self.vertex_stride as usize) as u32
    }
}

#[derive(Debug, Clone)]
pub struct ModelMesh {
    pub mesh: Arc<Mesh>,
    pub material: Material,
    /// Draw ordering bias inside a render stage
    pub bias: i32,
}

#[derive(Debug, Clone)]
pub struct Model {
    id: ModelId,
    meshes: Vec<ModelMesh>,
    /// xyz center, w radius
    bounding_sphere: Vec4,
}

impl Model {
    pub fn new(id: ModelId, meshes: Vec<ModelMesh>, center: Vec3, radius: f32) -> Self {
        Model {
            id,
            meshes,
            bounding_sphere: center.extend(radius),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn meshes(&self) -> &[ModelMesh] {
        &self.meshes
    }

    pub fn bounding_sphere(&self) -> Vec4 {
        self.bounding_sphere
    }
}
