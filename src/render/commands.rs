//! GPU-side records shared with the cull and apply shaders

use bytemuck::{Pod, Zeroable};

use crate::constants::DRAW_COMMAND_STRIDE;

/// wgpu DrawIndexedIndirect command structure (matches GPU layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    /// Written by the apply pass from the model's visible count
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// Written by the apply pass; indexes the cull target list
    pub first_instance: u32,
}

const _: () = assert!(std::mem::size_of::<DrawIndexedIndirect>() as u64 == DRAW_COMMAND_STRIDE);

/// One entry per instancer in a culling group
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelGpu {
    /// Model-space bounding sphere, xyz center + w radius
    pub bounding_sphere: [f32; 4],
    /// Visible instances, reset to 0 every frame and counted up by culling
    pub instance_count: u32,
    /// First slot of this model's range in the instance and target buffers
    pub base_instance: u32,
    pub _padding: [u32; 2],
}

/// Per-draw data read by the apply pass and the vertex shader
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawInfoGpu {
    pub model_index: u32,
    pub packed_material: u32,
    pub bias: i32,
    pub _padding: u32,
}
