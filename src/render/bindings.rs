//! Storage buffer slots shared with the shaders

pub const INSTANCE: u32 = 0;
pub const TARGET: u32 = 1;
pub const MODEL_INDEX: u32 = 2;
pub const MODEL: u32 = 3;
pub const DRAW: u32 = 4;
pub const LIGHT_LUT: u32 = 5;
pub const LIGHT_SECTION: u32 = 6;
/// Per-frame frustum and cull parameters
pub const UNIFORMS: u32 = 7;
/// Per-draw model, material and bias, read by the apply pass
pub const DRAW_INFO: u32 = 8;
