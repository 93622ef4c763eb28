// Section constants
pub const SECTION_SIZE: i32 = 16;
/// Samples per axis in an extracted light section (one border sample each side)
pub const LIGHT_SECTION_EDGE: usize = SECTION_SIZE as usize + 2;
/// 9x9x9 longs, each holding a 2x2x2 block of packed light bytes
pub const LIGHT_SECTION_SIZE_BYTES: usize = 9 * 9 * 9 * 8;
pub const DEFAULT_LIGHT_ARENA_CAPACITY: usize = 64;
pub const MAX_LIGHT_LEVEL: u8 = 15;

// Staging constants
pub const DEFAULT_STAGING_CAPACITY: u64 = 1 << 20;
pub const COPY_ALIGNMENT: u64 = 4;

// Culling constants
pub const DEFAULT_CULL_WORKGROUP_SIZE: u32 = 32;
pub const DRAW_COMMAND_STRIDE: u64 = 20;

// Crumbling constants
/// Number of breaking-progress texture stages
pub const CRUMBLING_STAGES: i32 = 10;
