use crate::constants::SECTION_SIZE;

/// A 16x16x16 region of the world, packed into a 64-bit key.
///
/// Layout: x in the top 22 bits, z in the next 22, y in the low 20.
/// The packed value is used verbatim as a map key everywhere.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionPos(pub i64);

impl SectionPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        let packed = ((x as i64 & 0x3F_FFFF) << 42)
            | (y as i64 & 0xF_FFFF)
            | ((z as i64 & 0x3F_FFFF) << 20);
        SectionPos(packed)
    }

    pub fn from_block(pos: BlockPos) -> Self {
        Self::new(pos.x >> 4, pos.y >> 4, pos.z >> 4)
    }

    pub fn x(self) -> i32 {
        (self.0 >> 42) as i32
    }

    pub fn y(self) -> i32 {
        ((self.0 << 44) >> 44) as i32
    }

    pub fn z(self) -> i32 {
        ((self.0 << 22) >> 42) as i32
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x() + dx, self.y() + dy, self.z() + dz)
    }

    /// Lowest block corner of the section
    pub fn min_block(self) -> BlockPos {
        BlockPos::new(
            self.x() * SECTION_SIZE,
            self.y() * SECTION_SIZE,
            self.z() * SECTION_SIZE,
        )
    }

    /// The 27 sections of the 3x3x3 neighborhood, self included
    pub fn neighborhood(self) -> impl Iterator<Item = SectionPos> {
        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| (-1..=1).map(move |dz| self.offset(dx, dy, dz)))
        })
    }

    pub fn as_long(self) -> i64 {
        self.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        BlockPos { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        BlockPos::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Coordinates inside the owning section, each in 0..16
    pub fn local(self) -> (usize, usize, usize) {
        (
            (self.x & (SECTION_SIZE - 1)) as usize,
            (self.y & (SECTION_SIZE - 1)) as usize,
            (self.z & (SECTION_SIZE - 1)) as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_keeps_signs() {
        for (x, y, z) in [(0, 0, 0), (-1, -4, 7), (2_097_151, 524_287, -2_097_152), (-30, 19, -1)] {
            let pos = SectionPos::new(x, y, z);
            assert_eq!((pos.x(), pos.y(), pos.z()), (x, y, z));
        }
    }

    #[test]
    fn test_block_to_section() {
        let pos = BlockPos::new(-1, 17, 32);
        let section = SectionPos::from_block(pos);
        assert_eq!((section.x(), section.y(), section.z()), (-1, 1, 2));
        assert_eq!(pos.local(), (15, 1, 0));
        assert_eq!(section.min_block(), BlockPos::new(-16, 16, 32));
    }

    #[test]
    fn test_neighborhood_has_27_unique_sections() {
        let center = SectionPos::new(3, -2, 5);
        let all: std::collections::HashSet<_> = center.neighborhood().collect();
        assert_eq!(all.len(), 27);
        assert!(all.contains(&center));
        assert!(all.contains(&center.offset(-1, 1, -1)));
    }
}
