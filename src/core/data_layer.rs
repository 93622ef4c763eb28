use crate::constants::MAX_LIGHT_LEVEL;

const LAYER_BYTES: usize = 2048;

/// Nibble array of light levels for one section, indexed `y << 8 | z << 4 | x`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayer {
    data: Box<[u8; LAYER_BYTES]>,
}

impl DataLayer {
    pub fn new() -> Self {
        DataLayer {
            data: Box::new([0; LAYER_BYTES]),
        }
    }

    /// A layer with every sample set to `level`
    pub fn filled(level: u8) -> Self {
        let level = level.min(MAX_LIGHT_LEVEL);
        DataLayer {
            data: Box::new([level | (level << 4); LAYER_BYTES]),
        }
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> u8 {
        let index = Self::index(x, y, z);
        (self.data[index >> 1] >> ((index & 1) * 4)) & 0xF
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, level: u8) {
        let index = Self::index(x, y, z);
        let shift = (index & 1) * 4;
        let byte = &mut self.data[index >> 1];
        *byte = (*byte & !(0xF << shift)) | ((level & 0xF) << shift);
    }

    fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < 16 && y < 16 && z < 16);
        (y << 8) | (z << 4) | x
    }
}

impl Default for DataLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nibbles_do_not_bleed() {
        let mut layer = DataLayer::new();
        layer.set(0, 0, 0, 15);
        layer.set(1, 0, 0, 3);
        layer.set(15, 15, 15, 9);

        assert_eq!(layer.get(0, 0, 0), 15);
        assert_eq!(layer.get(1, 0, 0), 3);
        assert_eq!(layer.get(2, 0, 0), 0);
        assert_eq!(layer.get(15, 15, 15), 9);

        layer.set(0, 0, 0, 1);
        assert_eq!(layer.get(0, 0, 0), 1);
        assert_eq!(layer.get(1, 0, 0), 3);
    }

    #[test]
    fn test_filled() {
        let layer = DataLayer::filled(7);
        assert_eq!(layer.get(4, 9, 12), 7);
    }
}
