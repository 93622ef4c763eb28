//! Materials and the render state derived from them

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Transparency {
    #[default]
    Opaque,
    Additive,
    Lightning,
    Glint,
    Crumbling,
    Translucent,
    OrderIndependent,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum WriteMask {
    #[default]
    ColorDepth,
    Color,
    Depth,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Cutout {
    #[default]
    Off,
    Epsilon,
    Half,
}

/// Texture reference resolved by the shader library
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureId {
    Atlas(u32),
    /// Breaking overlay for a crumbling progress stage
    Breaking(u8),
}

impl Default for TextureId {
    fn default() -> Self {
        TextureId::Atlas(0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Material {
    pub transparency: Transparency,
    pub write_mask: WriteMask,
    pub cutout: Cutout,
    pub polygon_offset: bool,
    pub depth_test: bool,
    pub backface_culling: bool,
    pub diffuse: bool,
    pub texture: TextureId,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            transparency: Transparency::Opaque,
            write_mask: WriteMask::ColorDepth,
            cutout: Cutout::Off,
            polygon_offset: false,
            depth_test: true,
            backface_culling: true,
            diffuse: true,
            texture: TextureId::default(),
        }
    }
}

impl Material {
    /// The overlay variant used to draw a breaking block on top of this material
    pub fn crumbling(&self, progress: u8) -> Material {
        Material {
            transparency: Transparency::Crumbling,
            write_mask: WriteMask::Color,
            polygon_offset: true,
            cutout: Cutout::Off,
            texture: TextureId::Breaking(progress),
            ..*self
        }
    }

    /// Shader-visible flags, written into the draw metadata
    pub fn packed(&self) -> u32 {
        let mut bits = self.transparency as u32;
        bits |= (self.write_mask as u32) << 3;
        bits |= (self.cutout as u32) << 5;
        bits |= (self.polygon_offset as u32) << 7;
        bits |= (self.depth_test as u32) << 8;
        bits |= (self.backface_culling as u32) << 9;
        bits |= (self.diffuse as u32) << 10;
        bits
    }

    /// The part of the material that selects a pipeline
    pub fn render_state(&self) -> MaterialRenderState {
        MaterialRenderState {
            transparency: self.transparency,
            write_mask: self.write_mask,
            polygon_offset: self.polygon_offset,
            depth_test: self.depth_test,
            backface_culling: self.backface_culling,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialRenderState {
    pub transparency: Transparency,
    pub write_mask: WriteMask,
    pub polygon_offset: bool,
    pub depth_test: bool,
    pub backface_culling: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crumbling_override() {
        let base = Material {
            transparency: Transparency::Translucent,
            cutout: Cutout::Half,
            backface_culling: false,
            ..Default::default()
        };
        let crumbling = base.crumbling(3);

        assert_eq!(crumbling.transparency, Transparency::Crumbling);
        assert_eq!(crumbling.write_mask, WriteMask::Color);
        assert_eq!(crumbling.cutout, Cutout::Off);
        assert!(crumbling.polygon_offset);
        assert_eq!(crumbling.texture, TextureId::Breaking(3));
        // Untouched fields carry over
        assert!(!crumbling.backface_culling);
    }

    #[test]
    fn test_packed_distinguishes_state() {
        let a = Material::default();
        let b = Material {
            polygon_offset: true,
            ..a
        };
        assert_ne!(a.packed(), b.packed());
        assert_eq!(a.packed() & 0x7, Transparency::Opaque as u32);
    }
}
