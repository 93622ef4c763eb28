//! Section → slot lookup table consumed by shaders
//!
//! The table is a tree of dense layers, y then x then z. Each layer is
//! `[base, size, entries...]` where `base` is the smallest coordinate present.
//! Entries of the y and x layers are word offsets of the child layer; entries
//! of the z layer are `slot + 1`. Zero always means "not present", which is
//! unambiguous because the root layer sits at offset 0.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::core::SectionPos;

pub fn build_lut(sections: &FxHashMap<SectionPos, usize>) -> Vec<u32> {
    let mut tree: BTreeMap<i32, BTreeMap<i32, BTreeMap<i32, usize>>> = BTreeMap::new();
    for (&section, &slot) in sections {
        tree.entry(section.y())
            .or_default()
            .entry(section.x())
            .or_default()
            .insert(section.z(), slot);
    }

    let mut out = Vec::new();
    let y_layer = reserve_layer(&mut out, tree.keys().copied());
    for (y, by_x) in &tree {
        let x_layer = reserve_layer(&mut out, by_x.keys().copied());
        patch(&mut out, y_layer, *y, x_layer as u32);

        for (x, by_z) in by_x {
            let z_layer = reserve_layer(&mut out, by_z.keys().copied());
            patch(&mut out, x_layer, *x, z_layer as u32);

            for (z, slot) in by_z {
                patch(&mut out, z_layer, *z, *slot as u32 + 1);
            }
        }
    }
    out
}

/// Resolve a section through a table produced by [`build_lut`]
pub fn lookup(lut: &[u32], section: SectionPos) -> Option<usize> {
    let x_layer = read_layer(lut, 0, section.y())?;
    let z_layer = read_layer(lut, x_layer as usize, section.x())?;
    let slot = read_layer(lut, z_layer as usize, section.z())?;
    Some(slot as usize - 1)
}

fn reserve_layer(out: &mut Vec<u32>, coords: impl Iterator<Item = i32> + Clone) -> usize {
    let at = out.len();
    let (base, size) = match (coords.clone().min(), coords.max()) {
        (Some(min), Some(max)) => (min, (max - min + 1) as u32),
        _ => (0, 0),
    };
    out.push(base as u32);
    out.push(size);
    out.resize(out.len() + size as usize, 0);
    at
}

fn patch(out: &mut [u32], layer: usize, coord: i32, value: u32) {
    let base = out[layer] as i32;
    out[layer + 2 + (coord - base) as usize] = value;
}

fn read_layer(lut: &[u32], layer: usize, coord: i32) -> Option<u32> {
    let base = *lut.get(layer)? as i32;
    let size = *lut.get(layer + 1)? as i64;
    let index = coord as i64 - base as i64;
    if index < 0 || index >= size {
        return None;
    }
    let value = *lut.get(layer + 2 + index as usize)?;
    (value != 0).then_some(value)
}
