use glam::{ UVec3, uvec3 };
use bitvec::prelude::*;
use std::hash::Hash;

/// Address of a max-depth voxel.
///
/// Each axis carries one bit per tree level: bit `level` of x, y and z
/// together select the child octant at that level, with level
/// `tree_depth - 1` directly below the root. The core never does arithmetic
/// on keys beyond that, they are compared and hashed as opaque values.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OcTreeKey(pub(crate) UVec3);

impl Eq for OcTreeKey {}

impl Hash for OcTreeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.0.x);
        state.write_u32(self.0.y);
        state.write_u32(self.0.z);
    }
}

impl From<UVec3> for OcTreeKey {
    fn from(position: UVec3) -> Self {
        Self(position)
    }
}

impl OcTreeKey {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self(uvec3(x, y, z))
    }

    pub fn position(&self) -> UVec3 {
        self.0
    }

    /// Child octant selected by this key at `level`.
    ///
    /// ```text
    /// bit 0: x, bit 1: y, bit 2: z
    /// ```
    pub fn child_index(&self, level: u8) -> usize {
        let level = level as usize;
        let x = self.0.x.view_bits::<Lsb0>()[level] as usize;
        let y = self.0.y.view_bits::<Lsb0>()[level] as usize;
        let z = self.0.z.view_bits::<Lsb0>()[level] as usize;

        x | (y << 1) | (z << 2)
    }

    /// Builds the key reached by following `path` (child indices from the
    /// root) in a tree of `tree_depth` levels. Levels past the end of the
    /// path are left at octant 0.
    ///
    /// `None` if the path is longer than the tree is deep, or names an
    /// octant outside `0..8`.
    pub fn from_path<I: IntoIterator<Item = u8>>(path: I, tree_depth: u8) -> Option<Self> {
        if tree_depth > 32 {
            return None;
        }

        let mut key = Self::default();
        for (depth, index) in path.into_iter().enumerate() {
            if depth >= tree_depth as usize || index >= 8 {
                return None;
            }
            key.set_child_index(tree_depth - 1 - depth as u8, index);
        }

        Some(key)
    }

    fn set_child_index(&mut self, level: u8, index: u8) {
        let level = level as usize;
        let bits = index.view_bits::<Lsb0>();

        self.0.x.view_bits_mut::<Lsb0>().set(level, bits[0]);
        self.0.y.view_bits_mut::<Lsb0>().set(level, bits[1]);
        self.0.z.view_bits_mut::<Lsb0>().set(level, bits[2]);
    }
}

#[test]
fn child_index_per_level() {
    let key = OcTreeKey::new(0b101, 0b011, 0b110);
    assert_eq!(key.child_index(0), 0b011);
    assert_eq!(key.child_index(1), 0b110);
    assert_eq!(key.child_index(2), 0b101);
    assert_eq!(key.child_index(3), 0);
}

#[test]
fn from_path_round_trips() {
    let path = [7, 0, 3, 5, 1];
    let key = OcTreeKey::from_path(path, 5).unwrap();
    for (depth, index) in path.iter().enumerate() {
        assert_eq!(key.child_index(4 - depth as u8), *index as usize);
    }

    // shorter path leaves the remaining levels at octant 0
    let key = OcTreeKey::from_path([6], 16).unwrap();
    assert_eq!(key.child_index(15), 6);
    assert_eq!(key, OcTreeKey::new(0, 1 << 15, 1 << 15));
}

#[test]
fn from_path_rejects_bad_paths() {
    assert!(OcTreeKey::from_path([1, 2, 3], 2).is_none());
    assert!(OcTreeKey::from_path([8], 4).is_none());
    assert!(OcTreeKey::from_path([0], 33).is_none());
    assert_eq!(OcTreeKey::from_path([0u8; 0], 2), Some(OcTreeKey::default()));
    assert!(OcTreeKey::from_path([7; 32], 32).is_some());
}

#[test]
fn keys_hash_by_position() {
    use ahash::AHashSet;

    let mut set = AHashSet::new();
    set.insert(OcTreeKey::new(1, 2, 3));
    set.insert(OcTreeKey::from(uvec3(1, 2, 3)));
    set.insert(OcTreeKey::new(3, 2, 1));
    assert_eq!(set.len(), 2);
}
