//! Tree primitives the update engine and codecs are written against.

/// Child storage of an octree node.
///
/// Children are indexed 0..8 by octant. A node with no existing child is a
/// leaf, which is either at max depth or a pruned region.
pub trait OctreeNode: Sized {
    fn child(&self, index: usize) -> Option<&Self>;

    fn child_mut(&mut self, index: usize) -> Option<&mut Self>;

    #[inline]
    fn child_exists(&self, index: usize) -> bool {
        self.child(index).is_some()
    }

    fn has_children(&self) -> bool;

    /// Creates an empty child at `index`, replacing any existing one.
    fn create_child(&mut self, index: usize) -> &mut Self;

    /// Creates all 8 children as copies of this node's payload. Used to
    /// re-open a pruned leaf.
    fn expand(&mut self);

    /// Drops every child (and their subtrees).
    fn delete_children(&mut self);

    fn children(&self) -> ChildIter<'_, Self> {
        ChildIter { node: self, index: 0 }
    }
}

/// Iterates the existing children of a node, in octant order.
pub struct ChildIter<'a, N> {
    node: &'a N,
    index: usize,
}

impl<'a, N: OctreeNode> Iterator for ChildIter<'a, N> {
    type Item = &'a N;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < 8 {
            let index = self.index;
            self.index += 1;
            if let Some(child) = self.node.child(index) {
                return Some(child);
            }
        }
        None
    }
}
