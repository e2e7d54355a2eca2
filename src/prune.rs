//! Collapsing uniform subtrees into single leaves.

use crate::{
    node::RoughNode,
    octree::OctreeNode,
    tree::RoughOcTree,
};

/// A node can be collapsed when all 8 children exist, none of them has
/// children and they all carry the same occupancy.
///
/// Occupancy must match exactly: children of the same free/occupied class
/// with different log-odds do not collapse. Roughness, stairs and agent are
/// not compared.
pub fn is_node_collapsible(node: &RoughNode) -> bool {
    let Some(first) = node.child(0) else {
        return false;
    };
    if first.has_children() {
        return false;
    }

    (1..8).all(|index| match node.child(index) {
        Some(child) => !child.has_children() && child.log_odds() == first.log_odds(),
        None => false,
    })
}

/// Replaces a collapsible node's children with the node itself.
///
/// Takes over child 0's payload; a set roughness is replaced by the mean
/// over all children. Returns `false` and leaves the node untouched if it
/// is not collapsible.
pub fn prune_node(node: &mut RoughNode) -> bool {
    if !is_node_collapsible(node) {
        return false;
    }

    let first = match node.child(0) {
        Some(first) => first.clone(),
        None => return false,
    };
    node.copy_data(&first);

    if node.is_rough_set() {
        let rough = node.average_child_rough();
        node.set_rough(rough);
    }

    node.delete_children();
    true
}

impl RoughOcTree {
    /// Collapses every collapsible subtree, bottom-up. Returns the number of
    /// nodes that were collapsed.
    pub fn prune(&mut self) -> usize {
        fn prune_recurs(node: &mut RoughNode, depth: u8, max_depth: u8, pruned: &mut usize) {
            if depth < max_depth {
                for index in 0..8 {
                    if let Some(child) = node.child_mut(index) {
                        prune_recurs(child, depth + 1, max_depth, pruned);
                    }
                }
            }
            if prune_node(node) {
                *pruned += 1;
            }
        }

        let tree_depth = self.config.tree_depth;
        let mut pruned = 0;
        if let Some(root) = self.root.as_deref_mut() {
            prune_recurs(root, 0, tree_depth, &mut pruned);
        }

        self.tree_size -= pruned * 8;
        if pruned > 0 {
            log::trace!("pruned {pruned} nodes, {} remain", self.tree_size);
        }
        pruned
    }
}

#[cfg(test)]
fn leaf_family(log_odds: [f32; 8]) -> RoughNode {
    let mut node = RoughNode::default();
    for (index, value) in log_odds.into_iter().enumerate() {
        node.create_child(index).set_log_odds(value);
    }
    node
}

#[test]
fn uniform_leaves_collapse() {
    let mut node = leaf_family([1.5; 8]);
    node.child_mut(0).unwrap().set_agent(4);
    node.child_mut(6).unwrap().set_stair_log_odds(2.0);

    assert!(is_node_collapsible(&node));
    assert!(prune_node(&mut node));
    assert!(!node.has_children());
    assert_eq!(node.log_odds(), 1.5);
    assert_eq!(node.agent(), 4);
    // stairs come from child 0 only
    assert_eq!(node.stair_log_odds(), 0.0);
    assert!(!node.is_rough_set());

    // a leaf has nothing left to collapse
    assert!(!prune_node(&mut node));
}

#[test]
fn differing_occupancy_never_collapses() {
    let mut values = [1.5; 8];
    values[7] = -0.4;
    let mut node = leaf_family(values);
    assert!(!is_node_collapsible(&node));
    assert!(!prune_node(&mut node));
    assert_eq!(node.children().count(), 8);
}

#[test]
fn same_class_is_not_enough_to_collapse() {
    let mut values = [2.0; 8];
    values[3] = 0.5;
    let mut node = leaf_family(values);
    assert!(!is_node_collapsible(&node));
    assert!(!prune_node(&mut node));
    assert_eq!(node.child(3).unwrap().log_odds(), 0.5);
}

#[test]
fn missing_child_or_grandchild_blocks_collapse() {
    let mut node = leaf_family([0.0; 8]);
    node.child_mut(3).unwrap().create_child(1);
    assert!(!is_node_collapsible(&node));

    let mut node = RoughNode::default();
    for index in 0..7 {
        node.create_child(index);
    }
    assert!(!is_node_collapsible(&node));

    // grandchild under child 0 is checked too
    let mut node = leaf_family([0.0; 8]);
    node.child_mut(0).unwrap().create_child(0);
    assert!(!is_node_collapsible(&node));
}

#[test]
fn collapse_averages_roughness() {
    let mut node = leaf_family([3.5; 8]);
    for (index, rough) in [0.1, 0.3, 0.5, 0.7].into_iter().enumerate() {
        node.child_mut(index).unwrap().set_rough(rough);
    }

    assert!(prune_node(&mut node));
    assert!((node.rough() - 0.4).abs() < 1e-6);
    assert_eq!(node.log_odds(), 3.5);
}

#[test]
fn tree_prune_updates_size() {
    use crate::{ config::TreeConfig, key::OcTreeKey };

    let mut tree = RoughOcTree::with_config(TreeConfig::default().with_tree_depth(2)).unwrap();
    let mut root = RoughNode::default();
    let child = root.create_child(1);
    for index in 0..8 {
        child.create_child(index).set_log_odds(0.5);
    }
    root.create_child(4).set_log_odds(-1.0);
    tree.root = Some(Box::new(root));
    tree.tree_size = tree.calc_num_nodes();
    assert_eq!(tree.size(), 11);

    assert_eq!(tree.prune(), 1);
    assert_eq!(tree.size(), 3);
    assert_eq!(tree.calc_num_nodes(), 3);
    assert_eq!(tree.search(OcTreeKey::from_path([1, 6], 2).unwrap()).unwrap().log_odds(), 0.5);

    assert_eq!(tree.prune(), 0);
}
