//! Bottom-up recomputation of inner node payloads.

use crate::{
    node::RoughNode,
    octree::OctreeNode,
    tree::RoughOcTree,
};

/// Recomputes an inner node from its (final) children: max occupancy,
/// mean roughness over children that have one, and stairs as the mean of
/// child probabilities.
pub fn refresh_inner(node: &mut RoughNode) {
    node.set_log_odds(node.max_child_log_odds());
    node.set_rough(node.average_child_rough());
    node.set_stair_log_odds(node.mean_child_stair_log_odds());
}

impl RoughOcTree {
    /// Refreshes every inner node, children before parents. Call after a
    /// batch of direct leaf edits.
    pub fn update_inner_occupancy(&mut self) {
        fn update_recurs(node: &mut RoughNode, depth: u8, max_depth: u8) {
            if !node.has_children() {
                return;
            }
            if depth < max_depth {
                for index in 0..8 {
                    if let Some(child) = node.child_mut(index) {
                        update_recurs(child, depth + 1, max_depth);
                    }
                }
            }
            refresh_inner(node);
        }

        let tree_depth = self.config.tree_depth;
        if let Some(root) = self.root.as_deref_mut() {
            update_recurs(root, 0, tree_depth);
        }
    }
}

#[test]
fn refresh_inner_from_children() {
    use crate::utils::logodds;

    let mut node = RoughNode::default();
    let a = node.create_child(0);
    a.set_log_odds(-1.0);
    a.set_rough(0.2);
    a.set_stair_log_odds(logodds(0.2));
    let b = node.create_child(7);
    b.set_log_odds(2.0);
    b.set_stair_log_odds(logodds(0.6));

    refresh_inner(&mut node);
    assert_eq!(node.log_odds(), 2.0);
    assert!((node.rough() - 0.2).abs() < 1e-6);
    assert!((node.stair_log_odds() - logodds(0.4)).abs() < 1e-5);
}

#[test]
fn inner_nodes_follow_leaves_after_batch_edit() {
    use crate::{ config::TreeConfig, key::OcTreeKey };

    let mut tree = RoughOcTree::with_config(TreeConfig::default().with_tree_depth(3)).unwrap();
    let first = OcTreeKey::from_path([0, 1, 2], 3).unwrap();
    let second = OcTreeKey::from_path([0, 1, 5], 3).unwrap();
    let third = OcTreeKey::from_path([6, 6, 6], 3).unwrap();
    for key in [first, second, third] {
        tree.update_occupancy(key, true, 1);
    }

    tree.set_node_rough(first, 0.25);
    tree.set_node_rough(second, 0.75);
    tree.search_mut(third).unwrap().set_log_odds(3.0);

    tree.update_inner_occupancy();

    let root = tree.root().unwrap();
    assert_eq!(root.log_odds(), 3.0);
    assert!((root.rough() - 0.5).abs() < 1e-6);

    let branch = root.child(0).unwrap().child(1).unwrap();
    assert!((branch.rough() - 0.5).abs() < 1e-6);
    assert_eq!(branch.log_odds(), tree.config().prob_hit_log());

    // a subtree without any roughness stays unset
    assert!(!root.child(6).unwrap().is_rough_set());
}
