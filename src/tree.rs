use ahash::AHashMap;
use crate::{
    config::TreeConfig,
    error::{ Error, Result },
    key::OcTreeKey,
    node::RoughNode,
    octree::OctreeNode,
};

/// Sparse occupancy octree whose nodes also carry roughness and stairs
/// estimates.
#[derive(Debug)]
pub struct RoughOcTree {
    pub(crate) root: Option<Box<RoughNode>>,
    pub(crate) config: TreeConfig,
    pub(crate) tree_size: usize,
    /// `true` marks a key whose node was created since the last reset,
    /// `false` a key whose classification flipped
    pub(crate) changed_keys: AHashMap<OcTreeKey, bool>,
}

impl RoughOcTree {
    pub const TREE_TYPE: &'static str = "RoughOcTree";

    pub fn new(resolution: f64) -> Self {
        Self::from_valid_config(TreeConfig::default().with_resolution(resolution))
    }

    pub fn with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: TreeConfig) -> Self {
        Self {
            root: None,
            config,
            tree_size: 0,
            changed_keys: AHashMap::new(),
        }
    }

    pub fn tree_type(&self) -> &'static str {
        Self::TREE_TYPE
    }

    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Replaces the configuration. Existing node values are left as they are.
    ///
    /// The tree depth can only change while the tree is empty.
    pub fn set_config(&mut self, config: TreeConfig) -> Result<()> {
        config.validate()?;
        if self.root.is_some() && config.tree_depth != self.config.tree_depth {
            log::warn!("refusing to change tree depth of a non-empty tree");
            return Err(Error::TreeDepthChange {
                current: self.config.tree_depth,
                requested: config.tree_depth,
            });
        }
        self.config = config;
        Ok(())
    }

    #[inline]
    pub fn tree_depth(&self) -> u8 {
        self.config.tree_depth
    }

    #[inline]
    pub fn root(&self) -> Option<&RoughNode> {
        self.root.as_deref()
    }

    /// Number of nodes, kept up to date by every structural change.
    #[inline]
    pub fn size(&self) -> usize {
        self.tree_size
    }

    /// Counts the nodes by walking the whole tree.
    pub fn calc_num_nodes(&self) -> usize {
        fn count(node: &RoughNode) -> usize {
            1 + node.children().map(count).sum::<usize>()
        }

        self.root().map_or(0, count)
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.tree_size = 0;
        self.changed_keys.clear();
    }

    /// Node covering `key`.
    ///
    /// Returns the max-depth node if it exists, or the pruned leaf that
    /// stands in for it. `None` when the path runs into a missing child of
    /// an inner node.
    pub fn search(&self, key: OcTreeKey) -> Option<&RoughNode> {
        let tree_depth = self.config.tree_depth;
        let mut node = self.root.as_deref()?;

        for depth in 0..tree_depth {
            let pos = key.child_index(tree_depth - 1 - depth);
            match node.child(pos) {
                Some(child) => node = child,
                None if node.has_children() => return None,
                None => return Some(node),
            }
        }

        Some(node)
    }

    pub fn search_mut(&mut self, key: OcTreeKey) -> Option<&mut RoughNode> {
        let tree_depth = self.config.tree_depth;
        search_node_mut(self.root.as_deref_mut()?, key, tree_depth)
    }

    #[inline]
    pub fn is_node_occupied(&self, node: &RoughNode) -> bool {
        node.log_odds() >= self.config.occupancy_thres_log()
    }

    #[inline]
    pub fn is_node_stairs(&self, node: &RoughNode) -> bool {
        node.stair_log_odds() > self.config.stairs_thres_log()
    }

    /// Every leaf with the key of its region's first voxel and its depth.
    pub fn leaves(&self) -> Vec<(OcTreeKey, u8, &RoughNode)> {
        let mut leaves = Vec::new();
        let Some(root) = self.root() else {
            return leaves;
        };

        let tree_depth = self.config.tree_depth;
        let mut stack = vec![(root, Vec::<u8>::new())];
        while let Some((node, path)) = stack.pop() {
            // nothing below max depth counts, even if present
            if !node.has_children() || path.len() >= tree_depth as usize {
                let depth = path.len() as u8;
                if let Some(key) = OcTreeKey::from_path(path, tree_depth) {
                    leaves.push((key, depth, node));
                }
                continue;
            }

            for index in (0..8).rev() {
                if let Some(child) = node.child(index) {
                    let mut child_path = path.clone();
                    child_path.push(index as u8);
                    stack.push((child, child_path));
                }
            }
        }

        leaves
    }

    pub fn enable_change_detection(&mut self, enabled: bool) {
        self.config.change_detection = enabled;
    }

    #[inline]
    pub fn is_change_detection_enabled(&self) -> bool {
        self.config.change_detection
    }

    pub fn reset_change_detection(&mut self) {
        self.changed_keys.clear();
    }

    /// Keys touched since the last reset. The flag is `true` for keys whose
    /// node was newly created.
    pub fn changed_keys(&self) -> impl Iterator<Item = (&OcTreeKey, &bool)> + '_ {
        self.changed_keys.iter()
    }

    #[inline]
    pub fn num_changes_detected(&self) -> usize {
        self.changed_keys.len()
    }
}

/// [`RoughOcTree::search_mut`] below an arbitrary node.
pub(crate) fn search_node_mut(mut node: &mut RoughNode, key: OcTreeKey, tree_depth: u8) -> Option<&mut RoughNode> {
    for depth in 0..tree_depth {
        let pos = key.child_index(tree_depth - 1 - depth);
        if node.child_exists(pos) {
            node = node.child_mut(pos)?;
        } else if node.has_children() {
            return None;
        } else {
            return Some(node);
        }
    }

    Some(node)
}

#[test]
fn empty_tree() {
    let tree = RoughOcTree::new(0.05);
    assert!(tree.root().is_none());
    assert_eq!(tree.size(), 0);
    assert_eq!(tree.calc_num_nodes(), 0);
    assert!(tree.search(OcTreeKey::new(1, 2, 3)).is_none());
    assert!(tree.leaves().is_empty());
    assert_eq!(tree.tree_type(), "RoughOcTree");
    assert_eq!(tree.config().resolution, 0.05);
}

#[test]
fn search_stops_at_pruned_leaf() {
    let mut tree = RoughOcTree::with_config(TreeConfig::default().with_tree_depth(3)).unwrap();
    let mut root = RoughNode::default();
    root.create_child(5).set_log_odds(1.0);
    root.create_child(2).create_child(7).set_log_odds(-1.0);
    tree.root = Some(Box::new(root));
    tree.tree_size = 4;

    // octant 5 is a leaf at depth 1, it covers every key below it
    let covered = OcTreeKey::from_path([5, 3, 1], 3).unwrap();
    assert_eq!(tree.search(covered).unwrap().log_odds(), 1.0);

    // octant 2 is inner, its missing children are absent
    assert!(tree.search(OcTreeKey::from_path([2, 0, 0], 3).unwrap()).is_none());
    assert_eq!(tree.search(OcTreeKey::from_path([2, 7, 4], 3).unwrap()).unwrap().log_odds(), -1.0);

    // an inner root with no child at octant 0
    assert!(tree.search(OcTreeKey::from_path([0, 0, 0], 3).unwrap()).is_none());

    tree.search_mut(covered).unwrap().set_rough(0.5);
    assert_eq!(tree.search(OcTreeKey::from_path([5, 0, 0], 3).unwrap()).unwrap().rough(), 0.5);

    assert_eq!(tree.calc_num_nodes(), 4);
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].0, OcTreeKey::from_path([2, 7], 3).unwrap());
    assert_eq!(leaves[0].1, 2);
    assert_eq!(leaves[1].0, OcTreeKey::from_path([5], 3).unwrap());
    assert_eq!(leaves[1].1, 1);

    tree.clear();
    assert!(tree.root().is_none());
    assert_eq!(tree.size(), 0);
}

#[test]
fn classification_thresholds() {
    let tree = RoughOcTree::new(0.1);
    let mut node = RoughNode::default();
    // exactly at the occupancy threshold counts as occupied
    assert!(tree.is_node_occupied(&node));
    node.set_log_odds(-0.1);
    assert!(!tree.is_node_occupied(&node));

    // stairs need to be strictly above their threshold
    assert!(!tree.is_node_stairs(&node));
    node.set_stair_log_odds(0.5);
    assert!(tree.is_node_stairs(&node));
}

#[test]
fn depth_change_refused_on_non_empty_tree() {
    let mut tree = RoughOcTree::with_config(TreeConfig::default().with_tree_depth(4)).unwrap();
    tree.set_config(TreeConfig::default().with_tree_depth(3)).unwrap();
    assert_eq!(tree.tree_depth(), 3);

    let key = OcTreeKey::from_path([1, 2, 3], 3).unwrap();
    tree.update_occupancy(key, true, 0);

    let result = tree.set_config(TreeConfig::default().with_tree_depth(2));
    assert!(matches!(result, Err(Error::TreeDepthChange { current: 3, requested: 2 })));
    assert_eq!(tree.tree_depth(), 3);
    assert_eq!(tree.leaves().len(), 1);
    assert_eq!(tree.leaves()[0].0, key);

    // same depth, other settings
    tree.set_config(TreeConfig::default().with_tree_depth(3).with_num_bins(8)).unwrap();
    assert_eq!(tree.config().num_bins, 8);

    tree.clear();
    tree.set_config(TreeConfig::default().with_tree_depth(2)).unwrap();
    assert_eq!(tree.tree_depth(), 2);
}
