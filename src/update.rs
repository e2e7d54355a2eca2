//! Key-addressed fusion of observations into the tree.
//!
//! Occupancy and stairs updates descend from the root to the key's leaf,
//! creating nodes on the way, apply a clamped log-odds delta at the leaf and
//! then prune or re-aggregate every ancestor on the way back up. Roughness
//! fusion and the direct accessors only touch nodes that already exist.

use ahash::AHashMap;
use crate::{
    aggregate::refresh_inner,
    config::TreeConfig,
    key::OcTreeKey,
    node::RoughNode,
    octree::OctreeNode,
    prune::prune_node,
    tree::{ RoughOcTree, search_node_mut },
    utils::{ self, clamped_add },
};

/// Probability of a "not stairs" observation
pub const STAIRS_MISS_PROB: f64 = 0.49;
/// Probability of a "stairs" observation
pub const STAIRS_HIT_PROB: f64 = 0.99;

#[derive(Debug, Clone, Copy)]
enum Observation {
    Occupancy { delta: f32, agent: Option<u8> },
    Stairs { delta: f32 },
}

impl Observation {
    fn delta(&self) -> f32 {
        match *self {
            Observation::Occupancy { delta, .. } | Observation::Stairs { delta } => delta,
        }
    }

    fn current(&self, node: &RoughNode) -> f32 {
        match self {
            Observation::Occupancy { .. } => node.log_odds(),
            Observation::Stairs { .. } => node.stair_log_odds(),
        }
    }

    /// The update cannot change a value already saturated in its direction.
    fn is_saturated(&self, node: &RoughNode, config: &TreeConfig) -> bool {
        let (min, max) = config.clamping_log_odds();
        let (delta, value) = (self.delta(), self.current(node));
        (delta >= 0.0 && value >= max) || (delta <= 0.0 && value <= min)
    }

    fn classify(&self, node: &RoughNode, config: &TreeConfig) -> bool {
        match self {
            Observation::Occupancy { .. } => node.log_odds() >= config.occupancy_thres_log(),
            Observation::Stairs { .. } => node.stair_log_odds() > config.stairs_thres_log(),
        }
    }

    fn apply(&self, node: &mut RoughNode, config: &TreeConfig) {
        let (min, max) = config.clamping_log_odds();
        match *self {
            Observation::Occupancy { delta, agent } => {
                node.set_log_odds(clamped_add(node.log_odds(), delta, min, max));
                if let Some(agent) = agent {
                    node.set_agent(agent);
                }
            }
            Observation::Stairs { delta } => {
                node.add_stair_value(delta);
                node.set_stair_log_odds(clamped_add(node.stair_log_odds(), 0.0, min, max));
            }
        }
    }
}

/// State threaded through one descending update.
struct Fusion<'a> {
    config: &'a TreeConfig,
    tree_size: &'a mut usize,
    changed_keys: Option<&'a mut AHashMap<OcTreeKey, bool>>,
    key: OcTreeKey,
    observation: Observation,
}

impl<'a> Fusion<'a> {
    fn descend(&mut self, node: &mut RoughNode, node_just_created: bool, depth: u8) {
        let tree_depth = self.config.tree_depth;
        if depth >= tree_depth {
            self.update_leaf(node, node_just_created);
            return;
        }

        let pos = self.key.child_index(tree_depth - 1 - depth);
        let mut created = false;
        if !node.child_exists(pos) {
            if !node.has_children() && !node_just_created {
                // a pruned leaf: re-open it so the other octants keep its value
                node.expand();
                *self.tree_size += 8;
                log::trace!("expanded pruned node at depth {depth}");
            } else {
                node.create_child(pos);
                *self.tree_size += 1;
                created = true;
            }
        }

        if let Some(child) = node.child_mut(pos) {
            self.descend(child, created, depth + 1);
        }

        if prune_node(node) {
            *self.tree_size -= 8;
            log::trace!("pruned node at depth {depth}");
        } else {
            refresh_inner(node);
        }
    }

    fn update_leaf(&mut self, node: &mut RoughNode, node_just_created: bool) {
        let before = self.observation.classify(node, self.config);
        self.observation.apply(node, self.config);

        let Some(changed_keys) = self.changed_keys.as_deref_mut() else {
            return;
        };
        if node_just_created {
            changed_keys.insert(self.key, true);
        } else if before != self.observation.classify(node, self.config) {
            use std::collections::hash_map::Entry;

            match changed_keys.entry(self.key) {
                Entry::Vacant(entry) => {
                    entry.insert(false);
                }
                // flipped back before anyone looked at it
                Entry::Occupied(entry) if !*entry.get() => {
                    entry.remove();
                }
                Entry::Occupied(_) => {}
            }
        }
    }
}

impl RoughOcTree {
    /// Integrates a hit or miss at `key`, recording `agent` on the leaf.
    ///
    /// Returns the node now covering `key`: the leaf itself, or the ancestor
    /// it was pruned into.
    pub fn update_occupancy(&mut self, key: OcTreeKey, hit: bool, agent: u8) -> Option<&RoughNode> {
        let delta = if hit {
            self.config.prob_hit_log()
        } else {
            self.config.prob_miss_log()
        };
        self.update_occupancy_log_odds(key, delta, Some(agent))
    }

    /// Adds a raw occupancy log-odds delta at `key`.
    pub fn update_occupancy_log_odds(&mut self, key: OcTreeKey, delta: f32, agent: Option<u8>) -> Option<&RoughNode> {
        self.fuse(key, Observation::Occupancy { delta, agent })
    }

    /// Integrates a stairs / not-stairs classification at `key`, creating the
    /// path like [`update_occupancy`](Self::update_occupancy).
    pub fn update_stairs(&mut self, key: OcTreeKey, is_stairs: bool) -> Option<&RoughNode> {
        let delta = if is_stairs {
            utils::logodds(STAIRS_HIT_PROB)
        } else {
            utils::logodds(STAIRS_MISS_PROB)
        };
        self.update_stairs_log_odds(key, delta)
    }

    /// Adds a raw stairs log-odds delta at `key`.
    pub fn update_stairs_log_odds(&mut self, key: OcTreeKey, delta: f32) -> Option<&RoughNode> {
        self.fuse(key, Observation::Stairs { delta })
    }

    /// Stairs fusion on an existing node only: no node creation, no
    /// re-aggregation of ancestors.
    pub fn integrate_stairs(&mut self, key: OcTreeKey, is_stairs: bool) -> Option<&RoughNode> {
        let delta = if is_stairs {
            utils::logodds(STAIRS_HIT_PROB)
        } else {
            utils::logodds(STAIRS_MISS_PROB)
        };
        let observation = Observation::Stairs { delta };

        let config = &self.config;
        let node = self.root.as_deref_mut().and_then(|root| search_node_mut(root, key, config.tree_depth))?;
        if !observation.is_saturated(node, config) {
            observation.apply(node, config);
        }
        Some(&*node)
    }

    fn fuse(&mut self, key: OcTreeKey, observation: Observation) -> Option<&RoughNode> {
        let saturated = self.search(key)
            .map_or(false, |node| observation.is_saturated(node, &self.config));

        if !saturated {
            let created_root = self.root.is_none();
            let root = self.root.get_or_insert_with(Default::default);
            if created_root {
                self.tree_size += 1;
            }

            let changed_keys = if self.config.change_detection {
                Some(&mut self.changed_keys)
            } else {
                None
            };
            let mut fusion = Fusion {
                config: &self.config,
                tree_size: &mut self.tree_size,
                changed_keys,
                key,
                observation,
            };
            fusion.descend(root, created_root, 0);
        }

        self.search(key)
    }

    /// Averages `rough` with the existing roughness at `key`. Does not create
    /// nodes.
    pub fn average_node_rough(&mut self, key: OcTreeKey, rough: f32) -> Option<&RoughNode> {
        let node = self.search_mut(key)?;
        if node.is_rough_set() {
            let prev = node.rough();
            node.set_rough((prev + rough) / 2.0);
        } else {
            node.set_rough(rough);
        }
        Some(&*node)
    }

    /// Fuses `rough` into the existing roughness at `key`, weighted by the
    /// node's occupancy probability `p`: `prev * p + rough * (0.99 - p)`.
    /// The weights deliberately do not sum to one. Does not create nodes.
    pub fn integrate_node_rough(&mut self, key: OcTreeKey, rough: f32) -> Option<&RoughNode> {
        let node = self.search_mut(key)?;
        if node.is_rough_set() {
            let prev = node.rough() as f64;
            let p = node.occupancy();
            node.set_rough((prev * p + rough as f64 * (0.99 - p)) as f32);
        } else {
            node.set_rough(rough);
        }
        Some(&*node)
    }

    /// Overwrites the roughness at `key`.
    pub fn set_node_rough(&mut self, key: OcTreeKey, rough: f32) -> Option<&RoughNode> {
        let node = self.search_mut(key)?;
        node.set_rough(rough);
        Some(&*node)
    }

    /// Roughness at `key`, NaN if the key is absent or has none.
    pub fn node_rough(&self, key: OcTreeKey) -> f32 {
        self.search(key).map_or(f32::NAN, RoughNode::rough)
    }

    pub fn set_node_agent(&mut self, key: OcTreeKey, agent: u8) -> Option<&RoughNode> {
        let node = self.search_mut(key)?;
        node.set_agent(agent);
        Some(&*node)
    }

    /// Overwrites the stairs log-odds at `key` without fusion.
    pub fn set_node_stairs_log_odds(&mut self, key: OcTreeKey, log_odds: f32) -> Option<&RoughNode> {
        let node = self.search_mut(key)?;
        node.set_stair_log_odds(log_odds);
        Some(&*node)
    }

    /// Stairs log-odds at `key`, 0.0 if the key is absent.
    pub fn node_stairs_log_odds(&self, key: OcTreeKey) -> f32 {
        self.search(key).map_or(0.0, RoughNode::stair_log_odds)
    }
}

#[cfg(test)]
fn small_tree(tree_depth: u8) -> RoughOcTree {
    RoughOcTree::with_config(TreeConfig::default().with_tree_depth(tree_depth)).unwrap()
}

#[test]
fn update_creates_path_lazily() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(32768, 32768, 32768);

    let node = tree.update_occupancy(key, true, 1).unwrap();
    assert_eq!(node.agent(), 1);
    assert_eq!(node.log_odds(), tree.config().prob_hit_log());

    // root plus one node per level
    assert_eq!(tree.size(), 17);
    assert_eq!(tree.calc_num_nodes(), 17);

    // ancestors carry the leaf's occupancy
    assert_eq!(tree.root().unwrap().log_odds(), tree.config().prob_hit_log());

    tree.update_occupancy(OcTreeKey::new(32769, 32768, 32768), false, 2);
    assert_eq!(tree.size(), 18);
    assert_eq!(tree.root().unwrap().log_odds(), tree.config().prob_hit_log());
}

#[test]
fn repeated_hits_saturate_and_stop_writing() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(100, 200, 300);
    let (min, max) = tree.config().clamping_log_odds();

    for _ in 0..20 {
        tree.update_occupancy(key, true, 1);
    }
    let saturated = tree.search(key).unwrap().log_odds();
    assert_eq!(saturated, max);

    // further hits leave the bit pattern untouched, even the agent
    let size = tree.size();
    let node = tree.update_occupancy(key, true, 9).unwrap();
    assert_eq!(node.log_odds().to_bits(), saturated.to_bits());
    assert_eq!(node.agent(), 1);
    assert_eq!(tree.size(), size);

    for _ in 0..40 {
        tree.update_occupancy(key, false, 1);
    }
    assert_eq!(tree.search(key).unwrap().log_odds(), min);
    let node = tree.update_occupancy(key, false, 1).unwrap();
    assert_eq!(node.log_odds().to_bits(), min.to_bits());
}

#[test]
fn uniform_siblings_are_pruned_and_reexpanded() {
    let mut tree = small_tree(2);
    for index in 0..8 {
        let key = OcTreeKey::from_path([3, index], 2).unwrap();
        for _ in 0..10 {
            tree.update_occupancy(key, true, 1);
        }
    }

    // all 8 leaves saturated to the same value and collapsed into octant 3
    let (_, max) = tree.config().clamping_log_odds();
    let branch = tree.root().unwrap().child(3).unwrap();
    assert!(!branch.has_children());
    assert_eq!(branch.log_odds(), max);
    assert_eq!(tree.size(), 2);
    assert_eq!(tree.calc_num_nodes(), 2);

    // a miss inside the pruned region expands it again
    let key = OcTreeKey::from_path([3, 5], 2).unwrap();
    let node = tree.update_occupancy(key, false, 2).unwrap();
    assert_eq!(node.log_odds(), max + tree.config().prob_miss_log());
    assert_eq!(tree.size(), 10);
    assert_eq!(tree.search(OcTreeKey::from_path([3, 4], 2).unwrap()).unwrap().log_odds(), max);
}

#[test]
fn roughness_average_law() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(5, 5, 5);
    tree.update_occupancy(key, true, 0);

    assert_eq!(tree.average_node_rough(key, 0.3).unwrap().rough(), 0.3);
    let fused = tree.average_node_rough(key, 0.7).unwrap().rough();
    assert!((fused - 0.5).abs() < 1e-6);
}

#[test]
fn roughness_integrate_law() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(40000, 12, 7);
    tree.update_occupancy(key, true, 1);

    assert_eq!(tree.integrate_node_rough(key, 0.8).unwrap().rough(), 0.8);

    let p = tree.search(key).unwrap().occupancy();
    let fused = tree.integrate_node_rough(key, 0.4).unwrap().rough();
    let expected = 0.8 * p + 0.4 * (0.99 - p);
    assert!((fused as f64 - expected).abs() < 1e-6);
    assert!((fused - 0.676).abs() < 1e-3);
}

#[test]
fn roughness_fusion_never_creates_nodes() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(1, 2, 3);

    assert!(tree.integrate_node_rough(key, 0.5).is_none());
    assert!(tree.average_node_rough(key, 0.5).is_none());
    assert!(tree.set_node_rough(key, 0.5).is_none());
    assert!(tree.set_node_agent(key, 3).is_none());
    assert!(tree.node_rough(key).is_nan());
    assert!(tree.root().is_none());

    // a sibling existing is not enough
    tree.update_occupancy(OcTreeKey::new(1, 2, 2), true, 0);
    assert!(tree.integrate_node_rough(key, 0.5).is_none());
}

#[test]
fn direct_stairs_accessors() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(9, 9, 9);

    assert!(tree.set_node_stairs_log_odds(key, 1.0).is_none());
    assert_eq!(tree.node_stairs_log_odds(key), 0.0);

    tree.update_occupancy(key, true, 0);
    assert_eq!(tree.set_node_stairs_log_odds(key, 1.25).unwrap().stair_log_odds(), 1.25);
    assert_eq!(tree.node_stairs_log_odds(key), 1.25);
    // no fusion, no clamping
    tree.set_node_stairs_log_odds(key, 50.0);
    assert_eq!(tree.node_stairs_log_odds(key), 50.0);
}

#[test]
fn stairs_updates_fuse_and_clamp() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(10, 20, 30);
    let (min, max) = tree.config().clamping_log_odds();

    let node = tree.update_stairs(key, true).unwrap();
    assert!((node.stair_log_odds() - utils::logodds(STAIRS_HIT_PROB).min(max)).abs() < 1e-6);
    assert!(tree.is_node_stairs(tree.search(key).unwrap()));
    assert_eq!(tree.size(), 17);

    tree.update_stairs(key, true);
    assert_eq!(tree.node_stairs_log_odds(key), max);

    for _ in 0..200 {
        tree.update_stairs(key, false);
    }
    assert_eq!(tree.node_stairs_log_odds(key), min);
    assert!(!tree.is_node_stairs(tree.search(key).unwrap()));

    // live aggregation: a single child so the mean probability is the child's
    let root = tree.root().unwrap();
    assert!((root.stair_log_odds() - min).abs() < 1e-4);
}

#[test]
fn integrate_stairs_needs_existing_node() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(3, 3, 3);
    assert!(tree.integrate_stairs(key, true).is_none());
    assert!(tree.root().is_none());

    tree.update_occupancy(key, true, 0);
    let node = tree.integrate_stairs(key, false).unwrap();
    assert!((node.stair_log_odds() - utils::logodds(STAIRS_MISS_PROB)).abs() < 1e-6);
}

#[test]
fn change_detection_tracks_new_and_flipped_keys() {
    let mut tree = RoughOcTree::new(0.1);
    let key = OcTreeKey::new(7, 8, 9);

    // disabled by default
    tree.update_occupancy(key, true, 0);
    assert_eq!(tree.num_changes_detected(), 0);

    tree.enable_change_detection(true);
    let fresh = OcTreeKey::new(70, 80, 90);
    tree.update_occupancy(fresh, true, 0);
    assert_eq!(tree.changed_keys().collect::<Vec<_>>(), vec![(&fresh, &true)]);

    tree.reset_change_detection();
    // two misses take 0.85 down to 0.04, still occupied: no change
    tree.update_occupancy(key, false, 0);
    tree.update_occupancy(key, false, 0);
    assert_eq!(tree.num_changes_detected(), 0);

    // the third miss crosses the threshold
    tree.update_occupancy(key, false, 0);
    assert_eq!(tree.changed_keys().collect::<Vec<_>>(), vec![(&key, &false)]);

    // flipping back removes the entry again
    tree.update_occupancy(key, true, 0);
    assert_eq!(tree.num_changes_detected(), 0);
}

#[test]
fn change_detection_follows_stairs_class() {
    let mut tree = RoughOcTree::new(0.1);
    tree.enable_change_detection(true);

    // a stairs update can create the leaf too
    let fresh = OcTreeKey::new(11, 12, 13);
    tree.update_stairs(fresh, false);
    assert_eq!(tree.changed_keys().collect::<Vec<_>>(), vec![(&fresh, &true)]);

    let key = OcTreeKey::new(21, 22, 23);
    tree.update_occupancy(key, true, 0);
    tree.reset_change_detection();

    // not stairs -> stairs
    tree.update_stairs(key, true);
    assert!(tree.is_node_stairs(tree.search(key).unwrap()));
    assert_eq!(tree.changed_keys().collect::<Vec<_>>(), vec![(&key, &false)]);

    // a second stairs observation keeps the class, nothing new to record
    tree.update_stairs(key, true);
    assert_eq!(tree.num_changes_detected(), 1);

    // enough "not stairs" observations flip it back and clear the entry
    for _ in 0..200 {
        tree.update_stairs(key, false);
    }
    assert!(!tree.is_node_stairs(tree.search(key).unwrap()));
    assert_eq!(tree.num_changes_detected(), 0);
}
