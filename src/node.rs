use ordered_float::OrderedFloat;
use crate::{
    octree::OctreeNode,
    utils,
};

/// Per-voxel state: occupancy and stairs log-odds, a roughness estimate and
/// the tag of the agent that last observed it.
#[derive(Debug, Clone)]
pub struct RoughNode {
    log_odds: f32,
    /// NaN until a roughness value reaches this node
    rough: f32,
    stair_log_odds: f32,
    agent: u8,
    children: Option<Box<[Option<RoughNode>; 8]>>,
}

impl Default for RoughNode {
    fn default() -> Self {
        Self {
            log_odds: 0.0,
            rough: f32::NAN,
            stair_log_odds: 0.0,
            agent: 0,
            children: None,
        }
    }
}

impl RoughNode {
    #[inline]
    pub fn log_odds(&self) -> f32 {
        self.log_odds
    }

    #[inline]
    pub fn set_log_odds(&mut self, log_odds: f32) {
        self.log_odds = log_odds;
    }

    /// Occupancy probability
    #[inline]
    pub fn occupancy(&self) -> f64 {
        utils::probability(self.log_odds as f64)
    }

    #[inline]
    pub fn rough(&self) -> f32 {
        self.rough
    }

    #[inline]
    pub fn set_rough(&mut self, rough: f32) {
        self.rough = rough;
    }

    #[inline]
    pub fn is_rough_set(&self) -> bool {
        !self.rough.is_nan()
    }

    #[inline]
    pub fn stair_log_odds(&self) -> f32 {
        self.stair_log_odds
    }

    #[inline]
    pub fn set_stair_log_odds(&mut self, log_odds: f32) {
        self.stair_log_odds = log_odds;
    }

    #[inline]
    pub fn stair_probability(&self) -> f64 {
        utils::probability(self.stair_log_odds as f64)
    }

    #[inline]
    pub fn add_stair_value(&mut self, log_odds: f32) {
        self.stair_log_odds += log_odds;
    }

    #[inline]
    pub fn agent(&self) -> u8 {
        self.agent
    }

    #[inline]
    pub fn set_agent(&mut self, agent: u8) {
        self.agent = agent;
    }

    /// Copies the payload (not the children) of `from`.
    pub fn copy_data(&mut self, from: &RoughNode) {
        self.log_odds = from.log_odds;
        self.rough = from.rough;
        self.stair_log_odds = from.stair_log_odds;
        self.agent = from.agent;
    }

    /// Largest occupancy log-odds among existing children, `f32::MIN` for a
    /// leaf.
    pub fn max_child_log_odds(&self) -> f32 {
        self.children()
            .map(|child| OrderedFloat(child.log_odds))
            .max()
            .map_or(f32::MIN, |max| max.0)
    }

    /// Mean roughness of the children that have one, NaN if none do.
    pub fn average_child_rough(&self) -> f32 {
        let (sum, count) = self.children()
            .filter(|child| child.is_rough_set())
            .fold((0.0f64, 0u32), |(sum, count), child| (sum + child.rough as f64, count + 1));

        if count > 0 {
            (sum / count as f64) as f32
        } else {
            f32::NAN
        }
    }

    /// Mean of the children's stair probabilities, back in log-odds.
    pub fn mean_child_stair_log_odds(&self) -> f32 {
        let (sum, count) = self.children()
            .fold((0.0f64, 0u32), |(sum, count), child| (sum + child.stair_probability(), count + 1));

        if count == 0 {
            return 0.0;
        }
        utils::logodds(sum / count as f64)
    }

    /// Largest stair log-odds among existing children, `f32::MIN` for a leaf.
    pub fn max_child_stair_log_odds(&self) -> f32 {
        self.children()
            .map(|child| OrderedFloat(child.stair_log_odds))
            .max()
            .map_or(f32::MIN, |max| max.0)
    }
}

impl OctreeNode for RoughNode {
    #[inline]
    fn child(&self, index: usize) -> Option<&Self> {
        self.children.as_ref()?[index].as_ref()
    }

    #[inline]
    fn child_mut(&mut self, index: usize) -> Option<&mut Self> {
        self.children.as_mut()?[index].as_mut()
    }

    fn has_children(&self) -> bool {
        self.children
            .as_ref()
            .map_or(false, |children| children.iter().any(Option::is_some))
    }

    fn create_child(&mut self, index: usize) -> &mut Self {
        let children = self.children.get_or_insert_with(Default::default);
        children[index].insert(RoughNode::default())
    }

    fn expand(&mut self) {
        let mut children: Box<[Option<RoughNode>; 8]> = Default::default();
        for child in children.iter_mut() {
            let mut node = RoughNode::default();
            node.copy_data(self);
            *child = Some(node);
        }
        self.children = Some(children);
    }

    fn delete_children(&mut self) {
        self.children = None;
    }
}

#[test]
fn default_node_has_no_roughness() {
    let node = RoughNode::default();
    assert!(!node.is_rough_set());
    assert_eq!(node.log_odds(), 0.0);
    assert_eq!(node.occupancy(), 0.5);
    assert_eq!(node.stair_log_odds(), 0.0);
    assert!(!node.has_children());
}

#[test]
fn copy_data_keeps_children() {
    let mut source = RoughNode::default();
    source.set_log_odds(1.5);
    source.set_rough(0.25);
    source.set_stair_log_odds(-0.5);
    source.set_agent(3);

    let mut target = RoughNode::default();
    target.create_child(2);
    target.copy_data(&source);

    assert_eq!(target.log_odds(), 1.5);
    assert_eq!(target.rough(), 0.25);
    assert_eq!(target.stair_log_odds(), -0.5);
    assert_eq!(target.agent(), 3);
    assert!(target.child_exists(2));
}

#[test]
fn expand_copies_payload_into_all_children() {
    let mut node = RoughNode::default();
    node.set_log_odds(2.0);
    node.set_rough(0.4);
    node.set_agent(7);
    node.expand();

    assert_eq!(node.children().count(), 8);
    for child in node.children() {
        assert_eq!(child.log_odds(), 2.0);
        assert_eq!(child.rough(), 0.4);
        assert_eq!(child.agent(), 7);
        assert!(!child.has_children());
    }

    node.delete_children();
    assert!(!node.has_children());
}

#[test]
fn child_aggregates() {
    let mut node = RoughNode::default();
    assert!(node.average_child_rough().is_nan());
    assert_eq!(node.max_child_log_odds(), f32::MIN);

    node.create_child(0).set_rough(0.2);
    node.create_child(3).set_rough(0.6);
    // unset roughness is left out of the mean
    node.create_child(5).set_log_odds(1.25);

    assert!((node.average_child_rough() - 0.4).abs() < 1e-6);
    assert_eq!(node.max_child_log_odds(), 1.25);

    node.child_mut(0).unwrap().set_stair_log_odds(utils::logodds(0.9));
    node.child_mut(3).unwrap().set_stair_log_odds(utils::logodds(0.3));
    node.child_mut(5).unwrap().set_stair_log_odds(utils::logodds(0.6));

    // mean over probabilities, not log-odds
    let expected = utils::logodds(0.6);
    assert!((node.mean_child_stair_log_odds() - expected).abs() < 1e-5);
    assert!((node.max_child_stair_log_odds() - utils::logodds(0.9)).abs() < 1e-6);
}

#[test]
fn has_children_ignores_empty_slots() {
    let mut node = RoughNode::default();
    node.create_child(4);
    assert!(node.has_children());
    assert!(node.child_exists(4));
    assert!(!node.child_exists(3));
}
