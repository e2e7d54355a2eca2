use proptest::prelude::*;
use crate::{
    config::{ EncodingMode, TreeConfig },
    error::Error,
    key::OcTreeKey,
    node::RoughNode,
    octree::OctreeNode,
    tree::RoughOcTree,
};

fn tree_with(mode: EncodingMode, tree_depth: u8) -> RoughOcTree {
    RoughOcTree::with_config(
        TreeConfig::default()
            .with_tree_depth(tree_depth)
            .with_encoding_mode(mode)
            .with_rough_binary_thres(0.5),
    ).unwrap()
}

fn decode(template: &RoughOcTree, bytes: &[u8]) -> RoughOcTree {
    let mut tree = RoughOcTree::with_config(template.config().clone()).unwrap();
    tree.read_binary(&mut &bytes[..]).unwrap();
    tree
}

fn populated(mode: EncodingMode) -> (RoughOcTree, [OcTreeKey; 4]) {
    let mut tree = tree_with(mode, 4);
    let rough = OcTreeKey::from_path([0, 1, 2, 3], 4).unwrap();
    let smooth = OcTreeKey::from_path([0, 1, 2, 4], 4).unwrap();
    let stairs = OcTreeKey::from_path([7, 7, 0, 0], 4).unwrap();
    let free = OcTreeKey::from_path([5, 2, 6, 1], 4).unwrap();

    for key in [rough, smooth, stairs] {
        tree.update_occupancy(key, true, 1);
    }
    tree.update_occupancy(free, false, 2);
    tree.set_node_rough(rough, 1.0);
    tree.set_node_rough(smooth, 0.2);
    for _ in 0..3 {
        tree.update_stairs(stairs, true);
    }
    (tree, [rough, smooth, stairs, free])
}

#[test]
fn thresholding_scenario() {
    let mut tree = tree_with(EncodingMode::Thresholding, 16);
    let key = OcTreeKey::new(32768, 32768, 32768);

    tree.update_occupancy(key, true, 1);
    tree.integrate_node_rough(key, 0.8);
    let fused = tree.integrate_node_rough(key, 0.4).unwrap().rough();

    let bytes = tree.to_binary_bytes().unwrap();
    // one 3-byte record per inner node along the path
    assert_eq!(bytes.len(), 16 * 3);

    let decoded = decode(&tree, &bytes);
    assert_eq!(decoded.size(), 17);
    let (_, max) = decoded.config().clamping_log_odds();
    let leaf = decoded.search(key).unwrap();
    assert_eq!(leaf.log_odds(), max);
    assert!(decoded.is_node_occupied(leaf));

    let expected = if fused > 0.5 { 0.5 } else { 0.0 };
    assert_eq!(leaf.rough(), expected);
    // 0.8 and 0.4 fuse above the threshold with the default hit probability
    assert_eq!(leaf.rough(), 0.5);

    // inner nodes take the max of their children
    assert_eq!(decoded.root().unwrap().log_odds(), max);
}

#[test]
fn binning_edges_of_roughness_range() {
    let (mut tree, [rough, smooth, ..]) = populated(EncodingMode::Binning);
    let zero = OcTreeKey::from_path([0, 1, 2, 5], 4).unwrap();
    tree.update_occupancy(zero, true, 1);
    tree.set_node_rough(zero, 0.0);

    let decoded = decode(&tree, &tree.to_binary_bytes().unwrap());
    assert_eq!(decoded.search(rough).unwrap().rough(), 1.0);
    assert_eq!(decoded.search(zero).unwrap().rough(), 0.0);
    // floor(0.2 * 15) = 3
    assert!((decoded.search(smooth).unwrap().rough() - 3.0 / 15.0).abs() < 1e-6);
}

#[test]
fn round_trip_keeps_leaf_classes() {
    for mode in [EncodingMode::Thresholding, EncodingMode::Binning] {
        let (tree, [rough, smooth, stairs, free]) = populated(mode);
        let bytes = tree.to_binary_bytes().unwrap();
        let decoded = decode(&tree, &bytes);

        assert_eq!(decoded.size(), tree.size());
        for key in [rough, smooth, stairs] {
            assert!(decoded.is_node_occupied(decoded.search(key).unwrap()), "{mode:?}");
        }
        assert!(!decoded.is_node_occupied(decoded.search(free).unwrap()));
        assert!(decoded.search(OcTreeKey::from_path([1, 1, 1, 1], 4).unwrap()).is_none());

        match mode {
            EncodingMode::Thresholding => {
                assert_eq!(decoded.search(rough).unwrap().rough(), 0.5);
                assert_eq!(decoded.search(smooth).unwrap().rough(), 0.0);
            }
            EncodingMode::Binning => {
                assert!(decoded.is_node_stairs(decoded.search(stairs).unwrap()));
                assert!(!decoded.is_node_stairs(decoded.search(rough).unwrap()));
                // stairs are carried up with max
                assert_eq!(decoded.root().unwrap().child(7).unwrap().stair_log_odds(), 1.0);
                // bin values encode back to their own bin
                assert_eq!(decoded.to_binary_bytes().unwrap(), bytes);
            }
        }
    }
}

#[test]
fn decode_into_existing_tree_is_refused() {
    let (tree, _) = populated(EncodingMode::Binning);
    let bytes = tree.to_binary_bytes().unwrap();

    let (mut target, [rough, ..]) = populated(EncodingMode::Binning);
    target.set_node_rough(rough, 0.9);
    let size = target.size();

    let result = target.read_binary(&mut bytes.as_slice());
    assert!(matches!(result, Err(Error::DecodeIntoNonEmptyTree)));
    assert_eq!(target.size(), size);
    assert_eq!(target.node_rough(rough), 0.9);

    let result = target.read_full(&mut bytes.as_slice());
    assert!(matches!(result, Err(Error::DecodeIntoNonEmptyTree)));

    target.clear();
    target.read_binary(&mut bytes.as_slice()).unwrap();
    assert_eq!(target.size(), size);
}

#[test]
fn truncated_stream_leaves_tree_empty() {
    let (tree, _) = populated(EncodingMode::Binning);
    let bytes = tree.to_binary_bytes().unwrap();

    let mut decoded = RoughOcTree::with_config(tree.config().clone()).unwrap();
    let result = decoded.read_binary(&mut &bytes[..bytes.len() - 1]);
    assert!(matches!(result, Err(Error::StreamRead(_))));
    assert!(decoded.root().is_none());
    assert_eq!(decoded.size(), 0);
}

fn assert_rejected(mut tree: RoughOcTree, bytes: &[u8], full: bool) {
    let result = if full {
        tree.read_full(&mut &bytes[..])
    } else {
        tree.read_binary(&mut &bytes[..])
    };
    let tree_depth = tree.tree_depth();
    assert!(
        matches!(result, Err(Error::DepthExceeded { depth, tree_depth: td }) if depth == tree_depth && td == tree_depth),
        "{result:?}",
    );
    assert!(tree.root().is_none());
    assert_eq!(tree.size(), 0);
}

#[test]
fn stream_nesting_below_max_depth_is_rejected() {
    // child 0 inner at every level: root, depth 1, then depth 2 in a 2-level tree
    let mut bytes = [[0b011u8, 0, 0]; 3].concat();
    bytes.extend([0b010, 0, 0]);
    assert_rejected(tree_with(EncodingMode::Thresholding, 2), &bytes, false);

    // 7 bytes per node with 16 bins
    let bytes = [[0b11u8, 0, 0, 0, 0, 0, 0]; 3].concat();
    assert_rejected(tree_with(EncodingMode::Binning, 2), &bytes, false);

    // full records with child 0 present: a child mask on a max-depth node
    let mut record = [0u8; 13];
    record[12] = 0b1;
    let bytes = [record; 3].concat();
    assert_rejected(tree_with(EncodingMode::Binning, 1), &bytes, true);
}

#[test]
fn endless_nesting_fails_without_exhausting_the_stack() {
    let bytes = [0b011u8, 0, 0].repeat(1_000_000);
    assert_rejected(tree_with(EncodingMode::Thresholding, 16), &bytes, false);
}

#[test]
fn stream_reaching_exactly_max_depth_decodes() {
    // root and depth 1 are inner, the occupied leaf sits at depth 2
    let bytes = [[0b011u8, 0, 0], [0b010, 0, 0]].concat();
    let mut tree = tree_with(EncodingMode::Thresholding, 2);
    tree.read_binary(&mut bytes.as_slice()).unwrap();
    assert_eq!(tree.size(), 3);
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].1, 2);
}

#[test]
fn empty_tree_and_empty_stream() {
    let tree = tree_with(EncodingMode::Binning, 4);
    assert!(tree.to_binary_bytes().unwrap().is_empty());
    assert!(tree.to_full_bytes().unwrap().is_empty());

    let mut decoded = tree_with(EncodingMode::Binning, 4);
    decoded.read_binary(&mut &[0u8; 0][..]).unwrap();
    assert!(decoded.root().is_none());
}

#[test]
fn invalid_bin_count_writes_nothing() {
    let (mut tree, _) = populated(EncodingMode::Binning);
    tree.config.num_bins = 12;

    let mut bytes = Vec::new();
    assert!(matches!(tree.write_binary(&mut bytes), Err(Error::InvalidBinCount(12))));
    assert!(bytes.is_empty());
}

struct FailingSink;

impl std::io::Write for FailingSink {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
        Err(std::io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn sink_failure_is_reported() {
    let (tree, _) = populated(EncodingMode::Thresholding);
    assert!(matches!(tree.write_binary(&mut FailingSink), Err(Error::StreamWrite(_))));
    assert!(matches!(tree.write_full(&mut FailingSink), Err(Error::StreamWrite(_))));
}

#[test]
fn full_format_round_trip() {
    let (tree, [rough, smooth, stairs, free]) = populated(EncodingMode::Binning);
    let bytes = tree.to_full_bytes().unwrap();
    assert_eq!(bytes.len(), tree.size() * 13);

    let mut decoded = RoughOcTree::with_config(tree.config().clone()).unwrap();
    decoded.read_full(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded.size(), tree.size());

    for key in [rough, smooth, stairs, free] {
        let (a, b) = (tree.search(key).unwrap(), decoded.search(key).unwrap());
        assert_eq!(a.log_odds(), b.log_odds());
        assert_eq!(a.rough().to_bits(), b.rough().to_bits());
        assert_eq!(a.stair_log_odds(), b.stair_log_odds());
    }
    let (a, b) = (tree.root().unwrap(), decoded.root().unwrap());
    assert_eq!(a.log_odds(), b.log_odds());
    assert_eq!(a.stair_log_odds(), b.stair_log_odds());
}

#[derive(Debug, Clone)]
enum Op {
    Hit(u8),
    Miss,
    Rough(f32),
    Stairs(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Hit),
        Just(Op::Miss),
        (0.0f32..=1.0).prop_map(Op::Rough),
        any::<bool>().prop_map(Op::Stairs),
    ]
}

fn leaf_matches(tree: &RoughOcTree, decoded: &RoughOcTree, leaf: &RoughNode, other: &RoughNode) -> Result<(), TestCaseError> {
    let occupied = tree.is_node_occupied(leaf);
    prop_assert_eq!(occupied, decoded.is_node_occupied(other));
    if !occupied || tree.config().encoding_mode != EncodingMode::Binning {
        return Ok(());
    }

    prop_assert_eq!(tree.is_node_stairs(leaf), decoded.is_node_stairs(other));
    if leaf.is_rough_set() {
        let bin_size = 1.0 / (tree.config().num_bins - 1) as f32;
        prop_assert!((leaf.rough() - other.rough()).abs() <= bin_size + 1e-6);
    }
    Ok(())
}

proptest! {
    #[test]
    fn binary_round_trip(
        binning in any::<bool>(),
        updates in prop::collection::vec(((0u32..16, 0u32..16, 0u32..16), op()), 1..64),
    ) {
        let mode = if binning { EncodingMode::Binning } else { EncodingMode::Thresholding };
        let mut tree = tree_with(mode, 4);
        for ((x, y, z), op) in updates {
            let key = OcTreeKey::new(x, y, z);
            match op {
                Op::Hit(agent) => { tree.update_occupancy(key, true, agent); }
                Op::Miss => { tree.update_occupancy(key, false, 0); }
                Op::Rough(rough) => { tree.integrate_node_rough(key, rough); }
                Op::Stairs(stairs) => { tree.update_stairs(key, stairs); }
            }
        }

        let decoded = decode(&tree, &tree.to_binary_bytes().unwrap());
        let (leaves, decoded_leaves) = (tree.leaves(), decoded.leaves());
        prop_assert_eq!(leaves.len(), decoded_leaves.len());
        for ((key, depth, leaf), (other_key, other_depth, other)) in leaves.into_iter().zip(decoded_leaves) {
            prop_assert_eq!(key, other_key);
            prop_assert_eq!(depth, other_depth);
            leaf_matches(&tree, &decoded, leaf, other)?;
        }
    }
}
