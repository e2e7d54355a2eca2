//! `2 + R + 1` bits per child, `R = log2(num_bins)`:
//! the occupancy pair, the roughness bin index (least significant bit
//! first) and the stairs flag.
//!
//! Children are packed back to back, so a child may straddle a byte
//! boundary. Eight children always fill exactly
//! [`BinLayout::bytes_per_node`] bytes.

use std::io::{ Read, Write };
use arrayvec::ArrayVec;
use bitvec::prelude::*;
use crate::{
    config::{ BinLayout, TreeConfig },
    error::{ Error, Result },
    node::RoughNode,
    octree::OctreeNode,
};
use super::{ ChildCode, check_parent_depth };

pub(super) fn write_node<W: Write>(config: &TreeConfig, layout: &BinLayout, node: &RoughNode, depth: u8, writer: &mut W) -> Result<()> {
    check_parent_depth(depth, config.tree_depth)?;
    let stride = layout.bits_per_child();
    let mut bits = bitvec![u8, Lsb0; 0; 8 * stride];

    for index in 0..8 {
        let base = index * stride;
        let code = ChildCode::of(config, node, index);
        let (first, second) = code.bits();
        bits.set(base, first);
        bits.set(base + 1, second);

        if code != ChildCode::Occupied {
            continue;
        }
        let Some(child) = node.child(index) else {
            continue;
        };

        if child.is_rough_set() {
            let bin = layout.bin_index(child.rough());
            bits[base + 2..base + 2 + layout.rough_bits].store_le(bin);
        }
        let stairs = child.stair_log_odds() > config.stairs_thres_log();
        bits.set(base + 2 + layout.rough_bits, stairs);
    }

    writer.write_all(bits.as_raw_slice()).map_err(Error::StreamWrite)?;

    for child in node.children().filter(|child| child.has_children()) {
        write_node(config, layout, child, depth + 1, writer)?;
    }

    Ok(())
}

pub(super) fn read_node<R: Read>(config: &TreeConfig, layout: &BinLayout, node: &mut RoughNode, depth: u8, reader: &mut R) -> Result<()> {
    check_parent_depth(depth, config.tree_depth)?;
    let stride = layout.bits_per_child();
    let mut raw = vec![0u8; layout.bytes_per_node()];
    reader.read_exact(&mut raw).map_err(Error::StreamRead)?;
    let bits = BitVec::<u8, Lsb0>::from_vec(raw);

    let (min, max) = config.clamping_log_odds();
    node.set_log_odds(max);

    let mut inner = ArrayVec::<usize, 8>::new();
    for index in 0..8 {
        let base = index * stride;
        match ChildCode::from_bits(bits[base], bits[base + 1]) {
            ChildCode::Unknown => {}
            ChildCode::Free => {
                node.create_child(index).set_log_odds(min);
            }
            ChildCode::Occupied => {
                let bin: u32 = bits[base + 2..base + 2 + layout.rough_bits].load_le();
                let stairs = bits[base + 2 + layout.rough_bits];

                let child = node.create_child(index);
                child.set_log_odds(max);
                child.set_rough(layout.bin_value(bin));
                child.set_stair_log_odds(if stairs { 1.0 } else { 0.0 });
            }
            ChildCode::Inner => {
                node.create_child(index);
                inner.push(index);
            }
        }
    }

    for index in inner {
        if let Some(child) = node.child_mut(index) {
            read_node(config, layout, child, depth + 1, reader)?;
            child.set_log_odds(child.max_child_log_odds());
            child.set_stair_log_odds(child.max_child_stair_log_odds());
        }
    }

    Ok(())
}

#[test]
fn child_straddles_byte_boundary() {
    let config = TreeConfig::default();
    let layout = BinLayout::new(16).unwrap();
    let mut node = RoughNode::default();
    let child = node.create_child(1);
    child.set_log_odds(1.0);
    child.set_rough(1.0);
    child.set_stair_log_odds(2.0);

    let mut bytes = Vec::new();
    write_node(&config, &layout, &node, 0, &mut bytes).unwrap();
    assert_eq!(bytes.len(), 7);

    // child 1 starts at bit 7: occupied pair in bits 7 and 8, bin 15 in
    // bits 9..13, stairs in bit 13
    assert_eq!(bytes[0], 0b0000_0000);
    assert_eq!(bytes[1], 0b0011_1111);
    assert!(bytes[2..].iter().all(|&byte| byte == 0));

    let mut decoded = RoughNode::default();
    read_node(&config, &layout, &mut decoded, 0, &mut bytes.as_slice()).unwrap();
    let child = decoded.child(1).unwrap();
    assert_eq!(child.rough(), 1.0);
    assert_eq!(child.stair_log_odds(), 1.0);
    assert_eq!(decoded.children().count(), 1);
}

#[test]
fn unset_roughness_writes_bin_zero() {
    let config = TreeConfig::default();
    let layout = BinLayout::new(4).unwrap();
    let mut node = RoughNode::default();
    node.create_child(0).set_log_odds(1.0);

    let mut bytes = Vec::new();
    write_node(&config, &layout, &node, 0, &mut bytes).unwrap();
    assert_eq!(bytes.len(), 5);
    assert_eq!(bytes[0], 0b0000_0010);

    let mut decoded = RoughNode::default();
    read_node(&config, &layout, &mut decoded, 0, &mut bytes.as_slice()).unwrap();
    assert_eq!(decoded.child(0).unwrap().rough(), 0.0);
}
