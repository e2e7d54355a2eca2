//! 3 bits per child: the occupancy pair and a flag for roughness above
//! [`TreeConfig::rough_binary_thres`].
//!
//! ```text
//! byte 0: 0A 0B 0R 1A 1B 1R 2A 2B
//! byte 1: 2R 3A 3B 3R 4A 4B 4R 5A
//! byte 2: 5B 5R 6A 6B 6R 7A 7B 7R
//! ```
//! Bits are numbered from the least significant bit of each byte.

use std::io::{ Read, Write };
use arrayvec::ArrayVec;
use bitvec::prelude::*;
use crate::{
    config::TreeConfig,
    error::{ Error, Result },
    node::RoughNode,
    octree::OctreeNode,
};
use super::{ ChildCode, check_parent_depth };

const BITS_PER_CHILD: usize = 3;
const ROUGH_BIT: usize = 2;

type ChildBits = BitArray<[u8; 3], Lsb0>;

pub(super) fn write_node<W: Write>(config: &TreeConfig, node: &RoughNode, depth: u8, writer: &mut W) -> Result<()> {
    check_parent_depth(depth, config.tree_depth)?;
    let mut bits = ChildBits::ZERO;

    for index in 0..8 {
        let base = index * BITS_PER_CHILD;
        let code = ChildCode::of(config, node, index);
        let (first, second) = code.bits();
        bits.set(base, first);
        bits.set(base + 1, second);

        if code == ChildCode::Occupied {
            // NaN compares false, unset roughness is never rough
            let rough = node.child(index).map_or(false, |child| child.rough() > config.rough_binary_thres);
            bits.set(base + ROUGH_BIT, rough);
        }
    }

    writer.write_all(bits.as_raw_slice()).map_err(Error::StreamWrite)?;

    for child in node.children().filter(|child| child.has_children()) {
        write_node(config, child, depth + 1, writer)?;
    }

    Ok(())
}

pub(super) fn read_node<R: Read>(config: &TreeConfig, node: &mut RoughNode, depth: u8, reader: &mut R) -> Result<()> {
    check_parent_depth(depth, config.tree_depth)?;
    let mut raw = [0u8; 3];
    reader.read_exact(&mut raw).map_err(Error::StreamRead)?;
    let bits = ChildBits::new(raw);

    let (min, max) = config.clamping_log_odds();
    // inner nodes default to occupied
    node.set_log_odds(max);

    let mut inner = ArrayVec::<usize, 8>::new();
    for index in 0..8 {
        let base = index * BITS_PER_CHILD;
        match ChildCode::from_bits(bits[base], bits[base + 1]) {
            ChildCode::Unknown => {}
            ChildCode::Free => {
                node.create_child(index).set_log_odds(min);
            }
            ChildCode::Occupied => {
                let child = node.create_child(index);
                child.set_log_odds(max);
                child.set_rough(if bits[base + ROUGH_BIT] { config.rough_binary_thres } else { 0.0 });
            }
            ChildCode::Inner => {
                node.create_child(index);
                inner.push(index);
            }
        }
    }

    for index in inner {
        if let Some(child) = node.child_mut(index) {
            read_node(config, child, depth + 1, reader)?;
            child.set_log_odds(child.max_child_log_odds());
        }
    }

    Ok(())
}

#[test]
fn child_bits_layout() {
    let config = TreeConfig::default().with_rough_binary_thres(0.5);
    let mut node = RoughNode::default();
    node.create_child(0).set_log_odds(-1.0);
    let rough = node.create_child(1);
    rough.set_log_odds(1.0);
    rough.set_rough(0.8);
    node.create_child(2).set_log_odds(1.0);
    node.create_child(7).create_child(0).set_log_odds(1.0);

    let mut bytes = Vec::new();
    write_node(&config, &node, 0, &mut bytes).unwrap();

    // child 0 free (bit 0), child 1 occupied + rough (bits 4, 5),
    // child 2 occupied (bit 7), child 7 inner (bits 21, 22)
    assert_eq!(&bytes[..3], &[0b1011_0001, 0b0000_0000, 0b0110_0000]);
    // child 7's own node: its child 0 occupied, not rough
    assert_eq!(&bytes[3..], &[0b0000_0010, 0, 0]);
}
