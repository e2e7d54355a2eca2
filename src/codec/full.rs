//! Uncompressed node records: `log_odds`, `rough` and `stair_log_odds` as
//! little-endian `f32`, then one byte marking the existing children.

use std::io::{ Read, Write };
use bitvec::prelude::*;
use super::check_parent_depth;
use crate::{
    error::{ Error, Result },
    node::RoughNode,
    octree::OctreeNode,
};

const RECORD_LEN: usize = 3 * 4 + 1;

pub(super) fn write_node<W: Write>(node: &RoughNode, depth: u8, tree_depth: u8, writer: &mut W) -> Result<()> {
    if node.has_children() {
        check_parent_depth(depth, tree_depth)?;
    }

    let mut record = [0u8; RECORD_LEN];
    record[0..4].copy_from_slice(&node.log_odds().to_le_bytes());
    record[4..8].copy_from_slice(&node.rough().to_le_bytes());
    record[8..12].copy_from_slice(&node.stair_log_odds().to_le_bytes());

    let mask = record[12].view_bits_mut::<Lsb0>();
    for index in 0..8 {
        mask.set(index, node.child_exists(index));
    }

    writer.write_all(&record).map_err(Error::StreamWrite)?;

    for child in node.children() {
        write_node(child, depth + 1, tree_depth, writer)?;
    }

    Ok(())
}

pub(super) fn read_node<R: Read>(node: &mut RoughNode, depth: u8, tree_depth: u8, reader: &mut R) -> Result<()> {
    let mut record = [0u8; RECORD_LEN];
    reader.read_exact(&mut record).map_err(Error::StreamRead)?;

    let field = |at: usize| f32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]);
    node.set_log_odds(field(0));
    node.set_rough(field(4));
    node.set_stair_log_odds(field(8));

    let mask = record[12].view_bits::<Lsb0>();
    if mask.any() {
        check_parent_depth(depth, tree_depth)?;
    }
    for index in mask.iter_ones() {
        read_node(node.create_child(index), depth + 1, tree_depth, reader)?;
    }

    Ok(())
}

#[test]
fn record_layout() {
    let mut node = RoughNode::default();
    node.set_log_odds(1.0);
    node.create_child(2).set_rough(0.5);
    node.create_child(7);

    let mut bytes = Vec::new();
    write_node(&node, 0, 16, &mut bytes).unwrap();
    assert_eq!(bytes.len(), 3 * RECORD_LEN);
    assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
    // unset roughness is stored as NaN
    assert!(f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]).is_nan());
    assert_eq!(bytes[12], 0b1000_0100);

    let mut decoded = RoughNode::default();
    read_node(&mut decoded, 0, 16, &mut bytes.as_slice()).unwrap();
    assert_eq!(decoded.log_odds(), 1.0);
    assert_eq!(decoded.child(2).unwrap().rough(), 0.5);
    assert!(!decoded.child(7).unwrap().is_rough_set());
    assert_eq!(decoded.children().count(), 2);
}
