//! Binary persistence of a [`RoughOcTree`].
//!
//! Two compact encodings pack each node's 8 children into a few bits per
//! child and recurse depth-first into children that have children of their
//! own. The encoding is selected per tree by
//! [`TreeConfig::encoding_mode`](crate::config::TreeConfig), so a decoder
//! must be configured the same way as the encoder (see [`type_id`]).
//!
//! ```text
//! 10 : free leaf
//! 01 : occupied leaf
//! 11 : inner node, its own children follow
//! 00 : unknown, no node
//! ```
//!
//! A third, uncompressed format ([`full`]) stores every node's raw values.

mod binning;
mod full;
mod thresholding;
pub mod type_id;

use std::io::{ BufRead, Write };
use crate::{
    config::{ BinLayout, EncodingMode, TreeConfig },
    error::{ Error, Result },
    node::RoughNode,
    octree::OctreeNode,
    tree::RoughOcTree,
};

/// 2-bit occupancy code of one child slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildCode {
    Unknown,
    Free,
    Occupied,
    Inner,
}

impl ChildCode {
    /// Classifies the child slot `index` of `node`.
    pub(crate) fn of(config: &TreeConfig, node: &RoughNode, index: usize) -> Self {
        match node.child(index) {
            None => ChildCode::Unknown,
            Some(child) if child.has_children() => ChildCode::Inner,
            Some(child) if child.log_odds() >= config.occupancy_thres_log() => ChildCode::Occupied,
            Some(_) => ChildCode::Free,
        }
    }

    /// `(first, second)` bit of the pair.
    pub(crate) fn bits(self) -> (bool, bool) {
        match self {
            ChildCode::Unknown => (false, false),
            ChildCode::Free => (true, false),
            ChildCode::Occupied => (false, true),
            ChildCode::Inner => (true, true),
        }
    }

    pub(crate) fn from_bits(first: bool, second: bool) -> Self {
        match (first, second) {
            (false, false) => ChildCode::Unknown,
            (true, false) => ChildCode::Free,
            (false, true) => ChildCode::Occupied,
            (true, true) => ChildCode::Inner,
        }
    }
}

/// Only nodes above max depth may have children.
pub(crate) fn check_parent_depth(depth: u8, tree_depth: u8) -> Result<()> {
    if depth >= tree_depth {
        log::error!("node with children at depth {depth}, tree depth is {tree_depth}");
        return Err(Error::DepthExceeded { depth, tree_depth });
    }
    Ok(())
}

impl RoughOcTree {
    /// Writes the tree in the configured compact encoding. An empty tree
    /// writes nothing.
    pub fn write_binary<W: Write>(&self, writer: &mut W) -> Result<()> {
        let layout = BinLayout::new(self.config.num_bins)?;
        let Some(root) = self.root() else {
            return Ok(());
        };

        log::debug!("writing {} nodes to binary stream ({:?})", self.size(), self.config.encoding_mode);
        match self.config.encoding_mode {
            EncodingMode::Thresholding => thresholding::write_node(&self.config, root, 0, writer),
            EncodingMode::Binning => binning::write_node(&self.config, &layout, root, 0, writer),
        }
    }

    /// Rebuilds the tree from a stream written by
    /// [`write_binary`](Self::write_binary) with the same encoding settings.
    ///
    /// Refuses to run on a tree that already has a root. A stream nesting
    /// nodes below max depth is rejected. On any failure the tree is left
    /// empty.
    pub fn read_binary<R: BufRead>(&mut self, reader: &mut R) -> Result<()> {
        if self.root.is_some() {
            log::error!("refusing to decode into an existing tree");
            return Err(Error::DecodeIntoNonEmptyTree);
        }
        let layout = BinLayout::new(self.config.num_bins)?;

        if reader.fill_buf().map_err(Error::StreamRead)?.is_empty() {
            return Ok(());
        }

        let mut root = Box::<RoughNode>::default();
        match self.config.encoding_mode {
            EncodingMode::Thresholding => thresholding::read_node(&self.config, &mut root, 0, reader)?,
            EncodingMode::Binning => binning::read_node(&self.config, &layout, &mut root, 0, reader)?,
        }

        self.root = Some(root);
        self.tree_size = self.calc_num_nodes();
        log::debug!("read {} nodes from binary stream", self.tree_size);
        Ok(())
    }

    /// Writes every node's raw occupancy, roughness and stairs values.
    pub fn write_full<W: Write>(&self, writer: &mut W) -> Result<()> {
        let Some(root) = self.root() else {
            return Ok(());
        };

        log::debug!("writing {} nodes to full stream", self.size());
        full::write_node(root, 0, self.config.tree_depth, writer)
    }

    /// Rebuilds the tree from a stream written by
    /// [`write_full`](Self::write_full).
    pub fn read_full<R: BufRead>(&mut self, reader: &mut R) -> Result<()> {
        if self.root.is_some() {
            log::error!("refusing to decode into an existing tree");
            return Err(Error::DecodeIntoNonEmptyTree);
        }
        if reader.fill_buf().map_err(Error::StreamRead)?.is_empty() {
            return Ok(());
        }

        let mut root = Box::<RoughNode>::default();
        full::read_node(&mut root, 0, self.config.tree_depth, reader)?;

        self.root = Some(root);
        self.tree_size = self.calc_num_nodes();
        log::debug!("read {} nodes from full stream", self.tree_size);
        Ok(())
    }

    pub fn to_binary_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_binary(&mut bytes)?;
        Ok(bytes)
    }

    pub fn to_full_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_full(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests;
