//! Error types for rough-octree

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The byte sink refused a write during encoding
    #[error("failed to write tree stream: {0}")]
    StreamWrite(#[source] io::Error),

    /// The byte source failed or ended early during decoding
    #[error("failed to read tree stream: {0}")]
    StreamRead(#[source] io::Error),

    #[error("cannot decode into a tree that already has a root, clear it first")]
    DecodeIntoNonEmptyTree,

    #[error("invalid binary encoding mode: {0}")]
    InvalidEncodingMode(u8),

    /// Bin counts must be a power of two, at least 2
    #[error("invalid roughness bin count: {0}")]
    InvalidBinCount(u32),

    #[error("invalid tree depth: {0} (expected 1..=32)")]
    InvalidTreeDepth(u8),

    /// A stream or tree has a node with children at or below max depth
    #[error("node with children at depth {depth}, tree depth is {tree_depth}")]
    DepthExceeded { depth: u8, tree_depth: u8 },

    #[error("cannot change tree depth from {current} to {requested} on a non-empty tree")]
    TreeDepthChange { current: u8, requested: u8 },

    #[error("invalid clamping thresholds: min {min} > max {max}")]
    InvalidClamping { min: f32, max: f32 },

    #[error("unknown tree type id: {0:?}")]
    UnknownTreeType(String),
}
