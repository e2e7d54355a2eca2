#![warn(unused_extern_crates)]
pub use glam;

mod error;
pub use error::*;

mod config;
pub use config::*;

mod key;
pub use key::*;

mod octree;
pub use octree::*;

mod node;
pub use node::*;

mod tree;
pub use tree::*;

pub mod aggregate;
pub mod prune;

mod update;
pub use update::{ STAIRS_HIT_PROB, STAIRS_MISS_PROB };

pub mod codec;

pub mod utils;
