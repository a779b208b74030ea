//! Resource registry
//!
//! Holds the installed resource graph and the descriptor format used to load
//! resource sets from files.

pub mod descriptor;
pub mod graph;

pub use descriptor::{DescriptorSet, ResourceDescriptor};
pub use graph::ResourceGraph;
