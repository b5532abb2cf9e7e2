//! Computation-graph IR for the Garnet collective optimizer.
//!
//! This crate provides the foundational abstractions the optimizer passes
//! depend on:
//! - Graph-based IR (`Module`, `Graph`, `Op`, `Value`)
//! - Closed attribute types for collective operations (`CollectiveAttrs`,
//!   `TopologyDescriptor`)
//! - The `Pass` trait consumed by the embedding pass manager
//! - A `GraphBuilder` for constructing valid graphs
//!
//! A `Module` is an ordered set of `Graph`s (one per computation). Each
//! graph owns its operations in an arena; operand references are
//! graph-local value ids, never cross-graph pointers.

pub mod builder;
pub mod collective;
pub mod dot;
pub mod graph;
pub mod pass;
pub mod types;

// Re-export commonly used types
pub use builder::GraphBuilder;
pub use collective::{ChannelKind, CollectiveAttrs, SliceAttrs, TopologyDescriptor};
pub use dot::to_dot;
pub use graph::{Graph, Module, Op, OpId, OpKind, Value, ValueId};
pub use pass::Pass;
pub use types::{DataType, Shape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for garnet-ir operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Pass error: {0}")]
    Pass(String),
}
