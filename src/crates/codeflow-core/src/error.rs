//! Error types for flow graph construction and validation
//!
//! All errors implement `std::error::Error` via the `thiserror` crate. Graph
//! construction errors surface before a flow is ever handed to the
//! coordinator, so a sealed [`Flow`](crate::flow::Flow) is structurally sound
//! by the time scheduling starts.

use thiserror::Error;

/// Convenience result type using [`FlowError`]
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors produced by flow graph construction, sealing, and snapshotting
#[derive(Error, Debug)]
pub enum FlowError {
    /// Graph structure validation failed
    ///
    /// **Common causes**: an edge references a node that was never added,
    /// a node was grouped into a logical node from a different flow, or the
    /// flow was used before [`Flow::seal`](crate::flow::Flow::seal).
    #[error("Flow validation failed: {0}")]
    Validation(String),

    /// The flow graph contains a cycle
    ///
    /// Flows must be acyclic; the offending node is reported by name.
    #[error("Flow graph contains a cycle through node '{node}'")]
    Cycle {
        /// Name of a node on the detected cycle
        node: String,
    },

    /// A node id did not resolve inside this flow
    #[error("Unknown flow node id {0}")]
    NodeNotFound(usize),

    /// A flow builder failed to produce a graph
    #[error("Flow builder failed: {0}")]
    Build(String),

    /// A codelet name did not resolve against the catalog
    #[error("Codelet '{0}' is not registered")]
    CodeletNotFound(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a builder error
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }
}
