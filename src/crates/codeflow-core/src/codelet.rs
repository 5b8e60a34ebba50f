//! Collaborator contracts: codelets, flow builders, and the codelet catalog
//!
//! The core never executes codelets itself; remote workers do. These traits
//! define the boundary: a [`FlowBuilder`] produces the graph to schedule, a
//! [`Codelet`] is the unit of computation a worker runs against staged
//! resources, and a [`CodeletCatalog`] resolves codelet names the way a
//! pluggable class/resource loader would.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::error::{FlowError, Result};
use crate::flow::{Flow, Resource};

/// Failure signal raised by a codelet run
///
/// The coordinator treats any codelet failure identically to a
/// session-reported error.
#[derive(Error, Debug)]
#[error("Codelet failed: {0}")]
pub struct CodeletError(pub String);

impl CodeletError {
    /// Create a failure signal with a message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The computation unit contract
///
/// Given ordered input resources, ordered output resources, and a parameter
/// document, execute synchronously and either return normally (success) or
/// signal a failure.
pub trait Codelet: Send + Sync {
    /// Execute against staged resources
    fn run(
        &self,
        inputs: &[Resource],
        outputs: &[Resource],
        parameters: &Value,
    ) -> std::result::Result<(), CodeletError>;
}

/// The flow construction contract
///
/// Produces a flow graph the coordinator accepts as an opaque unit to
/// schedule; builder internals are never inspected beyond the resulting
/// graph. The builder populates the flow but does not seal it.
pub trait FlowBuilder: Send {
    /// Populate the given flow with nodes and edges
    fn build(&self, flow: &mut Flow) -> Result<()>;
}

impl<F> FlowBuilder for F
where
    F: Fn(&mut Flow) -> Result<()> + Send,
{
    fn build(&self, flow: &mut Flow) -> Result<()> {
        self(flow)
    }
}

/// Name-to-codelet lookup standing in for a pluggable loader
///
/// Flows reference codelets by name; the catalog is consulted when a flow is
/// created so unresolvable names fail at submission rather than on a worker.
#[derive(Clone, Default)]
pub struct CodeletCatalog {
    entries: HashMap<String, Arc<dyn Codelet>>,
}

impl CodeletCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codelet under a name, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, codelet: Arc<dyn Codelet>) {
        self.entries.insert(name.into(), codelet);
    }

    /// Resolve a codelet by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Codelet>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::CodeletNotFound(name.to_string()))
    }

    /// Whether a name resolves
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Verify that every node of a flow references a registered codelet
    pub fn validate(&self, flow: &Flow) -> Result<()> {
        for node in flow.nodes() {
            if !self.contains(node.codelet()) {
                return Err(FlowError::CodeletNotFound(node.codelet().to_string()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CodeletCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeletCatalog")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
