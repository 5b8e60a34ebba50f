//! # codeflow-core - Flow Graph Model for Distributed Job Execution
//!
//! Core data structures for the codeflow orchestrator: clients submit a
//! directed acyclic graph of computation units ("codelets"); the coordinator
//! crate schedules that graph across a pool of remote worker connections.
//!
//! ## Core Concepts
//!
//! ### 1. Flow - The Submitted DAG
//!
//! A [`Flow`] owns its nodes and edges as an index-addressed arena. It is
//! built by a [`FlowBuilder`], [sealed](Flow::seal) to derive scheduling
//! structure, and from then on mutated only by the coordinator actor.
//!
//! ### 2. Logical Nodes - Replica Equivalence Classes
//!
//! Interchangeable [`FlowNode`] replicas of one logical step are grouped into
//! a [`LogicalNode`], the unit of phase scheduling. Sealing assigns each
//! logical node a DFS `order` (strictly increasing along every edge) and a
//! longest-path `depth` used to prioritize shallower work.
//!
//! ### 3. Countdown Barriers
//!
//! A [`Countdown`] is a resettable join over a set of principals, satisfied
//! when empty. Each logical node carries one over its predecessors (gating
//! promotion out of `Pending`) and one over its members (gating phase
//! advancement).
//!
//! ### 4. Lifecycle Events
//!
//! The coordinator publishes [`FlowEvent`]s (flow/node begin, end, error) to
//! subscriber queues; interest bitmasks ([`F_FLOW`], [`F_FLOW_NODE`]) filter
//! categories per flow.
//!
//! ## Quick Start
//!
//! ```rust
//! use codeflow_core::{Flow, HandleEdge};
//! use serde_json::json;
//!
//! let mut flow = Flow::new("etl");
//! let extract = flow.add_node("extract", json!({"url": "..."}));
//! let extract2 = flow.add_replica(extract).unwrap();
//! let load = flow.add_node("load", json!({}));
//!
//! flow.add_handle_edge(HandleEdge::new(extract, load).with_name("rows")).unwrap();
//! flow.add_handle_edge(HandleEdge::new(extract2, load).with_name("rows")).unwrap();
//! flow.seal().unwrap();
//!
//! assert!(flow.is_sealed());
//! ```

pub mod codelet;
pub mod countdown;
pub mod error;
pub mod event;
pub mod flow;
pub mod render;

pub use codelet::{Codelet, CodeletCatalog, CodeletError, FlowBuilder};
pub use countdown::Countdown;
pub use error::{FlowError, Result};
pub use event::{FlowEvent, FlowEventKind, F_ALL, F_FLOW, F_FLOW_NODE};
pub use flow::{
    downstream_of, DummyEdge, EdgeId, Flow, FlowEdge, FlowNode, FlowNodeId, HandleEdge,
    LogicalEdge, LogicalNode, LogicalNodeId, LogicalNodeStatus, Resource,
};
pub use render::render_dot;
