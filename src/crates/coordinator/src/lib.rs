//! Orchestration actor for codeflow graphs
//!
//! This crate drives submitted [`Flow`](codeflow_core::Flow)s across a pool
//! of remote worker sessions. One tokio task (the coordinator actor) owns
//! every flow, countdown, and session record; external callers and transport
//! adapters only ever enqueue events onto its single command queue and await
//! oneshot result slots, so no locks guard the graph itself.
//!
//! ## Moving parts
//!
//! - [`Coordinator`] / [`CoordinatorHandle`]: the actor task and its
//!   request/response facade
//! - [`session`]: the per-connection protocol state machine
//!   (`Idle → Wait → Resource → … → Execute → Wait`)
//! - [`state_table`]: the explicit `(status, event)` dispatch table, checked
//!   exhaustively at construction
//! - [`broadcaster`]: bounded fan-out of lifecycle events to subscribers
//! - [`FlowProxy`]: a snapshot-consistent external handle to a live flow
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coordinator::{Coordinator, CoordinatorConfig};
//! use codeflow_core::{CodeletCatalog, HandleEdge, F_ALL};
//! use serde_json::json;
//!
//! # async fn example() -> coordinator::Result<()> {
//! let handle = Coordinator::spawn(CoordinatorConfig::default());
//!
//! let proxy = handle
//!     .create_flow("etl", |flow: &mut codeflow_core::Flow| -> codeflow_core::Result<()> {
//!         let a = flow.add_node("extract", json!({}));
//!         let b = flow.add_node("load", json!({}));
//!         flow.add_handle_edge(HandleEdge::new(a, b).with_name("rows"))?;
//!         Ok(())
//!     }, CodeletCatalog::new(), F_ALL)
//!     .await?;
//!
//! proxy.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod config;
pub mod control;
pub mod logic;
pub mod processor;
pub mod proxy;
pub mod session;
pub mod state_table;

use thiserror::Error;
use uuid::Uuid;

pub use broadcaster::FlowEventBroadcaster;
pub use config::{CoordinatorConfig, RetryPolicy};
pub use control::{Request, Response, SessionEvent, SessionId};
pub use processor::{Coordinator, CoordinatorHandle};
pub use proxy::FlowProxy;
pub use session::{ClientState, ClientStatus, Directive};
pub use state_table::{ClientAction, ClientEventKind, ClientStateTable};

/// Errors surfaced by the coordinator facade
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The actor task has exited; no further commands are accepted
    #[error("The processing thread has exited")]
    ProcessorTerminated,

    /// The referenced flow is not (or no longer) known to the coordinator
    #[error("Flow {0} not found")]
    FlowNotFound(Uuid),

    /// The flow failed terminally before completing
    #[error("Flow {flow} failed: {cause}")]
    FlowFailed {
        /// The failed flow
        flow: Uuid,
        /// Failure cause propagated from the failing node
        cause: String,
    },

    /// The flow was purged while callers were waiting on it
    #[error("Flow {0} was purged")]
    FlowPurged(Uuid),

    /// Graph construction or validation error
    #[error(transparent)]
    Flow(#[from] codeflow_core::FlowError),
}

/// Convenience result type using [`CoordinatorError`]
pub type Result<T> = std::result::Result<T, CoordinatorError>;
