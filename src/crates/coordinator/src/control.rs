//! Control events flowing through the coordinator's single inbound queue
//!
//! Everything that can change coordinator state arrives here: session
//! protocol events delivered by transport adapters, internal request events
//! carrying a result slot, the periodic refresh tick, and shutdown. Events
//! are processed strictly in arrival order.

use codeflow_core::{CodeletCatalog, Flow, FlowBuilder, FlowEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::Directive;
use crate::state_table::ClientEventKind;

/// Identity of a worker session, shared with its transport adapter
pub type SessionId = Uuid;

/// Correlates a request event with its registered result slot
pub type RequestId = u64;

/// A protocol event reported by (or synthesized for) one worker session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The worker announced its address; it becomes schedulable
    Address {
        /// Announced host
        host: String,
        /// Announced port
        port: u16,
    },
    /// All declared input resources are staged
    ResourceAck,
    /// Codelet and resources are staged
    PrepareAck,
    /// The assigned unit completed successfully
    ExecuteAck,
    /// A streamed chunk passed through during execution; no state change
    Data {
        /// Logical name of the chunk
        name: String,
        /// Chunk size in bytes
        size: usize,
    },
    /// The worker confirmed discarding partial state for the current phase
    Reset,
    /// The worker reported an application error (codelet/resource failure)
    Error {
        /// Error description from the worker
        message: String,
    },
    /// The connection closed or the stream became unreadable
    EndOfStream,
    /// Synthesized by the refresh tick when a phase deadline fires
    Timeout,
}

impl SessionEvent {
    /// The dispatch-table key for this event
    pub fn kind(&self) -> ClientEventKind {
        match self {
            SessionEvent::Address { .. } => ClientEventKind::Address,
            SessionEvent::ResourceAck => ClientEventKind::ResourceAck,
            SessionEvent::PrepareAck => ClientEventKind::PrepareAck,
            SessionEvent::ExecuteAck => ClientEventKind::ExecuteAck,
            SessionEvent::Data { .. } => ClientEventKind::Data,
            SessionEvent::Reset => ClientEventKind::Reset,
            SessionEvent::Error { .. } => ClientEventKind::Error,
            SessionEvent::EndOfStream => ClientEventKind::EndOfStream,
            SessionEvent::Timeout => ClientEventKind::Timeout,
        }
    }
}

/// A command issued through the request/response facade
pub enum Request {
    /// Build, validate, seal, and start scheduling a new flow
    CreateFlow {
        /// Flow name
        name: String,
        /// Graph producer, accepted as an opaque unit
        builder: Box<dyn FlowBuilder>,
        /// Codelet resolver the flow's node references are validated against
        catalog: CodeletCatalog,
        /// Lifecycle event interest bitmask for this flow
        flags: u32,
    },
    /// Remove a flow, resetting any sessions bound to it
    PurgeFlow {
        /// Flow to purge
        flow: Uuid,
    },
    /// Produce fresh snapshots of live flows
    GetFlowProxy {
        /// Flow to snapshot; `None` snapshots every live flow
        flow: Option<Uuid>,
    },
    /// Sessions needed to saturate all currently-schedulable work
    GetPendingCount,
    /// Sessions needed to saturate one flow's schedulable work
    GetFlowPendingCount {
        /// Flow to count for
        flow: Uuid,
    },
    /// Hand out a lifecycle event subscription queue
    CreateSubscriberQueue,
    /// Toggle the idle-session disconnect policy
    SetAutocloseIdle(bool),
    /// Pause promotion and timeout enforcement
    Suspend,
    /// Resume promotion and timeout enforcement
    Resume,
    /// Resolve when the flow reaches a terminal state
    AwaitFlow {
        /// Flow to wait on
        flow: Uuid,
    },
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Request::CreateFlow { name, .. } => return write!(f, "CreateFlow({})", name),
            Request::PurgeFlow { flow } => return write!(f, "PurgeFlow({})", flow),
            Request::GetFlowProxy { flow } => return write!(f, "GetFlowProxy({:?})", flow),
            Request::GetPendingCount => "GetPendingCount",
            Request::GetFlowPendingCount { flow } => {
                return write!(f, "GetFlowPendingCount({})", flow)
            }
            Request::CreateSubscriberQueue => "CreateSubscriberQueue",
            Request::SetAutocloseIdle(_) => "SetAutocloseIdle",
            Request::Suspend => "Suspend",
            Request::Resume => "Resume",
            Request::AwaitFlow { flow } => return write!(f, "AwaitFlow({})", flow),
        };
        write!(f, "{}", name)
    }
}

/// Result payload of a fulfilled request
#[derive(Debug)]
pub enum Response {
    /// The request completed with nothing to return
    Ack,
    /// A flow snapshot plus its interest flags
    Proxy {
        /// Snapshot of the flow at fulfillment time
        snapshot: Flow,
        /// Interest bitmask registered for the flow
        flags: u32,
    },
    /// Snapshots of the selected live flows, each with its interest flags
    Proxies(Vec<(Flow, u32)>),
    /// A pending-count result
    Count(usize),
    /// A fresh lifecycle event subscription
    Subscription(mpsc::Receiver<FlowEvent>),
}

/// An event on the coordinator's inbound queue
pub(crate) enum ControlEvent {
    /// Periodic scheduling tick (also injectable through the facade)
    Refresh,
    /// A facade request with its registered result slot id
    Request {
        id: RequestId,
        request: Request,
    },
    /// A new worker connection with its directive outbox
    Connect {
        session: SessionId,
        outbox: mpsc::UnboundedSender<Directive>,
    },
    /// A protocol event for one session
    Session {
        session: SessionId,
        event: SessionEvent,
    },
    /// Stop the actor; outstanding requests are failed
    Shutdown,
}
