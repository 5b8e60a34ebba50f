//! Per-connection client session records and the protocol status enum
//!
//! One [`ClientState`] exists per live worker connection. Network I/O runs on
//! its own context (the transport adapter); the record here is owned and
//! mutated exclusively by the coordinator actor. The server side drives the
//! worker by sending [`Directive`]s over the session's outbox; wire framing
//! is the transport's concern.

use std::fmt;
use std::time::Instant;

use codeflow_core::{FlowNodeId, Resource};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::control::SessionId;

/// Protocol status of a worker session
///
/// `Idle → Wait → Resource → ResourceAck → Prepare → PrepareAck → Execute`,
/// looping back to `Wait` on execute-ack. End-of-stream and error tear the
/// session down from any post-`Idle` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientStatus {
    /// Connected, address not yet announced; not schedulable
    Idle,
    /// Registered and eligible for assignment
    Wait,
    /// Assigned a flow node; fetching declared input resources
    Resource,
    /// Resources staged; waiting for the replica group's barrier
    ResourceAck,
    /// Staging the codelet and inputs
    Prepare,
    /// Preparation done; waiting for the replica group's barrier
    PrepareAck,
    /// Running the codelet
    Execute,
}

impl ClientStatus {
    /// All declared statuses, in protocol order
    pub const ALL: [ClientStatus; 7] = [
        ClientStatus::Idle,
        ClientStatus::Wait,
        ClientStatus::Resource,
        ClientStatus::ResourceAck,
        ClientStatus::Prepare,
        ClientStatus::PrepareAck,
        ClientStatus::Execute,
    ];

    /// Whether a phase deadline is armed in this status
    pub fn has_deadline(&self) -> bool {
        matches!(
            self,
            ClientStatus::Resource | ClientStatus::Prepare | ClientStatus::Execute
        )
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Idle => "Idle",
            ClientStatus::Wait => "Wait",
            ClientStatus::Resource => "Resource",
            ClientStatus::ResourceAck => "ResourceAck",
            ClientStatus::Prepare => "Prepare",
            ClientStatus::PrepareAck => "PrepareAck",
            ClientStatus::Execute => "Execute",
        };
        write!(f, "{}", s)
    }
}

/// Server-to-worker instruction delivered over the session outbox
///
/// The transport adapter encodes these onto the wire however it likes.
#[derive(Debug, Clone)]
pub enum Directive {
    /// Fetch the declared input resources and stage the declared outputs
    AcquireResources {
        /// Flow node being executed on this session
        node: FlowNodeId,
        /// Ordered input resources
        inputs: Vec<Resource>,
        /// Ordered output resources
        outputs: Vec<Resource>,
    },
    /// Stage the codelet and its parameter document
    Prepare {
        /// Codelet name resolved through the catalog
        codelet: String,
        /// Parameter document
        parameters: Value,
    },
    /// Begin execution
    Execute,
    /// Discard partial state for the current phase; a sibling replica failed
    Reset,
    /// Close the connection
    Close,
}

/// Actor-owned record for one worker connection
#[derive(Debug)]
pub struct ClientState {
    /// Session identity, shared with the transport adapter
    pub id: SessionId,
    /// Current protocol status
    pub status: ClientStatus,
    /// Announced address, if past `Idle` (host, port)
    pub address: Option<(String, u16)>,
    /// Flow node currently bound to this connection
    pub assigned: Option<(Uuid, FlowNodeId)>,
    /// Wall-clock deadline for the current phase, if armed
    pub deadline: Option<Instant>,
    outbox: mpsc::UnboundedSender<Directive>,
}

impl ClientState {
    /// Create a fresh `Idle` session around a directive outbox
    pub fn new(id: SessionId, outbox: mpsc::UnboundedSender<Directive>) -> Self {
        Self {
            id,
            status: ClientStatus::Idle,
            address: None,
            assigned: None,
            deadline: None,
            outbox,
        }
    }

    /// Send a directive to the worker; a closed outbox is logged, not fatal
    /// (the end-of-stream for that connection is already in flight)
    pub fn send(&self, directive: Directive) {
        if self.outbox.send(directive).is_err() {
            tracing::debug!(session = %self.id, "Directive dropped; session outbox closed");
        }
    }

    /// Release any flow node binding and clear the phase deadline
    pub fn release(&mut self) {
        self.assigned = None;
        self.deadline = None;
    }

    /// Whether this session can be handed new work
    pub fn is_assignable(&self) -> bool {
        self.status == ClientStatus::Wait && self.assigned.is_none()
    }
}
