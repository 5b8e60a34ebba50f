//! Lifecycle event types published by the coordinator
//!
//! The coordinator posts one [`FlowEvent`] per flow/node begin, end, and
//! error transition. Subscribers receive events on their own bounded queue;
//! a proxy's interest bitmask decides which categories its owner causes to
//! be published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Interest flag: flow-level begin/end/error events
pub const F_FLOW: u32 = 1 << 0;

/// Interest flag: node-level begin/end/error events
pub const F_FLOW_NODE: u32 = 1 << 1;

/// Interest flag: everything
pub const F_ALL: u32 = F_FLOW | F_FLOW_NODE;

/// Category of a lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEventKind {
    /// A flow was accepted and entered scheduling
    FlowBegin,
    /// A flow reached successful completion
    FlowEnd,
    /// A flow failed terminally
    FlowError,
    /// A logical node began executing
    NodeBegin,
    /// A streamed data chunk passed through an executing node
    NodeData,
    /// A logical node finished
    NodeEnd,
    /// A logical node failed
    NodeError,
}

impl FlowEventKind {
    /// Whether this event is flow-level (as opposed to node-level)
    pub fn is_flow_level(&self) -> bool {
        matches!(
            self,
            FlowEventKind::FlowBegin | FlowEventKind::FlowEnd | FlowEventKind::FlowError
        )
    }

    /// The interest flag bit governing this event
    pub fn interest_flag(&self) -> u32 {
        if self.is_flow_level() {
            F_FLOW
        } else {
            F_FLOW_NODE
        }
    }
}

/// A lifecycle notification carrying caller attachments and an optional
/// failure cause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Event category
    pub kind: FlowEventKind,
    /// Flow the event belongs to
    pub flow_id: Uuid,
    /// Flow-level caller attachment
    pub flow_attachment: Value,
    /// Node-level caller attachment, for node events
    pub node_attachment: Option<Value>,
    /// Failure cause, for error events
    pub error: Option<String>,
    /// Chunk name and size, for data events
    pub data: Option<(String, usize)>,
    /// Wall-clock emission time
    pub at: DateTime<Utc>,
}

impl FlowEvent {
    /// Construct an event stamped with the current time
    pub fn new(
        kind: FlowEventKind,
        flow_id: Uuid,
        flow_attachment: Value,
        node_attachment: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Self {
            kind,
            flow_id,
            flow_attachment,
            node_attachment,
            error,
            data: None,
            at: Utc::now(),
        }
    }

    /// Attach a chunk name and size to a data event
    pub fn with_data(mut self, name: impl Into<String>, size: usize) -> Self {
        self.data = Some((name.into(), size));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_flags_partition_event_kinds() {
        assert_eq!(FlowEventKind::FlowBegin.interest_flag(), F_FLOW);
        assert_eq!(FlowEventKind::FlowError.interest_flag(), F_FLOW);
        assert_eq!(FlowEventKind::NodeBegin.interest_flag(), F_FLOW_NODE);
        assert_eq!(FlowEventKind::NodeData.interest_flag(), F_FLOW_NODE);
        assert_eq!(FlowEventKind::NodeError.interest_flag(), F_FLOW_NODE);
        assert_eq!(F_ALL, F_FLOW | F_FLOW_NODE);
    }
}
