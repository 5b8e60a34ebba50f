//! Explicit `(status, event)` dispatch table for the session state machine
//!
//! Every declared pair of [`ClientStatus`] and [`ClientEventKind`] maps to
//! either a handler action or an explicit ignore entry. The table is
//! validated exhaustively at construction: a missing or duplicate pair is a
//! programming error caught before the actor processes a single event, not a
//! runtime surprise.

use std::collections::HashMap;
use std::fmt;

use crate::session::ClientStatus;

/// Dispatch-table key: the kind of a session event, stripped of payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    /// Address announcement
    Address,
    /// Resource acquisition acknowledged
    ResourceAck,
    /// Preparation acknowledged
    PrepareAck,
    /// Execution acknowledged
    ExecuteAck,
    /// Streamed data chunk
    Data,
    /// Reset confirmation
    Reset,
    /// Application error
    Error,
    /// Connection closed
    EndOfStream,
    /// Phase deadline fired
    Timeout,
}

impl ClientEventKind {
    /// All declared event kinds
    pub const ALL: [ClientEventKind; 9] = [
        ClientEventKind::Address,
        ClientEventKind::ResourceAck,
        ClientEventKind::PrepareAck,
        ClientEventKind::ExecuteAck,
        ClientEventKind::Data,
        ClientEventKind::Reset,
        ClientEventKind::Error,
        ClientEventKind::EndOfStream,
        ClientEventKind::Timeout,
    ];
}

impl fmt::Display for ClientEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Handler selected by a table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    /// Register the session as schedulable
    IdleToWait,
    /// Arrive on the resource barrier; advance the group when satisfied
    ResourceToPrepare,
    /// Arrive on the prepare barrier; advance the group when satisfied
    PrepareToExecute,
    /// Unit completed; return the session to the assignable pool
    ExecuteToWait,
    /// Record a streamed chunk; no state change
    OnData,
    /// The worker confirmed a reset; release its binding
    OnReset,
    /// Fail the bound node and fan a reset out to phase siblings
    OnError,
    /// Deadline fired; handled identically to an error
    OnTimeout,
    /// Tear the session down, releasing in-flight work
    OnEndOfStream,
    /// Declared no-op for this pair
    Ignore,
}

use ClientAction::*;
use ClientEventKind as K;
use ClientStatus as S;

/// Handler transitions, one entry per meaningful `(status, event)` pair
const TRANSITIONS: &[(ClientStatus, ClientEventKind, ClientAction)] = &[
    (S::Idle, K::Address, IdleToWait),
    (S::Resource, K::ResourceAck, ResourceToPrepare),
    (S::Prepare, K::PrepareAck, PrepareToExecute),
    (S::Execute, K::ExecuteAck, ExecuteToWait),
    (S::Execute, K::Data, OnData),
    // Reset a session because one of its logical-node siblings failed.
    (S::Prepare, K::Reset, OnReset),
    (S::PrepareAck, K::Reset, OnReset),
    (S::Execute, K::Reset, OnReset),
    (S::Wait, K::Error, OnError),
    (S::Resource, K::Error, OnError),
    (S::ResourceAck, K::Error, OnError),
    (S::Prepare, K::Error, OnError),
    (S::PrepareAck, K::Error, OnError),
    (S::Execute, K::Error, OnError),
    (S::Resource, K::Timeout, OnTimeout),
    (S::Prepare, K::Timeout, OnTimeout),
    (S::Execute, K::Timeout, OnTimeout),
    (S::Idle, K::EndOfStream, OnEndOfStream),
    (S::Wait, K::EndOfStream, OnEndOfStream),
    (S::Resource, K::EndOfStream, OnEndOfStream),
    (S::ResourceAck, K::EndOfStream, OnEndOfStream),
    (S::Prepare, K::EndOfStream, OnEndOfStream),
    (S::PrepareAck, K::EndOfStream, OnEndOfStream),
    (S::Execute, K::EndOfStream, OnEndOfStream),
];

/// Pairs that are declared but deliberately do nothing
const IGNORED: &[(ClientStatus, ClientEventKind)] = &[
    (S::Wait, K::Address),
    (S::Resource, K::Address),
    (S::ResourceAck, K::Address),
    (S::Prepare, K::Address),
    (S::PrepareAck, K::Address),
    (S::Execute, K::Address),
    (S::Idle, K::ResourceAck),
    (S::Wait, K::ResourceAck),
    (S::ResourceAck, K::ResourceAck),
    (S::Prepare, K::ResourceAck),
    (S::PrepareAck, K::ResourceAck),
    (S::Execute, K::ResourceAck),
    (S::Idle, K::PrepareAck),
    (S::Wait, K::PrepareAck),
    (S::Resource, K::PrepareAck),
    (S::ResourceAck, K::PrepareAck),
    (S::PrepareAck, K::PrepareAck),
    (S::Execute, K::PrepareAck),
    (S::Idle, K::ExecuteAck),
    (S::Wait, K::ExecuteAck),
    (S::Resource, K::ExecuteAck),
    (S::ResourceAck, K::ExecuteAck),
    (S::Prepare, K::ExecuteAck),
    (S::PrepareAck, K::ExecuteAck),
    (S::Idle, K::Data),
    (S::Wait, K::Data),
    (S::Resource, K::Data),
    (S::ResourceAck, K::Data),
    (S::Prepare, K::Data),
    (S::PrepareAck, K::Data),
    (S::Idle, K::Reset),
    (S::Wait, K::Reset),
    (S::Resource, K::Reset),
    (S::ResourceAck, K::Reset),
    (S::Idle, K::Error),
    (S::Idle, K::Timeout),
    (S::Wait, K::Timeout),
    (S::ResourceAck, K::Timeout),
    (S::PrepareAck, K::Timeout),
];

/// The validated dispatch table
#[derive(Debug)]
pub struct ClientStateTable {
    entries: HashMap<(ClientStatus, ClientEventKind), ClientAction>,
}

impl ClientStateTable {
    /// Build and validate the table
    ///
    /// Panics if the declared entries do not cover every
    /// `(status, event kind)` pair exactly once. Construction happens once
    /// at actor startup, so an invalid table can never reach dispatch.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        for (status, kind, action) in TRANSITIONS {
            if entries.insert((*status, *kind), *action).is_some() {
                panic!("Duplicate transition for ({}, {})", status, kind);
            }
        }
        for (status, kind) in IGNORED {
            if entries.insert((*status, *kind), Ignore).is_some() {
                panic!("Duplicate transition for ({}, {})", status, kind);
            }
        }
        for status in ClientStatus::ALL {
            for kind in ClientEventKind::ALL {
                if !entries.contains_key(&(status, kind)) {
                    panic!("No transition declared for ({}, {})", status, kind);
                }
            }
        }
        Self { entries }
    }

    /// Look up the action for a `(status, event kind)` pair
    pub fn lookup(&self, status: ClientStatus, kind: ClientEventKind) -> ClientAction {
        // Exhaustiveness is established at construction.
        self.entries
            .get(&(status, kind))
            .copied()
            .unwrap_or(Ignore)
    }
}

impl Default for ClientStateTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_pair() {
        let table = ClientStateTable::new();
        assert_eq!(
            table.entries.len(),
            ClientStatus::ALL.len() * ClientEventKind::ALL.len()
        );
    }

    #[test]
    fn happy_path_transitions_resolve() {
        let table = ClientStateTable::new();
        assert_eq!(table.lookup(S::Idle, K::Address), IdleToWait);
        assert_eq!(table.lookup(S::Resource, K::ResourceAck), ResourceToPrepare);
        assert_eq!(table.lookup(S::Prepare, K::PrepareAck), PrepareToExecute);
        assert_eq!(table.lookup(S::Execute, K::ExecuteAck), ExecuteToWait);
        assert_eq!(table.lookup(S::Execute, K::Data), OnData);
    }

    #[test]
    fn failure_events_cover_active_states() {
        let table = ClientStateTable::new();
        for status in [S::Wait, S::Resource, S::ResourceAck, S::Prepare, S::PrepareAck, S::Execute] {
            assert_eq!(table.lookup(status, K::Error), OnError);
            assert_eq!(table.lookup(status, K::EndOfStream), OnEndOfStream);
        }
        for status in [S::Resource, S::Prepare, S::Execute] {
            assert_eq!(table.lookup(status, K::Timeout), OnTimeout);
        }
        for status in [S::Prepare, S::PrepareAck, S::Execute] {
            assert_eq!(table.lookup(status, K::Reset), OnReset);
        }
    }

    #[test]
    fn out_of_protocol_events_are_declared_ignores() {
        let table = ClientStateTable::new();
        assert_eq!(table.lookup(S::Wait, K::ExecuteAck), Ignore);
        assert_eq!(table.lookup(S::Idle, K::Timeout), Ignore);
        assert_eq!(table.lookup(S::Execute, K::Address), Ignore);
    }
}
