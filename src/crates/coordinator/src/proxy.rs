//! Snapshot-consistent external handle to a live flow
//!
//! A [`FlowProxy`] never aliases coordinator-owned state: it holds an
//! independent [`Flow`] snapshot that is only replaced wholesale by
//! [`refresh`](FlowProxy::refresh). Readers see one consistent graph per
//! snapshot, and mutating the live flow never tears a proxy mid-read.

use codeflow_core::{render_dot, Flow};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::processor::CoordinatorHandle;
use crate::Result;

/// External handle to a flow owned by the coordinator actor
pub struct FlowProxy {
    handle: CoordinatorHandle,
    flow_id: Uuid,
    flags: u32,
    snapshot: RwLock<Flow>,
}

impl FlowProxy {
    pub(crate) fn new(handle: CoordinatorHandle, snapshot: Flow, flags: u32) -> Self {
        Self {
            handle,
            flow_id: snapshot.id(),
            flags,
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Identity of the proxied flow
    pub fn id(&self) -> Uuid {
        self.flow_id
    }

    /// Lifecycle event interest bitmask registered for this flow
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Replace the held snapshot with a fresh one from the actor
    pub async fn refresh(&self) -> Result<()> {
        let fresh = self.handle.flow_proxy(self.flow_id).await?;
        let snapshot = fresh.snapshot.into_inner();
        *self.snapshot.write() = snapshot;
        Ok(())
    }

    /// Remove the flow from the coordinator, resetting bound sessions
    pub async fn purge(&self) -> Result<()> {
        self.handle.purge_flow(self.flow_id).await
    }

    /// Resolve once the flow finishes; fails if it failed or was purged
    pub async fn wait(&self) -> Result<()> {
        self.handle.await_flow(self.flow_id).await
    }

    /// Sessions needed to saturate this flow's schedulable work
    pub async fn pending_count(&self) -> Result<usize> {
        self.handle.flow_pending_count(self.flow_id).await
    }

    /// Read against the held snapshot
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&Flow) -> R) -> R {
        f(&self.snapshot.read())
    }

    /// Whether the held snapshot shows every logical node finished
    pub fn is_finished(&self) -> bool {
        self.snapshot.read().is_finished()
    }

    /// Whether the held snapshot shows a terminal failure
    pub fn has_failed(&self) -> bool {
        self.snapshot.read().has_failed()
    }

    /// Render the held snapshot as a Graphviz dot document
    pub fn to_dot(&self) -> String {
        render_dot(&self.snapshot.read())
    }
}

impl std::fmt::Debug for FlowProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowProxy")
            .field("flow_id", &self.flow_id)
            .field("flags", &self.flags)
            .finish()
    }
}
