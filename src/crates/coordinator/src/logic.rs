//! Scheduling logic executed on the coordinator actor
//!
//! Every method here runs on the single actor task: no handler blocks, and
//! the flow graphs, countdowns, and session map are mutated nowhere else.
//! Session protocol events are routed through the
//! [`ClientStateTable`](crate::state_table::ClientStateTable); internal
//! requests arrive pre-validated from the processor loop.
//!
//! The two-level state machine lives here:
//!
//! - per-session: `Idle → Wait → Resource → … → Execute → Wait`
//! - per-logical-node: `Pending → Resource → Prepare → Execute → Finished`
//!
//! A single session's flakiness never corrupts a barrier count because the
//! client countdown is re-armed from the live member set on every phase
//! change rather than decremented permanently.

use std::collections::HashMap;
use std::time::Instant;

use codeflow_core::{
    Flow, FlowEvent, FlowEventKind, FlowNodeId, LogicalNodeId, LogicalNodeStatus,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::broadcaster::FlowEventBroadcaster;
use crate::config::CoordinatorConfig;
use crate::control::{Request, Response, SessionEvent, SessionId};
use crate::session::{ClientState, ClientStatus, Directive};
use crate::state_table::{ClientAction, ClientStateTable};
use crate::{CoordinatorError, Result};

/// Result slot for one facade request
pub(crate) type Reply = oneshot::Sender<Result<Response>>;

/// Actor-side record for one live flow
struct FlowState {
    flow: Flow,
    flags: u32,
    waiters: Vec<Reply>,
}

/// The coordinator's single-threaded scheduling core
pub struct ServerLogic {
    config: CoordinatorConfig,
    table: ClientStateTable,
    flows: HashMap<Uuid, FlowState>,
    sessions: HashMap<SessionId, ClientState>,
    broadcaster: FlowEventBroadcaster,
    suspended: bool,
    autoclose_idle: bool,
}

impl ServerLogic {
    pub(crate) fn new(config: CoordinatorConfig) -> Self {
        let broadcaster = FlowEventBroadcaster::new(config.event_queue_capacity);
        let autoclose_idle = config.autoclose_idle;
        Self {
            config,
            table: ClientStateTable::new(),
            flows: HashMap::new(),
            sessions: HashMap::new(),
            broadcaster,
            suspended: false,
            autoclose_idle,
        }
    }

    // ------------------------------------------------------------------
    // Internal logic
    // ------------------------------------------------------------------

    /// Periodic tick: enforce deadlines, promote barrier-satisfied nodes,
    /// assign idle sessions to eligible work
    pub(crate) fn handle_refresh(&mut self) {
        if self.suspended {
            return;
        }
        self.check_timeouts();
        self.promote_and_assign();
    }

    pub(crate) fn handle_request(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::CreateFlow {
                name,
                builder,
                catalog,
                flags,
            } => self.handle_create_flow(name, builder, catalog, flags),
            Request::PurgeFlow { flow } => self.handle_purge_flow(flow),
            Request::GetFlowProxy { flow } => self.handle_get_flow_proxy(flow),
            Request::GetPendingCount => Ok(Response::Count(self.pending_count(None))),
            Request::GetFlowPendingCount { flow } => {
                if !self.flows.contains_key(&flow) {
                    return Err(CoordinatorError::FlowNotFound(flow));
                }
                Ok(Response::Count(self.pending_count(Some(flow))))
            }
            Request::CreateSubscriberQueue => {
                Ok(Response::Subscription(self.broadcaster.subscribe()))
            }
            Request::SetAutocloseIdle(on) => {
                self.autoclose_idle = on;
                Ok(Response::Ack)
            }
            Request::Suspend => {
                self.suspended = true;
                tracing::info!("Coordinator suspended");
                Ok(Response::Ack)
            }
            Request::Resume => {
                self.suspended = false;
                // Deadlines armed before the suspension would fire
                // immediately; extend them from now.
                let deadline = Instant::now() + self.config.phase_timeout();
                for cs in self.sessions.values_mut() {
                    if cs.deadline.is_some() {
                        cs.deadline = Some(deadline);
                    }
                }
                tracing::info!("Coordinator resumed");
                Ok(Response::Ack)
            }
            Request::AwaitFlow { .. } => {
                unreachable!("AwaitFlow is dispatched through handle_await")
            }
        }
    }

    fn handle_create_flow(
        &mut self,
        name: String,
        builder: Box<dyn codeflow_core::FlowBuilder>,
        catalog: codeflow_core::CodeletCatalog,
        flags: u32,
    ) -> Result<Response> {
        let mut flow = Flow::new(name);
        builder.build(&mut flow)?;
        catalog.validate(&flow)?;
        flow.seal()?;

        let fid = flow.id();
        tracing::info!(flow = %fid, name = %flow.name(), nodes = flow.node_count(), "Flow created");

        self.publish(
            flags,
            FlowEvent::new(
                FlowEventKind::FlowBegin,
                fid,
                flow.attachment.clone(),
                None,
                None,
            ),
        );

        self.flows.insert(
            fid,
            FlowState {
                flow,
                flags,
                waiters: Vec::new(),
            },
        );

        // Start scheduling immediately rather than waiting for the tick.
        self.promote_and_assign();

        let fs = &self.flows[&fid];
        Ok(Response::Proxy {
            snapshot: fs.flow.snapshot(),
            flags,
        })
    }

    fn handle_purge_flow(&mut self, fid: Uuid) -> Result<Response> {
        let mut fs = self
            .flows
            .remove(&fid)
            .ok_or(CoordinatorError::FlowNotFound(fid))?;

        // Forcibly reset every session bound to the purged flow.
        let mut released = 0usize;
        for cs in self.sessions.values_mut() {
            if matches!(cs.assigned, Some((f, _)) if f == fid) {
                cs.send(Directive::Reset);
                cs.release();
                cs.status = ClientStatus::Wait;
                released += 1;
            }
        }

        for waiter in fs.waiters.drain(..) {
            let _ = waiter.send(Err(CoordinatorError::FlowPurged(fid)));
        }

        tracing::info!(flow = %fid, released, "Flow purged");

        // Freed sessions may immediately serve other flows.
        self.promote_and_assign();
        Ok(Response::Ack)
    }

    fn handle_get_flow_proxy(&mut self, fid: Option<Uuid>) -> Result<Response> {
        let snapshots = match fid {
            Some(fid) => {
                let fs = self
                    .flows
                    .get(&fid)
                    .ok_or(CoordinatorError::FlowNotFound(fid))?;
                vec![(fs.flow.snapshot(), fs.flags)]
            }
            None => {
                let mut all: Vec<(Flow, u32)> = self
                    .flows
                    .values()
                    .map(|fs| (fs.flow.snapshot(), fs.flags))
                    .collect();
                all.sort_by_key(|(flow, _)| flow.id());
                all
            }
        };
        Ok(Response::Proxies(snapshots))
    }

    /// Park or immediately resolve a completion waiter
    pub(crate) fn handle_await(&mut self, fid: Uuid, reply: Reply) {
        match self.flows.get_mut(&fid) {
            None => {
                let _ = reply.send(Err(CoordinatorError::FlowNotFound(fid)));
            }
            Some(fs) if fs.flow.is_finished() => {
                let _ = reply.send(Ok(Response::Ack));
            }
            Some(fs) if fs.flow.has_failed() => {
                let _ = reply.send(Err(CoordinatorError::FlowFailed {
                    flow: fid,
                    cause: "flow has failed".to_string(),
                }));
            }
            Some(fs) => fs.waiters.push(reply),
        }
    }

    /// Additional sessions required to saturate currently-schedulable work
    ///
    /// Counts unassigned members of logical nodes sitting in the `Resource`
    /// phase (work assignable right now), less sessions already idle in
    /// `Wait`.
    fn pending_count(&self, only: Option<Uuid>) -> usize {
        let mut needed = 0usize;
        for (fid, fs) in &self.flows {
            if matches!(only, Some(f) if f != *fid) {
                continue;
            }
            for logical in fs.flow.logicals() {
                if logical.status != LogicalNodeStatus::Resource {
                    continue;
                }
                needed += logical
                    .members()
                    .iter()
                    .filter(|m| {
                        fs.flow
                            .node(**m)
                            .map(|n| n.assigned_session.is_none())
                            .unwrap_or(false)
                    })
                    .count();
            }
        }
        let idle = self.sessions.values().filter(|c| c.is_assignable()).count();
        needed.saturating_sub(idle)
    }

    /// Fail every parked waiter; called once when the actor exits
    pub(crate) fn fail_all_waiters(&mut self) {
        for fs in self.flows.values_mut() {
            for waiter in fs.waiters.drain(..) {
                let _ = waiter.send(Err(CoordinatorError::ProcessorTerminated));
            }
        }
    }

    // ------------------------------------------------------------------
    // Session logic
    // ------------------------------------------------------------------

    /// Register a new connection in `Idle`
    pub(crate) fn handle_connect(
        &mut self,
        session: SessionId,
        outbox: mpsc::UnboundedSender<Directive>,
    ) {
        tracing::debug!(session = %session, "Session connected");
        self.sessions
            .insert(session, ClientState::new(session, outbox));
    }

    /// Route one session event through the dispatch table
    pub(crate) fn dispatch_session(&mut self, sid: SessionId, event: SessionEvent) {
        let Some(status) = self.sessions.get(&sid).map(|c| c.status) else {
            tracing::debug!(session = %sid, event = %event.kind(), "Event for unknown session dropped");
            return;
        };
        let kind = event.kind();
        match self.table.lookup(status, kind) {
            ClientAction::IdleToWait => {
                if let SessionEvent::Address { host, port } = event {
                    self.idle_to_wait(sid, host, port);
                }
            }
            ClientAction::ResourceToPrepare => self.phase_ack(sid, ClientStatus::ResourceAck),
            ClientAction::PrepareToExecute => self.phase_ack(sid, ClientStatus::PrepareAck),
            ClientAction::ExecuteToWait => self.execute_to_wait(sid),
            ClientAction::OnData => {
                if let SessionEvent::Data { name, size } = event {
                    self.on_data(sid, name, size);
                }
            }
            ClientAction::OnReset => self.on_reset(sid),
            ClientAction::OnError => {
                let message = match event {
                    SessionEvent::Error { message } => message,
                    _ => "error".to_string(),
                };
                self.on_failure(sid, message);
            }
            ClientAction::OnTimeout => {
                self.on_failure(sid, "phase deadline exceeded".to_string());
            }
            ClientAction::OnEndOfStream => self.on_end_of_stream(sid),
            ClientAction::Ignore => {
                tracing::trace!(session = %sid, status = %status, event = %kind, "Ignored by declaration");
            }
        }
    }

    fn idle_to_wait(&mut self, sid: SessionId, host: String, port: u16) {
        if let Some(cs) = self.sessions.get_mut(&sid) {
            tracing::info!(session = %sid, host = %host, port, "Session registered as schedulable");
            cs.address = Some((host, port));
            cs.status = ClientStatus::Wait;
        }
        self.promote_and_assign();
    }

    /// A member acknowledged the current phase; arrive on the client
    /// countdown and advance the whole replica group once it is satisfied
    fn phase_ack(&mut self, sid: SessionId, acked: ClientStatus) {
        let assigned = {
            let Some(cs) = self.sessions.get_mut(&sid) else { return };
            cs.status = acked;
            cs.deadline = None;
            cs.assigned
        };
        let Some((fid, nid)) = assigned else {
            tracing::warn!(session = %sid, "Phase ack from unassigned session");
            return;
        };

        let satisfied_at = {
            let Some(fs) = self.flows.get_mut(&fid) else { return };
            let Ok(node) = fs.flow.node(nid) else { return };
            let lid = node.logical();
            if fs.flow.logical_mut(lid).clients.arrive(&nid) {
                Some(lid)
            } else {
                None
            }
        };

        if let Some(lid) = satisfied_at {
            self.advance_phase(fid, lid);
        }
    }

    /// Promote a logical node whose phase barrier is satisfied and push the
    /// next phase to every member session
    fn advance_phase(&mut self, fid: Uuid, lid: LogicalNodeId) {
        struct Member {
            session: Option<Uuid>,
            codelet: String,
            parameters: Value,
            attachment: Value,
        }

        let (next, members, flags, flow_attachment) = {
            let Some(fs) = self.flows.get_mut(&fid) else { return };
            let current = fs.flow.logical(lid).status;
            let next = match current {
                LogicalNodeStatus::Resource => LogicalNodeStatus::Prepare,
                LogicalNodeStatus::Prepare => LogicalNodeStatus::Execute,
                other => {
                    tracing::warn!(flow = %fid, logical = %lid, status = %other, "Phase barrier satisfied outside a phase");
                    return;
                }
            };

            let member_ids: Vec<FlowNodeId> =
                fs.flow.logical(lid).members().iter().copied().collect();
            let members: Vec<Member> = member_ids
                .iter()
                .filter_map(|m| fs.flow.node(*m).ok())
                .map(|n| Member {
                    session: n.assigned_session,
                    codelet: n.codelet().to_string(),
                    parameters: n.parameters().clone(),
                    attachment: n.attachment.clone(),
                })
                .collect();

            let logical = fs.flow.logical_mut(lid);
            logical.status = next;
            logical.rearm_clients();

            (next, members, fs.flags, fs.flow.attachment.clone())
        };

        tracing::debug!(flow = %fid, logical = %lid, phase = %next, "Replica group advances");

        let deadline = Instant::now() + self.config.phase_timeout();
        for member in &members {
            let Some(sid) = member.session else { continue };
            let Some(cs) = self.sessions.get_mut(&sid) else { continue };
            match next {
                LogicalNodeStatus::Prepare => {
                    cs.status = ClientStatus::Prepare;
                    cs.deadline = Some(deadline);
                    cs.send(Directive::Prepare {
                        codelet: member.codelet.clone(),
                        parameters: member.parameters.clone(),
                    });
                }
                LogicalNodeStatus::Execute => {
                    cs.status = ClientStatus::Execute;
                    cs.deadline = Some(deadline);
                    cs.send(Directive::Execute);
                }
                _ => {}
            }
        }

        if next == LogicalNodeStatus::Execute {
            for member in &members {
                self.publish(
                    flags,
                    FlowEvent::new(
                        FlowEventKind::NodeBegin,
                        fid,
                        flow_attachment.clone(),
                        Some(member.attachment.clone()),
                        None,
                    ),
                );
            }
        }
    }

    /// A unit completed; the session returns to the assignable pool
    fn execute_to_wait(&mut self, sid: SessionId) {
        let assigned = {
            let Some(cs) = self.sessions.get_mut(&sid) else { return };
            cs.status = ClientStatus::Wait;
            let assigned = cs.assigned;
            cs.release();
            assigned
        };
        let Some((fid, nid)) = assigned else {
            tracing::warn!(session = %sid, "Execute ack from unassigned session");
            return;
        };

        let finished_at = {
            let Some(fs) = self.flows.get_mut(&fid) else { return };
            let Ok(node) = fs.flow.node_mut(nid) else { return };
            node.assigned_session = None;
            let lid = node.logical();
            if fs.flow.logical_mut(lid).clients.arrive(&nid) {
                Some(lid)
            } else {
                None
            }
        };

        if let Some(lid) = finished_at {
            self.finish_logical(fid, lid);
        }

        // The freed session is immediately eligible for reassignment.
        self.promote_and_assign();
    }

    /// All members completed execution: finish the logical node, notify
    /// successors' dependency countdowns, and resolve the flow if done
    fn finish_logical(&mut self, fid: Uuid, lid: LogicalNodeId) {
        let (flags, flow_attachment, node_attachments, flow_finished, waiters) = {
            let Some(fs) = self.flows.get_mut(&fid) else { return };
            fs.flow.logical_mut(lid).status = LogicalNodeStatus::Finished;

            let node_attachments: Vec<Value> = fs
                .flow
                .logical(lid)
                .members()
                .iter()
                .filter_map(|m| fs.flow.node(*m).ok())
                .map(|n| n.attachment.clone())
                .collect();

            let successors: Vec<LogicalNodeId> =
                fs.flow.logical(lid).out_edges().iter().map(|e| e.v).collect();
            for succ in successors {
                fs.flow.logical_mut(succ).dependencies.arrive(&lid);
            }

            let flow_finished = fs.flow.is_finished();
            let waiters = if flow_finished {
                fs.waiters.drain(..).collect()
            } else {
                Vec::new()
            };
            (
                fs.flags,
                fs.flow.attachment.clone(),
                node_attachments,
                flow_finished,
                waiters,
            )
        };

        tracing::info!(flow = %fid, logical = %lid, "Logical node finished");
        for attachment in node_attachments {
            self.publish(
                flags,
                FlowEvent::new(
                    FlowEventKind::NodeEnd,
                    fid,
                    flow_attachment.clone(),
                    Some(attachment),
                    None,
                ),
            );
        }

        if flow_finished {
            tracing::info!(flow = %fid, "Flow finished");
            self.publish(
                flags,
                FlowEvent::new(FlowEventKind::FlowEnd, fid, flow_attachment, None, None),
            );
            for waiter in waiters {
                let _ = waiter.send(Ok(Response::Ack));
            }
        }
    }

    /// A streamed chunk passed through the executing node; relay it to
    /// subscribers without touching scheduling state
    fn on_data(&mut self, sid: SessionId, name: String, size: usize) {
        let Some((fid, nid)) = self.sessions.get(&sid).and_then(|c| c.assigned) else {
            return;
        };
        tracing::debug!(session = %sid, flow = %fid, chunk = %name, size, "Data chunk during execution");
        let Some((flags, flow_attachment, node_attachment)) =
            self.flows.get(&fid).and_then(|fs| {
                let node = fs.flow.node(nid).ok()?;
                Some((fs.flags, fs.flow.attachment.clone(), node.attachment.clone()))
            })
        else {
            return;
        };
        self.publish(
            flags,
            FlowEvent::new(
                FlowEventKind::NodeData,
                fid,
                flow_attachment,
                Some(node_attachment),
                None,
            )
            .with_data(name, size),
        );
    }

    /// The worker confirmed discarding partial state; release its binding
    fn on_reset(&mut self, sid: SessionId) {
        let assigned = {
            let Some(cs) = self.sessions.get_mut(&sid) else { return };
            let assigned = cs.assigned;
            cs.release();
            cs.status = ClientStatus::Wait;
            assigned
        };
        if let Some((fid, nid)) = assigned {
            if let Some(fs) = self.flows.get_mut(&fid) {
                if let Ok(node) = fs.flow.node_mut(nid) {
                    if node.assigned_session == Some(sid) {
                        node.assigned_session = None;
                    }
                }
            }
        }
    }

    /// Application error or timeout: close the session and fail its node
    fn on_failure(&mut self, sid: SessionId, cause: String) {
        let assigned = self.sessions.get(&sid).and_then(|c| c.assigned);
        if let Some(cs) = self.sessions.remove(&sid) {
            tracing::warn!(session = %sid, cause = %cause, "Session failed");
            cs.send(Directive::Close);
        }
        if let Some((fid, nid)) = assigned {
            self.member_failure(fid, nid, cause);
        }
        self.promote_and_assign();
    }

    /// Connection closed: release in-flight work; a mid-phase loss is a
    /// member failure, an idle loss is not
    fn on_end_of_stream(&mut self, sid: SessionId) {
        let Some(cs) = self.sessions.remove(&sid) else { return };
        tracing::info!(session = %sid, status = %cs.status, "Session closed");

        let Some((fid, nid)) = cs.assigned else { return };
        let mid_phase = self
            .flows
            .get(&fid)
            .and_then(|fs| fs.flow.node(nid).ok().map(|n| n.logical()))
            .map(|lid| {
                self.flows
                    .get(&fid)
                    .map(|fs| fs.flow.logical(lid).status.is_phase())
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if mid_phase {
            self.member_failure(fid, nid, "end of stream".to_string());
        } else if let Some(fs) = self.flows.get_mut(&fid) {
            if let Ok(node) = fs.flow.node_mut(nid) {
                node.assigned_session = None;
            }
        }
        self.promote_and_assign();
    }

    /// A member failed before its phase barrier was satisfied: reset every
    /// sibling so the whole replica group restarts the phase together, then
    /// apply the retry policy
    fn member_failure(&mut self, fid: Uuid, nid: FlowNodeId, cause: String) {
        let (lid, flags, flow_attachment, node_attachment, member_sessions, terminal_failure, waiters) = {
            let Some(fs) = self.flows.get_mut(&fid) else { return };
            let Ok(node) = fs.flow.node(nid) else { return };
            let lid = node.logical();
            let node_attachment = node.attachment.clone();
            if fs.flow.logical(lid).status.is_terminal() {
                return;
            }

            // Unbind every member; remember which sessions to reset.
            let member_ids: Vec<FlowNodeId> =
                fs.flow.logical(lid).members().iter().copied().collect();
            let mut member_sessions = Vec::new();
            for m in member_ids {
                if let Ok(n) = fs.flow.node_mut(m) {
                    if let Some(s) = n.assigned_session.take() {
                        member_sessions.push(s);
                    }
                }
            }

            let max_attempts = self.config.retry.max_attempts;
            let logical = fs.flow.logical_mut(lid);
            logical.attempts += 1;
            let terminal_failure = logical.attempts >= max_attempts;
            if terminal_failure {
                logical.status = LogicalNodeStatus::Failed;
            } else {
                // Re-armed retry: back to resource acquisition with a fresh
                // barrier over the current member set.
                logical.status = LogicalNodeStatus::Resource;
                logical.rearm_clients();
            }

            let waiters = if terminal_failure {
                fs.waiters.drain(..).collect()
            } else {
                Vec::new()
            };
            (
                lid,
                fs.flags,
                fs.flow.attachment.clone(),
                node_attachment,
                member_sessions,
                terminal_failure,
                waiters,
            )
        };

        tracing::warn!(
            flow = %fid,
            logical = %lid,
            cause = %cause,
            terminal = terminal_failure,
            "Member failure"
        );

        // Reset fan-out: surviving siblings discard partial state (staged
        // resources included) and return to the assignable pool.
        for sid in member_sessions {
            let Some(cs) = self.sessions.get_mut(&sid) else { continue };
            cs.send(Directive::Reset);
            cs.release();
            cs.status = ClientStatus::Wait;
        }

        self.publish(
            flags,
            FlowEvent::new(
                FlowEventKind::NodeError,
                fid,
                flow_attachment.clone(),
                Some(node_attachment),
                Some(cause.clone()),
            ),
        );

        if terminal_failure {
            self.publish(
                flags,
                FlowEvent::new(
                    FlowEventKind::FlowError,
                    fid,
                    flow_attachment,
                    None,
                    Some(cause.clone()),
                ),
            );
            for waiter in waiters {
                let _ = waiter.send(Err(CoordinatorError::FlowFailed {
                    flow: fid,
                    cause: cause.clone(),
                }));
            }
        }
    }

    // ------------------------------------------------------------------
    // Promotion, assignment, timeouts
    // ------------------------------------------------------------------

    /// Synthesize timeout events for sessions whose phase deadline passed
    fn check_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|cs| {
                cs.status.has_deadline() && cs.deadline.map(|d| d <= now).unwrap_or(false)
            })
            .map(|cs| cs.id)
            .collect();
        for sid in expired {
            tracing::warn!(session = %sid, "Phase deadline exceeded");
            self.dispatch_session(sid, SessionEvent::Timeout);
        }
    }

    /// Promote barrier-satisfied pending nodes and assign idle sessions to
    /// unclaimed members, shallower work first
    fn promote_and_assign(&mut self) {
        if self.suspended {
            return;
        }
        // Promotion: dependency countdown satisfied lifts Pending into
        // Resource with a freshly armed client barrier.
        let flow_ids: Vec<Uuid> = self.flows.keys().copied().collect();
        for fid in &flow_ids {
            let Some(fs) = self.flows.get_mut(fid) else { continue };
            let promotable: Vec<LogicalNodeId> = fs
                .flow
                .logical_ids()
                .filter(|lid| {
                    let l = fs.flow.logical(*lid);
                    l.status == LogicalNodeStatus::Pending && l.dependencies.is_satisfied()
                })
                .collect();
            for lid in promotable {
                let logical = fs.flow.logical_mut(lid);
                logical.status = LogicalNodeStatus::Resource;
                logical.rearm_clients();
                tracing::debug!(flow = %fid, logical = %lid, "Promoted to resource acquisition");
            }
        }

        // Assignment: pair unclaimed members with idle sessions. Depth
        // breaks ties so scarce sessions go to shallower work; DFS order
        // keeps the choice deterministic.
        struct Candidate {
            fid: Uuid,
            nid: FlowNodeId,
            depth: usize,
            order: usize,
        }
        let mut candidates: Vec<Candidate> = Vec::new();
        for fid in &flow_ids {
            let Some(fs) = self.flows.get(fid) else { continue };
            for logical in fs.flow.logicals() {
                if logical.status != LogicalNodeStatus::Resource {
                    continue;
                }
                for m in logical.members() {
                    let Ok(node) = fs.flow.node(*m) else { continue };
                    if node.assigned_session.is_none() {
                        candidates.push(Candidate {
                            fid: *fid,
                            nid: *m,
                            depth: logical.depth(),
                            order: node.order(),
                        });
                    }
                }
            }
        }
        candidates.sort_by_key(|c| (c.depth, c.order));

        let mut idle: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|c| c.is_assignable())
            .map(|c| c.id)
            .collect();
        idle.sort();
        let mut idle = idle.into_iter();

        let mut unassigned = 0usize;
        for candidate in candidates {
            let Some(sid) = idle.next() else {
                unassigned += 1;
                continue;
            };
            self.assign(candidate.fid, candidate.nid, sid);
        }

        // Idle-session disconnect policy: once all schedulable work is
        // claimed, surplus Wait sessions may be closed.
        if self.autoclose_idle && unassigned == 0 {
            let surplus: Vec<SessionId> = self
                .sessions
                .values()
                .filter(|c| c.is_assignable())
                .map(|c| c.id)
                .collect();
            for sid in surplus {
                if let Some(cs) = self.sessions.remove(&sid) {
                    tracing::info!(session = %sid, "Autoclosing idle session");
                    cs.send(Directive::Close);
                }
            }
        }
    }

    /// Bind one flow node to one session and start resource acquisition
    fn assign(&mut self, fid: Uuid, nid: FlowNodeId, sid: SessionId) {
        let staged = {
            let Some(fs) = self.flows.get_mut(&fid) else { return };
            let inputs = match fs.flow.node_input_resources(nid) {
                Ok(r) => r,
                Err(_) => return,
            };
            let outputs = match fs.flow.node_output_resources(nid) {
                Ok(r) => r,
                Err(_) => return,
            };
            if let Ok(node) = fs.flow.node_mut(nid) {
                node.assigned_session = Some(sid);
            }
            (inputs, outputs)
        };

        let Some(cs) = self.sessions.get_mut(&sid) else { return };
        cs.assigned = Some((fid, nid));
        cs.status = ClientStatus::Resource;
        cs.deadline = Some(Instant::now() + self.config.phase_timeout());
        tracing::debug!(session = %sid, flow = %fid, node = %nid, "Node assigned");
        cs.send(Directive::AcquireResources {
            node: nid,
            inputs: staged.0,
            outputs: staged.1,
        });
    }

    fn publish(&mut self, flags: u32, event: FlowEvent) {
        if event.kind.interest_flag() & flags != 0 {
            self.broadcaster.post(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeflow_core::{CodeletCatalog, CodeletError, HandleEdge, Resource, F_ALL};
    use serde_json::json;

    struct Noop;

    impl codeflow_core::Codelet for Noop {
        fn run(
            &self,
            _inputs: &[Resource],
            _outputs: &[Resource],
            _parameters: &Value,
        ) -> std::result::Result<(), CodeletError> {
            Ok(())
        }
    }

    fn catalog(names: &[&str]) -> CodeletCatalog {
        let mut catalog = CodeletCatalog::new();
        for name in names {
            catalog.register(*name, std::sync::Arc::new(Noop));
        }
        catalog
    }

    fn create(logic: &mut ServerLogic, builder: impl codeflow_core::FlowBuilder + 'static, names: &[&str]) -> Flow {
        let response = logic
            .handle_request(Request::CreateFlow {
                name: "test".to_string(),
                builder: Box::new(builder),
                catalog: catalog(names),
                flags: F_ALL,
            })
            .unwrap();
        match response {
            Response::Proxy { snapshot, .. } => snapshot,
            other => panic!("unexpected response: {:?}", other),
        }
    }

    fn connect(logic: &mut ServerLogic) -> (SessionId, mpsc::UnboundedReceiver<Directive>) {
        let sid = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        logic.handle_connect(sid, tx);
        logic.dispatch_session(
            sid,
            SessionEvent::Address {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
        );
        (sid, rx)
    }

    #[test]
    fn creation_promotes_dependency_free_nodes() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let snapshot = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                let a = flow.add_node("a", json!({}));
                let b = flow.add_node("b", json!({}));
                flow.add_handle_edge(HandleEdge::new(a, b).with_name("ab"))?;
                Ok(())
            },
            &["a", "b"],
        );

        let statuses: Vec<LogicalNodeStatus> = snapshot.logicals().map(|l| l.status).collect();
        assert!(statuses.contains(&LogicalNodeStatus::Resource));
        assert!(statuses.contains(&LogicalNodeStatus::Pending));
        assert_eq!(logic.pending_count(None), 1);
    }

    #[test]
    fn single_worker_walks_the_full_phase_sequence() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let (sid, mut rx) = connect(&mut logic);
        let snapshot = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("only", json!({}));
                Ok(())
            },
            &["only"],
        );
        let fid = snapshot.id();

        assert!(matches!(
            rx.try_recv(),
            Ok(Directive::AcquireResources { .. })
        ));
        logic.dispatch_session(sid, SessionEvent::ResourceAck);
        assert!(matches!(rx.try_recv(), Ok(Directive::Prepare { .. })));
        logic.dispatch_session(sid, SessionEvent::PrepareAck);
        assert!(matches!(rx.try_recv(), Ok(Directive::Execute)));
        logic.dispatch_session(sid, SessionEvent::ExecuteAck);

        let (tx, mut done) = oneshot::channel();
        logic.handle_await(fid, tx);
        assert!(matches!(done.try_recv(), Ok(Ok(Response::Ack))));
    }

    #[test]
    fn error_before_barrier_fails_terminally_by_default() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let (w1, mut rx1) = connect(&mut logic);
        let (w2, mut rx2) = connect(&mut logic);
        let snapshot = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                let a = flow.add_node("stage", json!({}));
                flow.add_replica(a)?;
                Ok(())
            },
            &["stage"],
        );
        let fid = snapshot.id();

        assert!(matches!(
            rx1.try_recv(),
            Ok(Directive::AcquireResources { .. })
        ));
        assert!(matches!(
            rx2.try_recv(),
            Ok(Directive::AcquireResources { .. })
        ));

        logic.dispatch_session(w1, SessionEvent::ResourceAck);
        logic.dispatch_session(
            w2,
            SessionEvent::Error {
                message: "boom".to_string(),
            },
        );

        // Survivor gets the reset fan-out, failer gets closed.
        assert!(matches!(rx1.try_recv(), Ok(Directive::Reset)));
        assert!(matches!(rx2.try_recv(), Ok(Directive::Close)));

        let (tx, mut done) = oneshot::channel();
        logic.handle_await(fid, tx);
        assert!(matches!(
            done.try_recv(),
            Ok(Err(CoordinatorError::FlowFailed { .. }))
        ));
    }

    #[test]
    fn retry_rearms_the_group_at_resource() {
        let config = CoordinatorConfig {
            retry: crate::config::RetryPolicy { max_attempts: 2 },
            ..CoordinatorConfig::default()
        };
        let mut logic = ServerLogic::new(config);
        let (w1, mut rx1) = connect(&mut logic);
        create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("stage", json!({}));
                Ok(())
            },
            &["stage"],
        );

        assert!(matches!(
            rx1.try_recv(),
            Ok(Directive::AcquireResources { .. })
        ));
        logic.dispatch_session(
            w1,
            SessionEvent::Error {
                message: "transient".to_string(),
            },
        );
        assert!(matches!(rx1.try_recv(), Ok(Directive::Close)));

        // A replacement worker is assigned the re-armed attempt.
        let (_w2, mut rx2) = connect(&mut logic);
        assert!(matches!(
            rx2.try_recv(),
            Ok(Directive::AcquireResources { .. })
        ));
        assert_eq!(logic.pending_count(None), 0);
    }

    #[test]
    fn purge_fails_parked_waiters() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let snapshot = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("stage", json!({}));
                Ok(())
            },
            &["stage"],
        );
        let fid = snapshot.id();

        let (tx, mut done) = oneshot::channel();
        logic.handle_await(fid, tx);
        logic.handle_request(Request::PurgeFlow { flow: fid }).unwrap();
        assert!(matches!(
            done.try_recv(),
            Ok(Err(CoordinatorError::FlowPurged(_)))
        ));
        assert!(matches!(
            logic.handle_request(Request::GetFlowProxy { flow: Some(fid) }),
            Err(CoordinatorError::FlowNotFound(_))
        ));
    }

    #[test]
    fn proxy_listing_covers_every_live_flow() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let first = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("stage", json!({}));
                Ok(())
            },
            &["stage"],
        );
        let second = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("stage", json!({}));
                Ok(())
            },
            &["stage"],
        );

        let listed = match logic
            .handle_request(Request::GetFlowProxy { flow: None })
            .unwrap()
        {
            Response::Proxies(snapshots) => snapshots,
            other => panic!("unexpected response: {:?}", other),
        };
        let mut ids: Vec<Uuid> = listed.iter().map(|(flow, _)| flow.id()).collect();
        ids.sort();
        let mut expected = vec![first.id(), second.id()];
        expected.sort();
        assert_eq!(ids, expected);

        // Selecting one flow narrows the list to exactly that flow.
        let narrowed = match logic
            .handle_request(Request::GetFlowProxy { flow: Some(first.id()) })
            .unwrap()
        {
            Response::Proxies(snapshots) => snapshots,
            other => panic!("unexpected response: {:?}", other),
        };
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].0.id(), first.id());
    }

    #[test]
    fn data_chunks_are_relayed_to_subscribers() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let mut events = match logic.handle_request(Request::CreateSubscriberQueue).unwrap() {
            Response::Subscription(rx) => rx,
            other => panic!("unexpected response: {:?}", other),
        };
        let (sid, mut rx) = connect(&mut logic);
        create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("streamer", json!({}));
                Ok(())
            },
            &["streamer"],
        );

        assert!(matches!(
            rx.try_recv(),
            Ok(Directive::AcquireResources { .. })
        ));
        logic.dispatch_session(sid, SessionEvent::ResourceAck);
        assert!(matches!(rx.try_recv(), Ok(Directive::Prepare { .. })));
        logic.dispatch_session(sid, SessionEvent::PrepareAck);
        assert!(matches!(rx.try_recv(), Ok(Directive::Execute)));

        logic.dispatch_session(
            sid,
            SessionEvent::Data {
                name: "part-0".to_string(),
                size: 42,
            },
        );

        // The chunk surfaces as a node-level event and changes no state.
        let mut seen = None;
        while let Ok(event) = events.try_recv() {
            if event.kind == FlowEventKind::NodeData {
                seen = Some(event);
            }
        }
        let event = seen.expect("no data event published");
        assert_eq!(event.data, Some(("part-0".to_string(), 42)));
        assert!(rx.try_recv().is_err());

        logic.dispatch_session(sid, SessionEvent::ExecuteAck);
    }

    #[test]
    fn actor_exit_fails_every_waiter() {
        let mut logic = ServerLogic::new(CoordinatorConfig::default());
        let snapshot = create(
            &mut logic,
            |flow: &mut Flow| -> codeflow_core::Result<()> {
                flow.add_node("stage", json!({}));
                Ok(())
            },
            &["stage"],
        );

        let (tx, mut done) = oneshot::channel();
        logic.handle_await(snapshot.id(), tx);
        logic.fail_all_waiters();
        assert!(matches!(
            done.try_recv(),
            Ok(Err(CoordinatorError::ProcessorTerminated))
        ));
    }
}
