//! The coordinator actor task and its request/response facade
//!
//! [`Coordinator::spawn`] starts one tokio task that owns a [`ServerLogic`]
//! and drains the control queue in arrival order, interleaved with a periodic
//! refresh tick. The returned [`CoordinatorHandle`] is the only way in:
//! callers register a oneshot result slot, enqueue the request, and await the
//! slot. When the actor exits, every outstanding and future slot is failed
//! with [`CoordinatorError::ProcessorTerminated`], so no caller hangs on a
//! dead actor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use codeflow_core::{CodeletCatalog, FlowBuilder, FlowEvent};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::control::{ControlEvent, Request, RequestId, Response, SessionEvent, SessionId};
use crate::logic::{Reply, ServerLogic};
use crate::proxy::FlowProxy;
use crate::session::Directive;
use crate::{CoordinatorError, Result};

/// Result slots for in-flight facade requests
///
/// Slots are registered before the request is enqueued and taken exactly once
/// at fulfillment. `close_all` flips the registry closed and fails every
/// remaining slot, which is how callers learn the actor is gone.
struct RequestRegistry {
    closed: AtomicBool,
    next_id: AtomicU64,
    slots: Mutex<HashMap<RequestId, Reply>>,
}

impl RequestRegistry {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a slot; `None` once the registry is closed
    fn register(&self) -> Option<(RequestId, oneshot::Receiver<Result<Response>>)> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);
        if self.closed.load(Ordering::Acquire) {
            // Lost the race against close_all; fail the slot ourselves.
            if let Some(tx) = self.slots.lock().remove(&id) {
                let _ = tx.send(Err(CoordinatorError::ProcessorTerminated));
            }
        }
        Some((id, rx))
    }

    /// Take a registered slot out, if still present
    fn take(&self, id: RequestId) -> Option<Reply> {
        self.slots.lock().remove(&id)
    }

    /// Resolve a slot with a result
    fn fulfill(&self, id: RequestId, result: Result<Response>) {
        if let Some(tx) = self.take(id) {
            let _ = tx.send(result);
        }
    }

    /// Close the registry and fail every outstanding slot
    fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let slots: Vec<Reply> = {
            let mut guard = self.slots.lock();
            guard.drain().map(|(_, tx)| tx).collect()
        };
        for tx in slots {
            let _ = tx.send(Err(CoordinatorError::ProcessorTerminated));
        }
    }
}

/// Spawner for the coordinator actor
pub struct Coordinator;

impl Coordinator {
    /// Start the actor task and return its facade
    pub fn spawn(config: CoordinatorConfig) -> CoordinatorHandle {
        let (queue, inbox) = mpsc::unbounded_channel();
        let registry = Arc::new(RequestRegistry::new());
        let handle = CoordinatorHandle {
            queue,
            registry: Arc::clone(&registry),
        };
        tokio::spawn(run(config, inbox, registry));
        handle
    }
}

/// The actor loop: strictly ordered event processing plus the refresh tick
async fn run(
    config: CoordinatorConfig,
    mut inbox: mpsc::UnboundedReceiver<ControlEvent>,
    registry: Arc<RequestRegistry>,
) {
    let mut logic = ServerLogic::new(config.clone());
    let mut tick = tokio::time::interval(config.refresh_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => logic.handle_refresh(),
            event = inbox.recv() => match event {
                None | Some(ControlEvent::Shutdown) => break,
                Some(ControlEvent::Refresh) => logic.handle_refresh(),
                Some(ControlEvent::Connect { session, outbox }) => {
                    logic.handle_connect(session, outbox);
                }
                Some(ControlEvent::Session { session, event }) => {
                    logic.dispatch_session(session, event);
                }
                Some(ControlEvent::Request { id, request }) => match request {
                    // Completion waits park their slot on the flow instead of
                    // resolving inline.
                    Request::AwaitFlow { flow } => {
                        if let Some(reply) = registry.take(id) {
                            logic.handle_await(flow, reply);
                        }
                    }
                    other => {
                        let result = logic.handle_request(other);
                        registry.fulfill(id, result);
                    }
                },
            },
        }
    }

    tracing::info!("Coordinator actor exiting");
    logic.fail_all_waiters();
    registry.close_all();
}

/// Cloneable request/response facade over the coordinator actor
#[derive(Clone)]
pub struct CoordinatorHandle {
    queue: mpsc::UnboundedSender<ControlEvent>,
    registry: Arc<RequestRegistry>,
}

impl CoordinatorHandle {
    /// Enqueue a request and await its result slot
    pub async fn request(&self, request: Request) -> Result<Response> {
        let (id, rx) = self
            .registry
            .register()
            .ok_or(CoordinatorError::ProcessorTerminated)?;
        if self
            .queue
            .send(ControlEvent::Request { id, request })
            .is_err()
        {
            self.registry
                .fulfill(id, Err(CoordinatorError::ProcessorTerminated));
        }
        rx.await.map_err(|_| CoordinatorError::ProcessorTerminated)?
    }

    /// Build, validate, seal, and start scheduling a new flow
    ///
    /// Returns a [`FlowProxy`] wrapping the initial snapshot.
    pub async fn create_flow(
        &self,
        name: impl Into<String>,
        builder: impl FlowBuilder + 'static,
        catalog: CodeletCatalog,
        flags: u32,
    ) -> Result<FlowProxy> {
        let response = self
            .request(Request::CreateFlow {
                name: name.into(),
                builder: Box::new(builder),
                catalog,
                flags,
            })
            .await?;
        match response {
            Response::Proxy { snapshot, flags } => {
                Ok(FlowProxy::new(self.clone(), snapshot, flags))
            }
            _ => Err(CoordinatorError::ProcessorTerminated),
        }
    }

    /// Remove a flow, resetting any sessions bound to it
    pub async fn purge_flow(&self, flow: Uuid) -> Result<()> {
        self.request(Request::PurgeFlow { flow }).await?;
        Ok(())
    }

    /// Fetch a fresh proxy for a live flow
    pub async fn flow_proxy(&self, flow: Uuid) -> Result<FlowProxy> {
        match self.request(Request::GetFlowProxy { flow: Some(flow) }).await? {
            Response::Proxies(mut snapshots) => {
                let (snapshot, flags) = snapshots
                    .pop()
                    .ok_or(CoordinatorError::FlowNotFound(flow))?;
                Ok(FlowProxy::new(self.clone(), snapshot, flags))
            }
            _ => Err(CoordinatorError::ProcessorTerminated),
        }
    }

    /// Fetch fresh proxies for every live flow
    pub async fn flow_proxies(&self) -> Result<Vec<FlowProxy>> {
        match self.request(Request::GetFlowProxy { flow: None }).await? {
            Response::Proxies(snapshots) => Ok(snapshots
                .into_iter()
                .map(|(snapshot, flags)| FlowProxy::new(self.clone(), snapshot, flags))
                .collect()),
            _ => Err(CoordinatorError::ProcessorTerminated),
        }
    }

    /// Sessions needed to saturate all currently-schedulable work
    pub async fn pending_count(&self) -> Result<usize> {
        match self.request(Request::GetPendingCount).await? {
            Response::Count(n) => Ok(n),
            _ => Err(CoordinatorError::ProcessorTerminated),
        }
    }

    /// Sessions needed to saturate one flow's schedulable work
    pub async fn flow_pending_count(&self, flow: Uuid) -> Result<usize> {
        match self.request(Request::GetFlowPendingCount { flow }).await? {
            Response::Count(n) => Ok(n),
            _ => Err(CoordinatorError::ProcessorTerminated),
        }
    }

    /// Subscribe to lifecycle events
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<FlowEvent>> {
        match self.request(Request::CreateSubscriberQueue).await? {
            Response::Subscription(rx) => Ok(rx),
            _ => Err(CoordinatorError::ProcessorTerminated),
        }
    }

    /// Toggle the idle-session disconnect policy
    pub async fn set_autoclose_idle(&self, on: bool) -> Result<()> {
        self.request(Request::SetAutocloseIdle(on)).await?;
        Ok(())
    }

    /// Pause promotion, assignment, and timeout enforcement
    pub async fn suspend(&self) -> Result<()> {
        self.request(Request::Suspend).await?;
        Ok(())
    }

    /// Resume after [`suspend`](Self::suspend); phase deadlines are extended
    pub async fn resume(&self) -> Result<()> {
        self.request(Request::Resume).await?;
        Ok(())
    }

    /// Resolve once the flow finishes; fails if it failed or was purged
    pub async fn await_flow(&self, flow: Uuid) -> Result<()> {
        self.request(Request::AwaitFlow { flow }).await?;
        Ok(())
    }

    /// Inject an immediate scheduling pass ahead of the periodic tick
    pub fn refresh(&self) -> Result<()> {
        self.queue
            .send(ControlEvent::Refresh)
            .map_err(|_| CoordinatorError::ProcessorTerminated)
    }

    /// Register a new worker connection
    ///
    /// Returns the session id and the directive outbox the transport adapter
    /// drains toward the worker.
    pub fn connect(&self) -> Result<(SessionId, mpsc::UnboundedReceiver<Directive>)> {
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.queue
            .send(ControlEvent::Connect {
                session,
                outbox: tx,
            })
            .map_err(|_| CoordinatorError::ProcessorTerminated)?;
        Ok((session, rx))
    }

    /// Report a protocol event for a connected session
    pub fn session_event(&self, session: SessionId, event: SessionEvent) -> Result<()> {
        self.queue
            .send(ControlEvent::Session { session, event })
            .map_err(|_| CoordinatorError::ProcessorTerminated)
    }

    /// Stop the actor; outstanding requests are failed
    pub fn shutdown(&self) {
        let _ = self.queue.send(ControlEvent::Shutdown);
    }
}
