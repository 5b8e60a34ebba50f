//! Core flow graph data structures
//!
//! This module defines the DAG submitted for distributed execution and the
//! scheduling metadata derived from it:
//!
//! - **[`Flow`]**: the owning arena of nodes and edges, cloneable into an
//!   independent snapshot
//! - **[`FlowNode`]**: one concrete instance of a computation unit
//! - **[`FlowEdge`]**: a typed relationship between two flow nodes (handle
//!   edges carrying named byte/file references, or dummy order-only edges)
//! - **[`LogicalNode`]**: an equivalence class of interchangeable flow node
//!   replicas, the unit of phase scheduling
//! - **[`LogicalEdge`]**: an edge between logical nodes, derived from
//!   membership
//!
//! # Arena indexing
//!
//! Nodes and edges reference each other through typed index newtypes
//! ([`FlowNodeId`], [`EdgeId`], [`LogicalNodeId`]) rather than owning
//! pointers. Relations are index lookups inside one owning [`Flow`], so
//! snapshotting is a pure data copy with no ownership entanglement.
//!
//! # Lifecycle
//!
//! A flow is built (nodes, replicas, edges), then [`sealed`](Flow::seal).
//! Sealing derives the logical graph, verifies acyclicity, assigns each
//! logical node a DFS `order` (strictly increasing along every edge) and a
//! `depth` (longest path from a root), and arms the dependency and client
//! countdowns. After sealing, only the coordinator actor mutates the flow.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::countdown::Countdown;
use crate::error::{FlowError, Result};

/// Index of a [`FlowNode`] within its owning [`Flow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowNodeId(pub(crate) usize);

/// Index of a [`FlowEdge`] within its owning [`Flow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub(crate) usize);

/// Index of a [`LogicalNode`] within its owning [`Flow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalNodeId(pub(crate) usize);

impl fmt::Display for FlowNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for LogicalNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

impl FlowNodeId {
    /// Raw arena index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl LogicalNodeId {
    /// Raw arena index
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A concrete input or output descriptor handed to the codelet contract
///
/// Each side of a handle edge materializes one of these: the source side an
/// output handle, the sink side an input handle carrying the (name, path)
/// pairs published by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    /// Output side of a handle edge
    OutputHandle {
        /// Edge name the producer publishes under
        name: String,
    },
    /// Input side of a handle edge
    InputHandle {
        /// Edge name the consumer reads from
        name: String,
        /// Named (handle, path) references published by the producer
        handles: Vec<(String, String)>,
    },
}

impl Resource {
    /// The edge name this resource was materialized from
    pub fn name(&self) -> &str {
        match self {
            Resource::OutputHandle { name } => name,
            Resource::InputHandle { name, .. } => name,
        }
    }
}

/// A handle output-input relationship between two flow nodes
///
/// Carries named references (e.g. to byte/file resources) from the output
/// side `u` to the input side `v`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleEdge {
    u: FlowNodeId,
    v: FlowNodeId,
    name: String,
    expand_on_embed: bool,
    handles: Vec<(String, String)>,
}

impl HandleEdge {
    /// Create a handle edge from `u` to `v`
    pub fn new(u: FlowNodeId, v: FlowNodeId) -> Self {
        Self {
            u,
            v,
            name: String::new(),
            expand_on_embed: false,
            handles: Vec::new(),
        }
    }

    /// Set the edge name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark this edge for replication when a subflow is spliced into a
    /// larger flow
    pub fn with_expand_on_embed(mut self, expand: bool) -> Self {
        self.expand_on_embed = expand;
        self
    }

    /// Attach the (handle, path) table forwarded to the input side
    pub fn with_handles(mut self, handles: Vec<(String, String)>) -> Self {
        self.handles = handles;
        self
    }

    /// Edge name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this edge is replicated per expansion on subflow embedding
    pub fn expand_on_embed(&self) -> bool {
        self.expand_on_embed
    }
}

/// An order-only dependency between two flow nodes carrying no data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyEdge {
    u: FlowNodeId,
    v: FlowNodeId,
}

/// A typed relationship between two flow nodes
///
/// Edges are directional: source node `u`, sink node `v`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEdge {
    /// A named handle relationship carrying resource references
    Handle(HandleEdge),
    /// An order-only dependency
    Dummy(DummyEdge),
}

impl FlowEdge {
    /// Source node
    pub fn u(&self) -> FlowNodeId {
        match self {
            FlowEdge::Handle(e) => e.u,
            FlowEdge::Dummy(e) => e.u,
        }
    }

    /// Sink node
    pub fn v(&self) -> FlowNodeId {
        match self {
            FlowEdge::Handle(e) => e.v,
            FlowEdge::Dummy(e) => e.v,
        }
    }

    /// Materialize the resource seen by the source node, if any
    pub fn create_u_resource(&self) -> Option<Resource> {
        match self {
            FlowEdge::Handle(e) => Some(Resource::OutputHandle {
                name: e.name.clone(),
            }),
            FlowEdge::Dummy(_) => None,
        }
    }

    /// Materialize the resource seen by the sink node, if any
    pub fn create_v_resource(&self) -> Option<Resource> {
        match self {
            FlowEdge::Handle(e) => Some(Resource::InputHandle {
                name: e.name.clone(),
                handles: e.handles.clone(),
            }),
            FlowEdge::Dummy(_) => None,
        }
    }
}

/// One concrete instance of a computation unit inside a [`Flow`]
///
/// Destroyed with its owning flow. Belongs to exactly one [`LogicalNode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    id: FlowNodeId,
    codelet: String,
    parameters: Value,
    in_edges: Vec<EdgeId>,
    out_edges: Vec<EdgeId>,
    logical: LogicalNodeId,
    order: usize,
    /// Worker session currently bound to this node, if any
    pub assigned_session: Option<Uuid>,
    /// Free-form caller bookkeeping, carried into lifecycle events
    pub attachment: Value,
}

impl FlowNode {
    /// Codelet name this node executes
    pub fn codelet(&self) -> &str {
        &self.codelet
    }

    /// Parameter document handed to the codelet
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Ordered incoming edge ids
    pub fn in_edges(&self) -> &[EdgeId] {
        &self.in_edges
    }

    /// Ordered outgoing edge ids
    pub fn out_edges(&self) -> &[EdgeId] {
        &self.out_edges
    }

    /// Owning logical node
    pub fn logical(&self) -> LogicalNodeId {
        self.logical
    }

    /// Stable rendering/tie-break position assigned at seal time
    pub fn order(&self) -> usize {
        self.order
    }

    /// This node's id
    pub fn id(&self) -> FlowNodeId {
        self.id
    }
}

/// Scheduling status of a [`LogicalNode`]
///
/// `Pending → Resource → Prepare → Execute → Finished`, with `Failed`
/// reachable from the three phase states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalNodeStatus {
    /// Dependency countdown not yet satisfied; no client work issued
    Pending,
    /// Members are acquiring resources
    Resource,
    /// Members are staging codelets and inputs
    Prepare,
    /// Members are executing
    Execute,
    /// All members completed; successors have been notified
    Finished,
    /// A member failed and retries are exhausted
    Failed,
}

impl LogicalNodeStatus {
    /// Whether this is one of the barrier-gated phases
    pub fn is_phase(&self) -> bool {
        matches!(
            self,
            LogicalNodeStatus::Resource | LogicalNodeStatus::Prepare | LogicalNodeStatus::Execute
        )
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogicalNodeStatus::Finished | LogicalNodeStatus::Failed)
    }
}

impl fmt::Display for LogicalNodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogicalNodeStatus::Pending => "Pending",
            LogicalNodeStatus::Resource => "Resource",
            LogicalNodeStatus::Prepare => "Prepare",
            LogicalNodeStatus::Execute => "Execute",
            LogicalNodeStatus::Finished => "Finished",
            LogicalNodeStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// An edge between two [`LogicalNode`]s, derived from membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalEdge {
    /// Source logical node
    pub u: LogicalNodeId,
    /// Sink logical node
    pub v: LogicalNodeId,
}

/// An equivalence class of interchangeable [`FlowNode`] replicas
///
/// The unit of phase scheduling: all members must complete a phase before any
/// member proceeds to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalNode {
    id: LogicalNodeId,
    members: BTreeSet<FlowNodeId>,
    in_edges: Vec<LogicalEdge>,
    out_edges: Vec<LogicalEdge>,
    order: usize,
    depth: usize,
    /// Current scheduling status
    pub status: LogicalNodeStatus,
    /// Countdown over predecessor logical nodes; satisfied gates promotion
    /// out of `Pending`
    pub dependencies: Countdown<LogicalNodeId>,
    /// Countdown over member flow nodes; satisfied gates promotion from one
    /// phase to the next
    pub clients: Countdown<FlowNodeId>,
    /// Failed phase attempts so far (consulted by the retry policy)
    pub attempts: u32,
}

impl LogicalNode {
    fn new(id: LogicalNodeId) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            order: 0,
            depth: 0,
            status: LogicalNodeStatus::Pending,
            dependencies: Countdown::new(),
            clients: Countdown::new(),
            attempts: 0,
        }
    }

    /// This node's id
    pub fn id(&self) -> LogicalNodeId {
        self.id
    }

    /// Member flow nodes
    pub fn members(&self) -> &BTreeSet<FlowNodeId> {
        &self.members
    }

    /// Incoming logical edges
    pub fn in_edges(&self) -> &[LogicalEdge] {
        &self.in_edges
    }

    /// Outgoing logical edges
    pub fn out_edges(&self) -> &[LogicalEdge] {
        &self.out_edges
    }

    /// DFS-assigned topological position, strictly increasing along edges
    pub fn order(&self) -> usize {
        self.order
    }

    /// Longest path from a root; shallower work is promoted first when
    /// sessions are scarce
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Re-arm the dependency countdown over current predecessors
    pub fn rearm_dependencies(&mut self) {
        let preds: Vec<LogicalNodeId> = self.in_edges.iter().map(|e| e.u).collect();
        self.dependencies.reset_from(preds);
    }

    /// Re-arm the client countdown over current members
    pub fn rearm_clients(&mut self) {
        let members: Vec<FlowNodeId> = self.members.iter().copied().collect();
        self.clients.reset_from(members);
    }
}

/// A directed acyclic graph of computation instances submitted for execution
///
/// Owns the complete set of nodes and edges. Mutated only by the coordinator
/// actor once submitted; external readers work against
/// [snapshots](Flow::snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    id: Uuid,
    name: String,
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    logicals: Vec<LogicalNode>,
    sealed: bool,
    /// Free-form caller bookkeeping, carried into lifecycle events
    pub attachment: Value,
}

impl Flow {
    /// Create an empty, unsealed flow
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            logicals: Vec::new(),
            sealed: false,
            attachment: Value::Null,
        }
    }

    /// Stable flow identity
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable flow name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether [`seal`](Self::seal) has completed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Add a computation node in its own fresh logical group
    ///
    /// Returns the new node's id. Grouping is determined at build time and is
    /// never recomputed later.
    pub fn add_node(&mut self, codelet: impl Into<String>, parameters: Value) -> FlowNodeId {
        let logical_id = LogicalNodeId(self.logicals.len());
        let mut logical = LogicalNode::new(logical_id);

        let node_id = FlowNodeId(self.nodes.len());
        logical.members.insert(node_id);
        self.logicals.push(logical);

        self.nodes.push(FlowNode {
            id: node_id,
            codelet: codelet.into(),
            parameters,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            logical: logical_id,
            order: node_id.0,
            assigned_session: None,
            attachment: Value::Null,
        });
        node_id
    }

    /// Add an interchangeable replica of an existing node
    ///
    /// The replica joins the original's logical group and inherits its
    /// codelet and parameters.
    pub fn add_replica(&mut self, of: FlowNodeId) -> Result<FlowNodeId> {
        let original = self
            .nodes
            .get(of.0)
            .ok_or(FlowError::NodeNotFound(of.0))?;
        let codelet = original.codelet.clone();
        let parameters = original.parameters.clone();
        let logical_id = original.logical;

        let node_id = FlowNodeId(self.nodes.len());
        self.nodes.push(FlowNode {
            id: node_id,
            codelet,
            parameters,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            logical: logical_id,
            order: node_id.0,
            assigned_session: None,
            attachment: Value::Null,
        });
        self.logicals[logical_id.0].members.insert(node_id);
        Ok(node_id)
    }

    /// Add a handle edge; the edge's endpoints must already exist
    pub fn add_handle_edge(&mut self, edge: HandleEdge) -> Result<EdgeId> {
        self.check_endpoints(edge.u, edge.v)?;
        let (u, v) = (edge.u, edge.v);
        let id = EdgeId(self.edges.len());
        self.edges.push(FlowEdge::Handle(edge));
        self.nodes[u.0].out_edges.push(id);
        self.nodes[v.0].in_edges.push(id);
        Ok(id)
    }

    /// Add an order-only dummy edge
    pub fn add_dummy_edge(&mut self, u: FlowNodeId, v: FlowNodeId) -> Result<EdgeId> {
        self.check_endpoints(u, v)?;
        let id = EdgeId(self.edges.len());
        self.edges.push(FlowEdge::Dummy(DummyEdge { u, v }));
        self.nodes[u.0].out_edges.push(id);
        self.nodes[v.0].in_edges.push(id);
        Ok(id)
    }

    fn check_endpoints(&self, u: FlowNodeId, v: FlowNodeId) -> Result<()> {
        if u.0 >= self.nodes.len() {
            return Err(FlowError::NodeNotFound(u.0));
        }
        if v.0 >= self.nodes.len() {
            return Err(FlowError::NodeNotFound(v.0));
        }
        if u == v {
            return Err(FlowError::validation(format!(
                "Self-edge on node '{}'",
                self.nodes[u.0].codelet
            )));
        }
        Ok(())
    }

    /// Derive the logical graph and scheduling metadata
    ///
    /// Derives logical edges from flow edges between members' logical groups,
    /// verifies the logical graph is acyclic, assigns each logical node a DFS
    /// `order` and longest-path `depth`, gives flow nodes stable rendering
    /// positions, and arms both countdowns. Must be called exactly once
    /// before the flow is submitted.
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Err(FlowError::validation("Flow is already sealed"));
        }
        if self.nodes.is_empty() {
            return Err(FlowError::validation("Flow has no nodes"));
        }

        // Derive logical edges, deduplicated.
        let mut seen: HashSet<(LogicalNodeId, LogicalNodeId)> = HashSet::new();
        for logical in &mut self.logicals {
            logical.in_edges.clear();
            logical.out_edges.clear();
        }
        for edge in &self.edges {
            let lu = self.nodes[edge.u().0].logical;
            let lv = self.nodes[edge.v().0].logical;
            if lu == lv {
                return Err(FlowError::validation(format!(
                    "Edge between replicas of one logical group ('{}')",
                    self.nodes[edge.u().0].codelet
                )));
            }
            if seen.insert((lu, lv)) {
                let ledge = LogicalEdge { u: lu, v: lv };
                self.logicals[lu.0].out_edges.push(ledge);
                self.logicals[lv.0].in_edges.push(ledge);
            }
        }

        self.assign_order()?;
        self.assign_depth();

        // Stable flow node positions: logical order first, insertion order
        // as tie-break.
        let mut node_ids: Vec<FlowNodeId> = (0..self.nodes.len()).map(FlowNodeId).collect();
        node_ids.sort_by_key(|id| (self.logicals[self.nodes[id.0].logical.0].order, id.0));
        for (pos, id) in node_ids.into_iter().enumerate() {
            self.nodes[id.0].order = pos;
        }

        for logical in &mut self.logicals {
            logical.rearm_dependencies();
            logical.rearm_clients();
        }

        self.sealed = true;
        Ok(())
    }

    /// Depth-first order assignment: reverse postorder over the logical
    /// graph, which is strictly increasing along every edge of a DAG.
    fn assign_order(&mut self) -> Result<()> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let n = self.logicals.len();
        let mut color = vec![WHITE; n];
        let mut postorder: Vec<usize> = Vec::with_capacity(n);

        for root in 0..n {
            if color[root] != WHITE {
                continue;
            }
            // Iterative DFS with an explicit stack of (node, next child).
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            color[root] = GRAY;
            while let Some(&(node, next)) = stack.last() {
                if next < self.logicals[node].out_edges.len() {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    let child = self.logicals[node].out_edges[next].v.0;
                    match color[child] {
                        WHITE => {
                            color[child] = GRAY;
                            stack.push((child, 0));
                        }
                        GRAY => {
                            let name = self.logicals[child]
                                .members
                                .iter()
                                .next()
                                .map(|m| self.nodes[m.0].codelet.clone())
                                .unwrap_or_default();
                            return Err(FlowError::Cycle { node: name });
                        }
                        _ => {}
                    }
                } else {
                    color[node] = BLACK;
                    postorder.push(node);
                    stack.pop();
                }
            }
        }

        for (post_idx, node) in postorder.iter().enumerate() {
            self.logicals[*node].order = n - 1 - post_idx;
        }
        Ok(())
    }

    /// Longest path from a root, processed in topological (order) sequence.
    fn assign_depth(&mut self) {
        let mut by_order: Vec<usize> = (0..self.logicals.len()).collect();
        by_order.sort_by_key(|i| self.logicals[*i].order);

        let mut depths: HashMap<usize, usize> = HashMap::new();
        for i in by_order {
            let depth = self.logicals[i]
                .in_edges
                .iter()
                .map(|e| depths.get(&e.u.0).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(i, depth);
            self.logicals[i].depth = depth;
        }
    }

    /// Produce a structurally independent deep copy
    ///
    /// The snapshot reconstructs both countdowns against its own topology and
    /// is never a live participant in scheduling: mutating it cannot affect
    /// the original.
    pub fn snapshot(&self) -> Flow {
        let mut copy = self.clone();
        for logical in &mut copy.logicals {
            logical.rearm_dependencies();
            logical.rearm_clients();
        }
        copy
    }

    /// Look up a node
    pub fn node(&self, id: FlowNodeId) -> Result<&FlowNode> {
        self.nodes.get(id.0).ok_or(FlowError::NodeNotFound(id.0))
    }

    /// Look up a node mutably
    pub fn node_mut(&mut self, id: FlowNodeId) -> Result<&mut FlowNode> {
        self.nodes.get_mut(id.0).ok_or(FlowError::NodeNotFound(id.0))
    }

    /// Look up a logical node
    pub fn logical(&self, id: LogicalNodeId) -> &LogicalNode {
        &self.logicals[id.0]
    }

    /// Look up a logical node mutably
    pub fn logical_mut(&mut self, id: LogicalNodeId) -> &mut LogicalNode {
        &mut self.logicals[id.0]
    }

    /// All nodes
    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.iter()
    }

    /// All edges
    pub fn edges(&self) -> impl Iterator<Item = &FlowEdge> {
        self.edges.iter()
    }

    /// Look up an edge
    pub fn edge(&self, id: EdgeId) -> &FlowEdge {
        &self.edges[id.0]
    }

    /// All logical nodes
    pub fn logicals(&self) -> impl Iterator<Item = &LogicalNode> {
        self.logicals.iter()
    }

    /// All logical node ids
    pub fn logical_ids(&self) -> impl Iterator<Item = LogicalNodeId> {
        (0..self.logicals.len()).map(LogicalNodeId)
    }

    /// Number of flow nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Ordered input resources for a node (one per incoming handle edge)
    pub fn node_input_resources(&self, id: FlowNodeId) -> Result<Vec<Resource>> {
        let node = self.node(id)?;
        Ok(node
            .in_edges
            .iter()
            .filter_map(|e| self.edges[e.0].create_v_resource())
            .collect())
    }

    /// Ordered output resources for a node (one per outgoing handle edge)
    pub fn node_output_resources(&self, id: FlowNodeId) -> Result<Vec<Resource>> {
        let node = self.node(id)?;
        Ok(node
            .out_edges
            .iter()
            .filter_map(|e| self.edges[e.0].create_u_resource())
            .collect())
    }

    /// Whether every logical node has finished
    pub fn is_finished(&self) -> bool {
        self.logicals
            .iter()
            .all(|l| l.status == LogicalNodeStatus::Finished)
    }

    /// Whether any logical node has failed terminally
    pub fn has_failed(&self) -> bool {
        self.logicals
            .iter()
            .any(|l| l.status == LogicalNodeStatus::Failed)
    }

    /// Whether the flow as a whole has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.is_finished() || self.has_failed()
    }
}

/// Breadth-first listing of logical node ids reachable from `start`
/// (inclusive), following outgoing edges
pub fn downstream_of(flow: &Flow, start: LogicalNodeId) -> Vec<LogicalNodeId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    let mut out = Vec::new();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        out.push(id);
        for edge in flow.logical(id).out_edges() {
            queue.push_back(edge.v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diamond() -> (Flow, [FlowNodeId; 4]) {
        // a -> b, a -> c, b -> d, c -> d
        let mut flow = Flow::new("diamond");
        let a = flow.add_node("a", json!({}));
        let b = flow.add_node("b", json!({}));
        let c = flow.add_node("c", json!({}));
        let d = flow.add_node("d", json!({}));
        flow.add_handle_edge(HandleEdge::new(a, b).with_name("ab")).unwrap();
        flow.add_handle_edge(HandleEdge::new(a, c).with_name("ac")).unwrap();
        flow.add_handle_edge(HandleEdge::new(b, d).with_name("bd")).unwrap();
        flow.add_handle_edge(HandleEdge::new(c, d).with_name("cd")).unwrap();
        flow.seal().unwrap();
        (flow, [a, b, c, d])
    }

    #[test]
    fn seal_assigns_monotone_order() {
        let (flow, _) = diamond();
        for edge in flow.edges() {
            let lu = flow.logical(flow.node(edge.u()).unwrap().logical());
            let lv = flow.logical(flow.node(edge.v()).unwrap().logical());
            assert!(
                lu.order() < lv.order(),
                "order({}) = {} must precede order({}) = {}",
                edge.u(),
                lu.order(),
                edge.v(),
                lv.order()
            );
        }
    }

    #[test]
    fn seal_assigns_longest_path_depth() {
        let (flow, [a, b, _, d]) = diamond();
        assert_eq!(flow.logical(flow.node(a).unwrap().logical()).depth(), 0);
        assert_eq!(flow.logical(flow.node(b).unwrap().logical()).depth(), 1);
        assert_eq!(flow.logical(flow.node(d).unwrap().logical()).depth(), 2);
    }

    #[test]
    fn seal_arms_countdowns_from_structure() {
        let (flow, [_, _, _, d]) = diamond();
        let ld = flow.logical(flow.node(d).unwrap().logical());
        assert_eq!(ld.dependencies.remaining(), 2);
        assert_eq!(ld.clients.remaining(), 1);

        for id in flow.logical_ids() {
            let l = flow.logical(id);
            assert_eq!(l.dependencies.remaining(), l.in_edges().len());
            assert_eq!(l.clients.remaining(), l.members().len());
        }
    }

    #[test]
    fn replicas_share_a_logical_group() {
        let mut flow = Flow::new("replicated");
        let a = flow.add_node("stage", json!({"shard": 0}));
        let a2 = flow.add_replica(a).unwrap();
        let b = flow.add_node("sink", json!({}));
        flow.add_handle_edge(HandleEdge::new(a, b).with_name("out")).unwrap();
        flow.add_handle_edge(HandleEdge::new(a2, b).with_name("out")).unwrap();
        flow.seal().unwrap();

        let la = flow.node(a).unwrap().logical();
        assert_eq!(flow.node(a2).unwrap().logical(), la);
        assert_eq!(flow.logical(la).members().len(), 2);
        assert_eq!(flow.logical(la).clients.remaining(), 2);
        // Parallel flow edges collapse into one logical edge.
        let lb = flow.node(b).unwrap().logical();
        assert_eq!(flow.logical(lb).dependencies.remaining(), 1);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut flow = Flow::new("cyclic");
        let a = flow.add_node("a", json!({}));
        let b = flow.add_node("b", json!({}));
        flow.add_handle_edge(HandleEdge::new(a, b)).unwrap();
        flow.add_handle_edge(HandleEdge::new(b, a)).unwrap();
        assert!(matches!(flow.seal(), Err(FlowError::Cycle { .. })));
    }

    #[test]
    fn edge_inside_logical_group_is_rejected() {
        let mut flow = Flow::new("bad");
        let a = flow.add_node("a", json!({}));
        let a2 = flow.add_replica(a).unwrap();
        flow.add_handle_edge(HandleEdge::new(a, a2)).unwrap();
        assert!(matches!(flow.seal(), Err(FlowError::Validation(_))));
    }

    #[test]
    fn snapshot_is_isolated_from_original() {
        let (mut flow, [a, ..]) = diamond();
        let mut snap = flow.snapshot();

        let la = snap.node(a).unwrap().logical();
        snap.logical_mut(la).status = LogicalNodeStatus::Execute;
        snap.node_mut(a).unwrap().assigned_session = Some(Uuid::new_v4());
        snap.attachment = json!({"touched": true});

        let la_orig = flow.node(a).unwrap().logical();
        assert_eq!(flow.logical(la_orig).status, LogicalNodeStatus::Pending);
        assert!(flow.node(a).unwrap().assigned_session.is_none());
        assert_eq!(flow.attachment, Value::Null);

        // And the other direction.
        flow.logical_mut(la_orig).status = LogicalNodeStatus::Failed;
        assert_eq!(snap.logical(la).status, LogicalNodeStatus::Execute);
    }

    #[test]
    fn resources_follow_edge_sides() {
        let (flow, [a, _, _, d]) = diamond();
        let outputs = flow.node_output_resources(a).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(matches!(outputs[0], Resource::OutputHandle { .. }));

        let inputs = flow.node_input_resources(d).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(matches!(inputs[0], Resource::InputHandle { .. }));
    }

    #[test]
    fn downstream_listing_covers_reachable_region() {
        let (flow, [a, _, _, _]) = diamond();
        let la = flow.node(a).unwrap().logical();
        let region = downstream_of(&flow, la);
        assert_eq!(region.len(), 4);
    }
}
