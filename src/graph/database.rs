//! The property-graph database: indexed in-memory state, staged
//! transactions, and optional durability.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use super::element::{Edge, GraphOp, Node};
use super::persistent::Durability;
use super::GraphError;
use crate::value::Value;

/// Where a graph lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphLocation {
    /// Ephemeral, gone when the database is dropped.
    Memory,
    /// Durable graph directory (WAL + snapshot + lock).
    Directory(PathBuf),
}

/// Tuning for a graph database.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    /// Node properties with a secondary index. Only string values are
    /// indexed.
    pub indexed_properties: Vec<String>,
    /// fsync every WAL append.
    pub sync_on_write: bool,
    /// WAL size that triggers compaction into a new snapshot.
    pub max_wal_size: u64,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            indexed_properties: Vec::new(),
            sync_on_write: true,
            max_wal_size: 64 * 1024 * 1024,
        }
    }
}

type IdSet = BTreeSet<String>;

/// Committed graph contents and their indexes.
#[derive(Debug, Default)]
pub struct GraphState {
    nodes: BTreeMap<String, Arc<Node>>,
    edges: BTreeMap<String, Arc<Edge>>,
    nodes_by_label: HashMap<String, IdSet>,
    /// property key -> string value -> node ids
    nodes_by_property: HashMap<String, HashMap<String, IdSet>>,
    edges_by_label: HashMap<String, IdSet>,
    outgoing: HashMap<String, IdSet>,
    incoming: HashMap<String, IdSet>,
}

fn unindex(index: &mut HashMap<String, IdSet>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn index(index: &mut HashMap<String, IdSet>, key: &str, id: &str) {
    index
        .entry(key.to_string())
        .or_default()
        .insert(id.to_string());
}

impl GraphState {
    fn with_indexes(indexed_properties: &[String]) -> Self {
        Self {
            nodes_by_property: indexed_properties
                .iter()
                .map(|key| (key.clone(), HashMap::new()))
                .collect(),
            ..Self::default()
        }
    }

    fn apply(&mut self, op: GraphOp) {
        match op {
            GraphOp::PutNode { node } => self.put_node(node),
            GraphOp::PutEdge { edge } => self.put_edge(edge),
            GraphOp::Clear => self.clear(),
        }
    }

    fn put_node(&mut self, node: Arc<Node>) {
        if let Some(old) = self.nodes.remove(&node.id) {
            unindex(&mut self.nodes_by_label, &old.label, &old.id);
            for (key, values) in &mut self.nodes_by_property {
                if let Some(Value::String(v)) = old.properties.get(key) {
                    unindex(values, v, &old.id);
                }
            }
        }

        index(&mut self.nodes_by_label, &node.label, &node.id);
        for (key, values) in &mut self.nodes_by_property {
            if let Some(Value::String(v)) = node.properties.get(key) {
                index(values, v, &node.id);
            }
        }
        self.nodes.insert(node.id.clone(), node);
    }

    fn put_edge(&mut self, edge: Arc<Edge>) {
        if let Some(old) = self.edges.remove(&edge.id) {
            unindex(&mut self.edges_by_label, &old.label, &old.id);
            unindex(&mut self.outgoing, &old.source, &old.id);
            unindex(&mut self.incoming, &old.target, &old.id);
        }

        index(&mut self.edges_by_label, &edge.label, &edge.id);
        index(&mut self.outgoing, &edge.source, &edge.id);
        index(&mut self.incoming, &edge.target, &edge.id);
        self.edges.insert(edge.id.clone(), edge);
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.nodes_by_label.clear();
        for values in self.nodes_by_property.values_mut() {
            values.clear();
        }
        self.edges_by_label.clear();
        self.outgoing.clear();
        self.incoming.clear();
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Arc<Node>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Arc<Edge>> {
        self.edges.get(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> impl ExactSizeIterator<Item = &Arc<Node>> + '_ {
        self.nodes.values()
    }

    /// All edges, ordered by id.
    pub fn edges(&self) -> impl ExactSizeIterator<Item = &Arc<Edge>> + '_ {
        self.edges.values()
    }

    /// Nodes carrying `label`, ordered by id.
    pub fn nodes_with_label<'a>(&'a self, label: &str) -> impl Iterator<Item = &'a Arc<Node>> + 'a {
        self.nodes_by_label
            .get(label)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Nodes whose indexed property `key` equals `value`, ordered by id.
    ///
    /// Returns `None` if `key` has no index.
    pub fn nodes_with_property<'a>(
        &'a self,
        key: &str,
        value: &str,
    ) -> Option<impl Iterator<Item = &'a Arc<Node>> + 'a> {
        let values = self.nodes_by_property.get(key)?;
        Some(
            values
                .get(value)
                .into_iter()
                .flatten()
                .filter_map(|id| self.nodes.get(id)),
        )
    }

    /// Number of nodes with a given label, straight from the index.
    #[must_use]
    pub fn count_with_label(&self, label: &str) -> usize {
        self.nodes_by_label.get(label).map_or(0, BTreeSet::len)
    }

    /// Number of nodes per label.
    #[must_use]
    pub fn node_label_counts(&self) -> BTreeMap<String, usize> {
        self.nodes_by_label
            .iter()
            .map(|(label, ids)| (label.clone(), ids.len()))
            .collect()
    }

    /// Number of edges per label.
    #[must_use]
    pub fn edge_label_counts(&self) -> BTreeMap<String, usize> {
        self.edges_by_label
            .iter()
            .map(|(label, ids)| (label.clone(), ids.len()))
            .collect()
    }

    /// Number of nodes per value of an indexed property.
    #[must_use]
    pub fn property_value_counts(&self, key: &str) -> Option<BTreeMap<String, usize>> {
        self.nodes_by_property.get(key).map(|values| {
            values
                .iter()
                .map(|(value, ids)| (value.clone(), ids.len()))
                .collect()
        })
    }

    /// Edges leaving `node_id`, ordered by edge id.
    pub fn outgoing<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a Arc<Edge>> + 'a {
        self.outgoing
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }

    /// Edges arriving at `node_id`, ordered by edge id.
    pub fn incoming<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a Arc<Edge>> + 'a {
        self.incoming
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }
}

/// A staged set of changes over a committed state.
///
/// Reads see the transaction's own writes. Nothing reaches the committed
/// state until the closure passed to [`GraphDatabase::transact`] returns
/// `Ok`.
pub struct GraphTxn<'a> {
    base: &'a GraphState,
    cleared: bool,
    nodes: BTreeMap<String, Arc<Node>>,
    edges: BTreeMap<String, Arc<Edge>>,
}

impl<'a> GraphTxn<'a> {
    fn new(base: &'a GraphState) -> Self {
        Self {
            base,
            cleared: false,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Committed state as it was when the transaction started, ignoring
    /// staged changes.
    #[must_use]
    pub fn committed(&self) -> &'a GraphState {
        self.base
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        if let Some(node) = self.nodes.get(id) {
            return Some(Arc::clone(node));
        }
        if self.cleared {
            return None;
        }
        self.base.node(id).cloned()
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<Arc<Edge>> {
        if let Some(edge) = self.edges.get(id) {
            return Some(Arc::clone(edge));
        }
        if self.cleared {
            return None;
        }
        self.base.edge(id).cloned()
    }

    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id) || (!self.cleared && self.base.nodes.contains_key(id))
    }

    #[must_use]
    pub fn contains_edge(&self, id: &str) -> bool {
        self.edges.contains_key(id) || (!self.cleared && self.base.edges.contains_key(id))
    }

    /// Inserts or replaces a node.
    pub fn put_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), Arc::new(node));
    }

    /// Inserts a node whose id must be new.
    ///
    /// # Errors
    /// `GraphError::DuplicateNode` if the id is taken.
    pub fn create_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.contains_node(&node.id) {
            return Err(GraphError::DuplicateNode { id: node.id });
        }
        self.put_node(node);
        Ok(())
    }

    /// Inserts or replaces an edge. Both endpoints must exist.
    ///
    /// # Errors
    /// `GraphError::MissingEndpoint` if either endpoint is unknown.
    pub fn put_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains_node(endpoint) {
                return Err(GraphError::MissingEndpoint {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        self.edges.insert(edge.id.clone(), Arc::new(edge));
        Ok(())
    }

    /// Inserts an edge whose id must be new.
    ///
    /// # Errors
    /// `GraphError::DuplicateEdge` if the id is taken, or
    /// `GraphError::MissingEndpoint` if either endpoint is unknown.
    pub fn create_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if self.contains_edge(&edge.id) {
            return Err(GraphError::DuplicateEdge { id: edge.id });
        }
        self.put_edge(edge)
    }

    /// Drops every node and edge, committed and staged.
    pub fn clear(&mut self) {
        self.cleared = true;
        self.nodes.clear();
        self.edges.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Commit order: wipe, then nodes, then edges, so every edge finds its
    /// endpoints on replay.
    fn into_ops(self) -> Vec<GraphOp> {
        let capacity = usize::from(self.cleared) + self.nodes.len() + self.edges.len();
        let mut ops = Vec::with_capacity(capacity);
        if self.cleared {
            ops.push(GraphOp::Clear);
        }
        ops.extend(self.nodes.into_values().map(|node| GraphOp::PutNode { node }));
        ops.extend(self.edges.into_values().map(|edge| GraphOp::PutEdge { edge }));
        ops
    }
}

struct Inner {
    graph: GraphState,
    durability: Option<Durability>,
    closed: bool,
}

/// An embedded property-graph database.
///
/// Readers share a lock; a commit holds it exclusively while it is logged
/// and applied, so no reader ever sees half a transaction.
///
/// # Examples
///
/// ```
/// use worldmodel::graph::{GraphDatabase, GraphError, Node};
///
/// let db = GraphDatabase::in_memory(Default::default());
/// db.transact(|txn| {
///     txn.create_node(Node::new("a", "Paper"))?;
///     Ok::<_, GraphError>(())
/// })
/// .unwrap();
///
/// assert_eq!(db.read(|g| g.node_count()).unwrap(), 1);
/// ```
pub struct GraphDatabase {
    inner: RwLock<Inner>,
    location: GraphLocation,
}

impl GraphDatabase {
    /// Creates an empty, ephemeral graph.
    #[must_use]
    pub fn in_memory(options: GraphOptions) -> Self {
        Self {
            inner: RwLock::new(Inner {
                graph: GraphState::with_indexes(&options.indexed_properties),
                durability: None,
                closed: false,
            }),
            location: GraphLocation::Memory,
        }
    }

    /// Opens a graph at `location`.
    ///
    /// Credentials only apply to directories.
    ///
    /// # Errors
    /// See [`Durability::open`].
    pub fn open(
        location: &GraphLocation,
        options: GraphOptions,
        credentials: Option<(&str, &str)>,
    ) -> Result<Self, GraphError> {
        let dir = match location {
            GraphLocation::Memory => return Ok(Self::in_memory(options)),
            GraphLocation::Directory(dir) => dir,
        };

        let (durability, recovered) = Durability::open(
            dir,
            credentials,
            options.sync_on_write,
            options.max_wal_size,
        )?;

        let mut graph = GraphState::with_indexes(&options.indexed_properties);
        for node in recovered.nodes {
            graph.put_node(Arc::new(node));
        }
        for edge in recovered.edges {
            graph.put_edge(Arc::new(edge));
        }
        for op in recovered.ops {
            graph.apply(op);
        }

        Ok(Self {
            inner: RwLock::new(Inner {
                graph,
                durability: Some(durability),
                closed: false,
            }),
            location: location.clone(),
        })
    }

    #[must_use]
    pub fn location(&self) -> &GraphLocation {
        &self.location
    }

    /// Runs `f` against the committed state.
    ///
    /// # Errors
    /// `GraphError::Closed` after [`close`](Self::close).
    pub fn read<R>(&self, f: impl FnOnce(&GraphState) -> R) -> Result<R, GraphError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| GraphError::Poisoned("graph.inner"))?;
        if inner.closed {
            return Err(GraphError::Closed);
        }
        Ok(f(&inner.graph))
    }

    /// Runs `f` in a transaction and commits its staged changes atomically.
    ///
    /// If `f` fails nothing is applied. On success the changes are logged
    /// (for durable graphs) before they become visible.
    ///
    /// # Errors
    /// Whatever `f` returns, or a `GraphError` from the commit itself.
    pub fn transact<R, E>(&self, f: impl FnOnce(&mut GraphTxn<'_>) -> Result<R, E>) -> Result<R, E>
    where
        E: From<GraphError>,
    {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Poisoned("graph.inner"))?;
        let Inner {
            graph,
            durability,
            closed,
        } = &mut *guard;
        if *closed {
            return Err(GraphError::Closed.into());
        }

        let mut txn = GraphTxn::new(graph);
        let result = f(&mut txn)?;
        if txn.is_empty() {
            return Ok(result);
        }
        let ops = txn.into_ops();
        let wiped = matches!(ops.first(), Some(GraphOp::Clear));

        if let Some(durability) = durability.as_ref() {
            durability.log(&ops).map_err(GraphError::from)?;
        }
        for op in ops {
            graph.apply(op);
        }

        if let Some(durability) = durability.as_mut() {
            if wiped || durability.should_compact() {
                let compacted = durability.compact(
                    graph.nodes.values().map(|node| &**node),
                    graph.edges.values().map(|edge| &**edge),
                );
                if let Err(e) = compacted {
                    tracing::warn!(error = %e, "compaction failed, WAL keeps growing");
                }
            }
        }

        Ok(result)
    }

    /// Writes a snapshot now and empties the WAL. No-op for in-memory
    /// graphs.
    ///
    /// # Errors
    /// `GraphError::Io` if the snapshot could not be written.
    pub fn checkpoint(&self) -> Result<(), GraphError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GraphError::Poisoned("graph.inner"))?;
        let Inner {
            graph,
            durability,
            closed,
        } = &mut *guard;
        if *closed {
            return Err(GraphError::Closed);
        }
        if let Some(durability) = durability.as_mut() {
            durability.compact(
                graph.nodes.values().map(|node| &**node),
                graph.edges.values().map(|edge| &**edge),
            )?;
        }
        Ok(())
    }

    /// Forces logged commits to disk.
    ///
    /// # Errors
    /// `GraphError::Closed` after close, `GraphError::Io` on fsync failure.
    pub fn flush(&self) -> Result<(), GraphError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| GraphError::Poisoned("graph.inner"))?;
        if inner.closed {
            return Err(GraphError::Closed);
        }
        if let Some(durability) = &inner.durability {
            durability.sync()?;
        }
        Ok(())
    }

    /// Syncs, releases the directory lock and drops the in-memory state.
    /// Idempotent.
    ///
    /// # Errors
    /// `GraphError::Io` if the final sync fails; the database is closed
    /// regardless.
    pub fn close(&self) -> Result<(), GraphError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| GraphError::Poisoned("graph.inner"))?;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        let synced = match inner.durability.take() {
            Some(durability) => durability.sync(),
            None => Ok(()),
        };
        inner.graph = GraphState::default();
        synced.map_err(GraphError::from)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.read().map_or(true, |inner| inner.closed)
    }
}
