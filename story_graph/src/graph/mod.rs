//! The content graph - an arena owning every node and edge of one story.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::entities::{Edge, EdgeKind, Locals, Node, Uid};
use crate::error::GraphError;
use crate::provision::ProvisionKey;
use crate::registry::{Criteria, Registry, ScopePath};

/// What happens to a node's edges when the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRemovalPolicy {
    /// Delete every edge touching the node.
    #[default]
    Cascade,
    /// Refuse to remove a node that still has edges.
    Reject,
}

/// Edge traversal direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Owns all nodes and edges; edges refer to nodes by UID only.
///
/// The adjacency index is maintained incrementally on every insert and
/// removal, so edge queries cost O(degree).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphSnapshot", into = "GraphSnapshot")]
pub struct Graph {
    pub label: Option<String>,

    /// Domain names whose locals and capabilities apply to this graph,
    /// outermost first.
    pub domains: Vec<String>,

    /// Graph-wide variables (GRAPH namespace tier).
    pub locals: Locals,

    nodes: Registry<Node>,
    edges: Registry<Edge>,
    outgoing: HashMap<Uid, Vec<Uid>>,
    incoming: HashMap<Uid, Vec<Uid>>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    pub fn with_local(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.locals.insert(key.into(), value.into());
        self
    }

    /// Insert a node. Fails if its UID already exists.
    pub fn add_node(&mut self, node: Node) -> Result<Uid, GraphError> {
        self.nodes.add(node)
    }

    /// Insert an edge. Both endpoints must already be in the graph.
    pub fn add_edge(&mut self, edge: Edge) -> Result<Uid, GraphError> {
        for endpoint in [edge.source, edge.destination] {
            if !self.nodes.contains(endpoint) {
                return Err(GraphError::DanglingEdge {
                    edge: edge.uid,
                    missing: endpoint,
                });
            }
        }
        let (source, destination) = (edge.source, edge.destination);
        let uid = self.edges.add(edge)?;
        self.outgoing.entry(source).or_default().push(uid);
        self.incoming.entry(destination).or_default().push(uid);
        Ok(uid)
    }

    /// Insert a plain edge of the given kind.
    pub fn connect(&mut self, source: Uid, destination: Uid, kind: EdgeKind) -> Result<Uid, GraphError> {
        self.add_edge(Edge::new(source, destination, kind))
    }

    /// Insert `child` and a `Contains` edge from `parent` to it.
    pub fn add_child(&mut self, parent: Uid, child: Node) -> Result<Uid, GraphError> {
        if !self.nodes.contains(parent) {
            return Err(GraphError::NodeNotFound(parent));
        }
        let child = self.add_node(child)?;
        self.connect(parent, child, EdgeKind::Contains)?;
        Ok(child)
    }

    pub fn node(&self, uid: Uid) -> Option<&Node> {
        self.nodes.get(uid)
    }

    pub fn node_mut(&mut self, uid: Uid) -> Option<&mut Node> {
        self.nodes.get_mut(uid)
    }

    pub fn edge(&self, uid: Uid) -> Option<&Edge> {
        self.edges.get(uid)
    }

    pub fn edge_mut(&mut self, uid: Uid) -> Option<&mut Edge> {
        self.edges.get_mut(uid)
    }

    pub fn contains_node(&self, uid: Uid) -> bool {
        self.nodes.contains(uid)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Position of a node in insertion order (lower is older).
    pub fn insertion_order(&self, uid: Uid) -> Option<u64> {
        self.nodes.insertion_order(uid)
    }

    /// Edges leaving `uid`, in insertion order.
    pub fn edges_out(&self, uid: Uid) -> impl Iterator<Item = &Edge> + '_ {
        self.outgoing
            .get(&uid)
            .into_iter()
            .flatten()
            .filter_map(move |edge| self.edges.get(*edge))
    }

    /// Edges arriving at `uid`, in insertion order.
    pub fn edges_in(&self, uid: Uid) -> impl Iterator<Item = &Edge> + '_ {
        self.incoming
            .get(&uid)
            .into_iter()
            .flatten()
            .filter_map(move |edge| self.edges.get(*edge))
    }

    /// Edges at `uid` in one direction, optionally restricted to a kind.
    pub fn find_edges(&self, uid: Uid, direction: Direction, kind: Option<EdgeKind>) -> Vec<&Edge> {
        let edges: Box<dyn Iterator<Item = &Edge> + '_> = match direction {
            Direction::Outgoing => Box::new(self.edges_out(uid)),
            Direction::Incoming => Box::new(self.edges_in(uid)),
        };
        edges
            .filter(|edge| kind.map_or(true, |k| edge.kind == k))
            .collect()
    }

    /// The structural parent: source of the first incoming `Contains` edge.
    pub fn parent(&self, uid: Uid) -> Option<&Node> {
        self.edges_in(uid)
            .find(|edge| edge.kind == EdgeKind::Contains)
            .and_then(|edge| self.node(edge.source))
    }

    /// Ancestors of `uid`, nearest first.
    ///
    /// Containment cycles are cut at the first repeated node.
    pub fn iter_ancestors(&self, uid: Uid) -> Vec<&Node> {
        let mut seen = HashSet::from([uid]);
        let mut ancestors = Vec::new();
        let mut current = uid;

        while let Some(parent) = self.parent(current) {
            if !seen.insert(parent.uid) {
                break;
            }
            ancestors.push(parent);
            current = parent.uid;
        }
        ancestors
    }

    /// Scope path of a node: ancestor segments root-first, then the node itself.
    pub fn path(&self, uid: Uid) -> ScopePath {
        let mut path = self.scope_of(uid);
        if let Some(node) = self.node(uid) {
            path.push(node.path_segment());
        }
        path
    }

    /// Scope path of the node's enclosing containers (excludes the node).
    pub fn scope_of(&self, uid: Uid) -> ScopePath {
        ScopePath::new(
            self.iter_ancestors(uid)
                .iter()
                .rev()
                .map(|node| node.path_segment())
                .collect(),
        )
    }

    /// Nodes matching every criterion, in insertion order.
    pub fn find_all(&self, criteria: &Criteria) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|node| self.node_matches(node, criteria))
            .collect()
    }

    /// The oldest node matching every criterion.
    pub fn find_one(&self, criteria: &Criteria) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| self.node_matches(node, criteria))
    }

    pub fn find_by_label(&self, label: &str) -> Option<&Node> {
        self.nodes.find_by_label(label)
    }

    /// Nodes whose `provides` contains `key`, in insertion order.
    pub fn find_providers(&self, key: &ProvisionKey) -> Vec<&Node> {
        self.nodes.find_providers(key)
    }

    fn node_matches(&self, node: &Node, criteria: &Criteria) -> bool {
        let path = criteria.path.as_ref().map(|_| self.path(node.uid));
        criteria.matches(node, path.as_ref())
    }

    /// Remove an edge and its adjacency entries.
    pub fn remove_edge(&mut self, uid: Uid) -> Result<Edge, GraphError> {
        let edge = self.edges.remove(uid).ok_or(GraphError::EdgeNotFound(uid))?;
        if let Some(out) = self.outgoing.get_mut(&edge.source) {
            out.retain(|e| *e != uid);
        }
        if let Some(inc) = self.incoming.get_mut(&edge.destination) {
            inc.retain(|e| *e != uid);
        }
        Ok(edge)
    }

    /// Remove a node, handling its edges according to `policy`.
    pub fn remove_node(&mut self, uid: Uid, policy: EdgeRemovalPolicy) -> Result<Node, GraphError> {
        if !self.nodes.contains(uid) {
            return Err(GraphError::NodeNotFound(uid));
        }

        let touching: BTreeSet<Uid> = self
            .edges_out(uid)
            .chain(self.edges_in(uid))
            .map(|edge| edge.uid)
            .collect();

        if !touching.is_empty() && policy == EdgeRemovalPolicy::Reject {
            return Err(GraphError::NodeHasEdges {
                node: uid,
                count: touching.len(),
            });
        }
        for edge in touching {
            self.remove_edge(edge)?;
        }

        self.outgoing.remove(&uid);
        self.incoming.remove(&uid);
        self.nodes.remove(uid).ok_or(GraphError::NodeNotFound(uid))
    }
}

/// Serialized form of a graph; deserializing replays inserts so the
/// adjacency index is rebuilt by the same path as live edits.
#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    label: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    locals: Locals,
    nodes: Registry<Node>,
    edges: Vec<Edge>,
}

impl From<Graph> for GraphSnapshot {
    fn from(graph: Graph) -> Self {
        Self {
            label: graph.label,
            domains: graph.domains,
            locals: graph.locals,
            nodes: graph.nodes,
            edges: graph.edges.into_vec(),
        }
    }
}

impl TryFrom<GraphSnapshot> for Graph {
    type Error = GraphError;

    fn try_from(snapshot: GraphSnapshot) -> Result<Self, Self::Error> {
        let mut graph = Graph {
            label: snapshot.label,
            domains: snapshot.domains,
            locals: snapshot.locals,
            nodes: snapshot.nodes,
            ..Graph::default()
        };
        for edge in snapshot.edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }
}
