//! Directed multigraph of states connected by action-labeled, weighted edges.

use crate::types::Action;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

/// Position of a node in the graph's insertion-ordered node list.
pub type NodeId = usize;

/// Outgoing edge of a node.
#[derive(Debug, Clone)]
pub struct Edge {
    pub target: NodeId,
    pub utility: f64,
    pub action: Action,
}

/// Graph of states. Node identity is the insertion index; deduplication by
/// value is left to the caller through [`StateGraph::lookup_by_value`].
#[derive(Debug, Clone)]
pub struct StateGraph<T> {
    nodes: Vec<T>,
    successors: Vec<Vec<Edge>>,
    edge_count: usize,
}

impl<T> Default for StateGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateGraph<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            successors: Vec::new(),
            edge_count: 0,
        }
    }

    /// Append a node. Equal values may be added more than once.
    pub fn add_node(&mut self, value: T) -> NodeId {
        self.nodes.push(value);
        self.successors.push(Vec::new());
        self.nodes.len() - 1
    }

    /// Append an edge from `src` to `target`. Out-of-range ids are ignored.
    pub fn add_edge(&mut self, src: NodeId, target: NodeId, utility: f64, action: Action) {
        if target >= self.nodes.len() {
            return;
        }
        if let Some(edges) = self.successors.get_mut(src) {
            edges.push(Edge {
                target,
                utility,
                action,
            });
            self.edge_count += 1;
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn successors(&self, id: NodeId) -> &[Edge] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<T: PartialEq> StateGraph<T> {
    /// Find a node holding a value equal to `value`.
    ///
    /// Scans from the most recently added node backwards, so the newest of
    /// several equal nodes wins.
    pub fn lookup_by_value(&self, value: &T) -> Option<NodeId> {
        self.nodes.iter().rposition(|node| node == value)
    }
}

impl<T: Serialize + std::fmt::Debug> StateGraph<T> {
    fn label(value: &T) -> String {
        match serde_json::to_string_pretty(value) {
            Ok(json) => json.replace('"', "'").replace('\n', "\\l"),
            Err(_) => format!("{:?}", value).replace('"', "'"),
        }
    }

    /// Render the graph in Graphviz dot format. Edges between consecutive
    /// entries of `highlight` are drawn emphasized.
    pub fn to_dot(&self, highlight: &[NodeId]) -> String {
        let mut out = String::from("digraph plan {\n");
        for (id, edges) in self.successors.iter().enumerate() {
            if edges.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "\"n{}\" [label=\"{}\\l\" shape=box];",
                id,
                Self::label(&self.nodes[id])
            );
            for edge in edges {
                let on_path = highlight
                    .windows(2)
                    .any(|pair| pair[0] == id && pair[1] == edge.target);
                let (color, width) = if on_path {
                    ("#0068b5", 2)
                } else {
                    ("#262626", 1)
                };
                let _ = writeln!(
                    out,
                    "\"n{}\" -> \"n{}\" [label=\"{} - {:.6}\" color=\"{}\" penwidth={}];",
                    id, edge.target, edge.action.name, edge.utility, color, width
                );
            }
        }
        out.push('}');
        out
    }

    /// Write the dot rendering to `path`, readable by the owner only.
    pub fn write_dot(&self, highlight: &[NodeId], path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_dot(highlight))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}
