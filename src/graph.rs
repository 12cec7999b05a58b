//! Dependency graph over workflow nodes.
//!
//! Wraps the parsed node and edge lists with the lookups the scheduler
//! needs: successor and predecessor sets, in-degree counts and a
//! topological order. Construction rejects cyclic graphs.

use std::collections::{HashMap, HashSet};

use crate::error::WorkflowError;
use crate::parser::{EdgeConfig, NodeConfig};
use crate::types::WorkflowResult;

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<NodeConfig>,
    index: HashMap<String, usize>,
    edges: Vec<EdgeConfig>,
    /// Unique successor node ids, in first-edge order.
    successors: HashMap<String, Vec<String>>,
    /// Unique predecessor node ids, in first-edge order.
    predecessors: HashMap<String, Vec<String>>,
}

impl WorkflowGraph {
    /// Build a graph from parsed nodes and edges.
    ///
    /// # Errors
    /// * Returns `WorkflowError::InvalidWorkflow` if the graph contains
    ///   a cycle.
    pub fn new(nodes: Vec<NodeConfig>, edges: Vec<EdgeConfig>) -> WorkflowResult<Self> {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        for node in &nodes {
            successors.insert(node.id.clone(), Vec::new());
            predecessors.insert(node.id.clone(), Vec::new());
        }

        // Parallel edges between the same pair count as one dependency.
        for edge in &edges {
            let succ = successors.get_mut(&edge.source).ok_or_else(|| {
                WorkflowError::InvalidWorkflow(format!("unknown edge source '{}'", edge.source))
            })?;
            if !succ.contains(&edge.target) {
                succ.push(edge.target.clone());
            }
            let pred = predecessors.get_mut(&edge.target).ok_or_else(|| {
                WorkflowError::InvalidWorkflow(format!("unknown edge target '{}'", edge.target))
            })?;
            if !pred.contains(&edge.source) {
                pred.push(edge.source.clone());
            }
        }

        let graph = Self {
            nodes,
            index,
            edges,
            successors,
            predecessors,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> WorkflowResult<()> {
        let order = self.topo_order();
        if order.len() == self.nodes.len() {
            return Ok(());
        }
        let ordered: HashSet<&String> = order.iter().collect();
        let cyclic: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| !ordered.contains(&n.id))
            .map(|n| n.id.as_str())
            .collect();
        Err(WorkflowError::InvalidWorkflow(format!(
            "cyclic dependency involving: {}",
            cyclic.join(", ")
        )))
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.index.get(id).map(|i| &self.nodes[*i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[EdgeConfig] {
        &self.edges
    }

    /// Incoming edges of a node, in declaration order.
    pub fn incoming_edges(&self, id: &str) -> Vec<&EdgeConfig> {
        self.edges.iter().filter(|e| e.target == id).collect()
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing_edges(&self, id: &str) -> Vec<&EdgeConfig> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    pub fn successors(&self, id: &str) -> &[String] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: &str) -> &[String] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// In-degree per node, counting unique predecessors.
    pub fn in_degree_map(&self) -> HashMap<String, usize> {
        self.nodes
            .iter()
            .map(|n| (n.id.clone(), self.predecessors(&n.id).len()))
            .collect()
    }

    /// Nodes with no outgoing edges.
    pub fn terminal_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| self.successors(&n.id).is_empty())
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Topological order with ties broken by node declaration order.
    /// Shorter than `node_count` when the graph has a cycle.
    pub fn topo_order(&self) -> Vec<String> {
        let mut in_degree = self.in_degree_map();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut placed: HashSet<String> = HashSet::new();

        loop {
            let next = self
                .nodes
                .iter()
                .find(|n| !placed.contains(&n.id) && in_degree.get(&n.id) == Some(&0));
            let Some(node) = next else { break };

            placed.insert(node.id.clone());
            order.push(node.id.clone());
            for succ in self.successors(&node.id) {
                if let Some(d) = in_degree.get_mut(succ) {
                    *d = d.saturating_sub(1);
                }
            }
        }

        order
    }
}
