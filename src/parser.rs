//! Workflow document parsing and validation.
//!
//! A workflow document is a JSON object with `nodes` and `edges`:
//!
//! ```json
//! {
//!   "nodes": [
//!     {"id": "input_0", "type": "input", "data": {"params": {"type": "Text"}}}
//!   ],
//!   "edges": [
//!     {"source": "input_0", "target": "output-0", "target_handle": "input"}
//!   ]
//! }
//! ```
//!
//! Handles accept both `source_handle`/`target_handle` and the
//! `sourceHandle`/`targetHandle` form used by older documents.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;
use crate::types::WorkflowResult;

lazy_static! {
    static ref ID_REGEX: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9\-_]*$").unwrap();
}

/// Parameter payload of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A single vertex of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub data: NodeData,
}

impl NodeConfig {
    pub fn params(&self) -> &Map<String, Value> {
        &self.data.params
    }

    /// Human alias for the node, defaulting to the id.
    pub fn node_name(&self) -> String {
        self.data
            .params
            .get("node_name")
            .or_else(|| self.data.params.get("nodeName"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.id.clone())
    }
}

/// A directed edge between two nodes, optionally carrying port handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, alias = "targetHandle", skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WorkflowDocument {
    #[serde(default)]
    nodes: Vec<NodeConfig>,
    #[serde(default)]
    edges: Vec<EdgeConfig>,
}

pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow document from a JSON string and validate its
    /// structure.
    ///
    /// # Errors
    /// * Returns `WorkflowError::InvalidWorkflow` if:
    ///   - The JSON is malformed
    ///   - A node id is empty, malformed or duplicated
    ///   - An edge references an unknown node or loops onto itself
    pub fn parse(workflow_json: &str) -> WorkflowResult<(Vec<NodeConfig>, Vec<EdgeConfig>)> {
        let document: WorkflowDocument = serde_json::from_str(workflow_json)
            .map_err(|e| WorkflowError::InvalidWorkflow(format!("invalid document JSON: {}", e)))?;
        Self::validate(document)
    }

    /// Parse an already deserialized document value.
    pub fn parse_value(document: Value) -> WorkflowResult<(Vec<NodeConfig>, Vec<EdgeConfig>)> {
        let document: WorkflowDocument = serde_json::from_value(document)
            .map_err(|e| WorkflowError::InvalidWorkflow(format!("invalid document: {}", e)))?;
        Self::validate(document)
    }

    fn validate(document: WorkflowDocument) -> WorkflowResult<(Vec<NodeConfig>, Vec<EdgeConfig>)> {
        let mut node_ids = HashSet::new();
        for node in &document.nodes {
            if !ID_REGEX.is_match(&node.id) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "invalid node id: '{}'",
                    node.id
                )));
            }
            if node.type_tag.is_empty() {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "node '{}' has an empty type",
                    node.id
                )));
            }
            if !node_ids.insert(node.id.clone()) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "duplicate node id: '{}'",
                    node.id
                )));
            }
        }

        // Duplicate edges are allowed in documents but collapse to a
        // single dependency here.
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for edge in document.edges {
            if !node_ids.contains(&edge.source) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "edge references unknown source node '{}'",
                    edge.source
                )));
            }
            if !node_ids.contains(&edge.target) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "edge references unknown target node '{}'",
                    edge.target
                )));
            }
            if edge.source == edge.target {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "node '{}' depends on itself",
                    edge.source
                )));
            }
            if seen.insert(edge.clone()) {
                edges.push(edge);
            }
        }

        Ok((document.nodes, edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_parsing() {
        let json = r#"{
            "nodes": [
                {"id": "input_0", "type": "input", "data": {"params": {"type": "Text"}}},
                {"id": "output-0", "type": "output"}
            ],
            "edges": [
                {"source": "input_0", "target": "output-0"}
            ]
        }"#;

        let (nodes, edges) = WorkflowParser::parse(json).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.len(), 1);
        assert_eq!(nodes[0].id, "input_0");
        assert_eq!(nodes[0].type_tag, "input");
        assert_eq!(nodes[0].params().get("type"), Some(&json!("Text")));
        assert_eq!(edges[0].source, "input_0");
        assert_eq!(edges[0].target, "output-0");
    }

    #[test]
    fn test_camel_case_handles() {
        let json = r#"{
            "nodes": [
                {"id": "a", "type": "condition"},
                {"id": "b", "type": "output"}
            ],
            "edges": [
                {"source": "a", "target": "b", "sourceHandle": "p0", "targetHandle": "input"}
            ]
        }"#;

        let (_, edges) = WorkflowParser::parse(json).unwrap();
        assert_eq!(edges[0].source_handle.as_deref(), Some("p0"));
        assert_eq!(edges[0].target_handle.as_deref(), Some("input"));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let json = r#"{
            "nodes": [
                {"id": "a", "type": "input"},
                {"id": "b", "type": "output"}
            ],
            "edges": [
                {"source": "a", "target": "b"},
                {"source": "a", "target": "b"}
            ]
        }"#;

        let (_, edges) = WorkflowParser::parse(json).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let json = r#"{
            "nodes": [
                {"id": "a", "type": "input"},
                {"id": "a", "type": "output"}
            ],
            "edges": []
        }"#;

        let err = WorkflowParser::parse(json).unwrap_err();
        assert_eq!(err.kind(), "invalid_workflow");
    }

    #[test]
    fn test_invalid_node_id_rejected() {
        let json = r#"{"nodes": [{"id": "0bad", "type": "input"}], "edges": []}"#;
        assert!(WorkflowParser::parse(json).is_err());

        let json = r#"{"nodes": [{"id": "has space", "type": "input"}], "edges": []}"#;
        assert!(WorkflowParser::parse(json).is_err());
    }

    #[test]
    fn test_unknown_edge_endpoint_rejected() {
        let json = r#"{
            "nodes": [{"id": "a", "type": "input"}],
            "edges": [{"source": "a", "target": "ghost"}]
        }"#;
        let err = WorkflowParser::parse(json).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_self_edge_rejected() {
        let json = r#"{
            "nodes": [{"id": "a", "type": "input"}],
            "edges": [{"source": "a", "target": "a"}]
        }"#;
        assert!(WorkflowParser::parse(json).is_err());
    }

    #[test]
    fn test_node_name_defaulting() {
        let node: NodeConfig = serde_json::from_value(json!({
            "id": "openai-0",
            "type": "openai",
            "data": {"params": {"nodeName": "Summarizer"}}
        }))
        .unwrap();
        assert_eq!(node.node_name(), "Summarizer");

        let bare: NodeConfig =
            serde_json::from_value(json!({"id": "openai-1", "type": "openai"})).unwrap();
        assert_eq!(bare.node_name(), "openai-1");
    }
}
