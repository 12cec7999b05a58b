//! Per-node input assembly.
//!
//! Before a node runs, its incoming edges are collected into an input
//! bundle and its parameters are deep-copied with every string passed
//! through the template resolver. This is the only place variable
//! resolution happens; handlers never see raw `{{...}}` tokens unless
//! they were unresolvable.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::graph::WorkflowGraph;
use crate::output::NodeOutput;
use crate::parser::NodeConfig;
use crate::template::{self, TemplateWarning};

lazy_static! {
    static ref TRAILING_NUM_RE: Regex = Regex::new(r"(\d+)$").unwrap();
}

/// Assembled call material for one node.
#[derive(Debug, Clone)]
pub struct AssembledInput {
    pub params: Map<String, Value>,
    pub inputs: Map<String, Value>,
    pub warnings: Vec<TemplateWarning>,
}

/// Build the input bundle and resolved params for `node`.
///
/// Incoming edges are grouped by target handle (unnamed handles group
/// under `input`). A group with one satisfied edge binds the upstream
/// value directly; a group with several binds a list in edge
/// declaration order. Edges whose source produced no output (failed or
/// skipped predecessors) contribute nothing.
///
/// For `input`-typed nodes the ambient run inputs are probed under
/// `input`, `input_<n>`, the node name and the raw id, in that
/// precedence.
pub fn assemble(
    node: &NodeConfig,
    graph: &WorkflowGraph,
    outputs: &HashMap<String, NodeOutput>,
    run_inputs: &Map<String, Value>,
) -> AssembledInput {
    let mut groups: Vec<(String, Vec<Value>)> = Vec::new();

    for edge in graph.incoming_edges(&node.id) {
        let Some(record) = outputs.get(&edge.source) else {
            continue;
        };
        let value = edge
            .source_handle
            .as_deref()
            .and_then(|handle| record.get(handle))
            .unwrap_or_else(|| record.primary())
            .clone();

        let handle = edge.target_handle.clone().unwrap_or_else(|| "input".into());
        match groups.iter_mut().find(|(k, _)| *k == handle) {
            Some((_, values)) => values.push(value),
            None => groups.push((handle, vec![value])),
        }
    }

    let mut inputs = Map::new();
    for (handle, mut values) in groups {
        let bound = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        inputs.insert(handle, bound);
    }

    if node.type_tag == "input" && !inputs.contains_key("input") {
        if let Some(value) = ambient_input_for(node, run_inputs) {
            inputs.insert("input".to_string(), value);
        }
    }

    let (resolved, warnings) =
        template::resolve_params(&Value::Object(node.params().clone()), outputs);
    let params = match resolved {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    AssembledInput {
        params,
        inputs,
        warnings,
    }
}

/// Probe the ambient run inputs for an input node, unwrapping
/// `{"value": ..., "type": ...}` envelopes.
pub(crate) fn ambient_input_for(node: &NodeConfig, run_inputs: &Map<String, Value>) -> Option<Value> {
    let mut keys = vec!["input".to_string()];
    if let Some(m) = TRAILING_NUM_RE.find(&node.id) {
        keys.push(format!("input_{}", m.as_str()));
    }
    keys.push(node.node_name());
    keys.push(node.id.clone());

    for key in keys {
        if let Some(value) = run_inputs.get(&key) {
            return Some(unwrap_envelope(value));
        }
    }
    None
}

fn unwrap_envelope(value: &Value) -> Value {
    if let Value::Object(map) = value {
        if let Some(inner) = map.get("value") {
            return inner.clone();
        }
    }
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::EdgeConfig;
    use serde_json::json;

    fn node(id: &str, type_tag: &str, params: Value) -> NodeConfig {
        serde_json::from_value(json!({"id": id, "type": type_tag, "data": {"params": params}}))
            .unwrap()
    }

    fn edge(source: &str, target: &str, target_handle: Option<&str>) -> EdgeConfig {
        EdgeConfig {
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: target_handle.map(str::to_string),
        }
    }

    fn record(raw: Value) -> NodeOutput {
        NodeOutput::normalize(raw, "test", "test", None)
    }

    #[test]
    fn test_single_edge_binds_primary() {
        let nodes = vec![
            node("a", "input", json!({})),
            node("b", "output", json!({})),
        ];
        let edges = vec![edge("a", "b", None)];
        let graph = WorkflowGraph::new(nodes.clone(), edges).unwrap();

        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), record(json!({"output": "hello"})));

        let assembled = assemble(&nodes[1], &graph, &outputs, &Map::new());
        assert_eq!(assembled.inputs.get("input"), Some(&json!("hello")));
    }

    #[test]
    fn test_fan_in_binds_list_in_edge_order() {
        let nodes = vec![
            node("a", "input", json!({})),
            node("b", "input", json!({})),
            node("m", "merge", json!({})),
        ];
        let edges = vec![edge("a", "m", None), edge("b", "m", None)];
        let graph = WorkflowGraph::new(nodes.clone(), edges).unwrap();

        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), record(json!({"output": "first"})));
        outputs.insert("b".to_string(), record(json!({"output": "second"})));

        let assembled = assemble(&nodes[2], &graph, &outputs, &Map::new());
        assert_eq!(
            assembled.inputs.get("input"),
            Some(&json!(["first", "second"]))
        );
    }

    #[test]
    fn test_source_handle_selects_field() {
        let nodes = vec![
            node("ai", "openai", json!({})),
            node("o", "output", json!({})),
        ];
        let mut e = edge("ai", "o", None);
        e.source_handle = Some("usage".to_string());
        let graph = WorkflowGraph::new(nodes.clone(), vec![e]).unwrap();

        let mut outputs = HashMap::new();
        outputs.insert(
            "ai".to_string(),
            record(json!({"output": "text", "usage": {"tokens": 5}})),
        );

        let assembled = assemble(&nodes[1], &graph, &outputs, &Map::new());
        assert_eq!(assembled.inputs.get("input"), Some(&json!({"tokens": 5})));
    }

    #[test]
    fn test_dead_predecessor_contributes_nothing() {
        let nodes = vec![
            node("a", "input", json!({})),
            node("b", "input", json!({})),
            node("m", "merge", json!({})),
        ];
        let edges = vec![edge("a", "m", None), edge("b", "m", None)];
        let graph = WorkflowGraph::new(nodes.clone(), edges).unwrap();

        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), record(json!({"output": "alive"})));

        let assembled = assemble(&nodes[2], &graph, &outputs, &Map::new());
        assert_eq!(assembled.inputs.get("input"), Some(&json!("alive")));
    }

    #[test]
    fn test_ambient_input_precedence() {
        let input_node = node("input-1", "input", json!({"nodeName": "question"}));
        let graph = WorkflowGraph::new(vec![input_node.clone()], vec![]).unwrap();

        // Generic key wins over the numbered key.
        let mut run_inputs = Map::new();
        run_inputs.insert("input".to_string(), json!("generic"));
        run_inputs.insert("input_1".to_string(), json!("numbered"));
        let assembled = assemble(&input_node, &graph, &HashMap::new(), &run_inputs);
        assert_eq!(assembled.inputs.get("input"), Some(&json!("generic")));

        // Numbered key wins over the node name.
        let mut run_inputs = Map::new();
        run_inputs.insert("input_1".to_string(), json!("numbered"));
        run_inputs.insert("question".to_string(), json!("named"));
        let assembled = assemble(&input_node, &graph, &HashMap::new(), &run_inputs);
        assert_eq!(assembled.inputs.get("input"), Some(&json!("numbered")));

        // Node name wins over the raw id.
        let mut run_inputs = Map::new();
        run_inputs.insert("question".to_string(), json!("named"));
        run_inputs.insert("input-1".to_string(), json!("raw"));
        let assembled = assemble(&input_node, &graph, &HashMap::new(), &run_inputs);
        assert_eq!(assembled.inputs.get("input"), Some(&json!("named")));
    }

    #[test]
    fn test_envelope_unwrapping() {
        let input_node = node("input_0", "input", json!({}));
        let graph = WorkflowGraph::new(vec![input_node.clone()], vec![]).unwrap();

        let mut run_inputs = Map::new();
        run_inputs.insert("input".to_string(), json!({"value": "payload", "type": "Text"}));
        let assembled = assemble(&input_node, &graph, &HashMap::new(), &run_inputs);
        assert_eq!(assembled.inputs.get("input"), Some(&json!("payload")));
    }

    #[test]
    fn test_params_are_template_resolved() {
        let nodes = vec![
            node("input_0", "input", json!({})),
            node(
                "openai-0",
                "openai",
                json!({"prompt": "Q: {{input_0.text}}", "temperature": 0.7}),
            ),
        ];
        let edges = vec![edge("input_0", "openai-0", None)];
        let graph = WorkflowGraph::new(nodes.clone(), edges).unwrap();

        let mut outputs = HashMap::new();
        outputs.insert(
            "input_0".to_string(),
            record(json!({"output": "what is 2+2?", "text": "what is 2+2?"})),
        );

        let assembled = assemble(&nodes[1], &graph, &outputs, &Map::new());
        assert_eq!(
            assembled.params.get("prompt"),
            Some(&json!("Q: what is 2+2?"))
        );
        assert_eq!(assembled.params.get("temperature"), Some(&json!(0.7)));
        assert!(assembled.warnings.is_empty());
    }

    #[test]
    fn test_unresolved_param_warns() {
        let o = node("o", "output", json!({"template": "{{ghost.output}}"}));
        let graph = WorkflowGraph::new(vec![o.clone()], vec![]).unwrap();
        let assembled = assemble(&o, &graph, &HashMap::new(), &Map::new());
        assert_eq!(
            assembled.params.get("template"),
            Some(&json!("{{ghost.output}}"))
        );
        assert_eq!(assembled.warnings.len(), 1);
    }
}
