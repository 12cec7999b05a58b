//! Workflow input node.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::output::NodeOutput;
use crate::registry::NodeHandler;
use crate::template::coerce_to_string;
use crate::types::WorkflowResult;

lazy_static! {
    static ref INPUT_NUM_RE: Regex = Regex::new(r"input[-_]?(\d+)").unwrap();
}

/// Field name carrying the typed value, by declared input type.
pub fn type_field_for(input_type: &str) -> &'static str {
    match input_type {
        "Image" => "image",
        "Audio" => "audio",
        "File" => "file",
        "JSON" => "json",
        // "Text", "Formatted Text" and anything unrecognized.
        _ => "text",
    }
}

/// Human alias for an input node: the configured name, or `input_<n>`
/// derived from the node id.
pub fn default_node_name(node_id: &str, params: &Map<String, Value>) -> String {
    params
        .get("node_name")
        .or_else(|| params.get("nodeName"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let num = INPUT_NUM_RE
                .captures(node_id)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "0".to_string());
            format!("input_{}", num)
        })
}

/// Build the canonical record for an input node. Also used by the run
/// coordinator to seed the output table before scheduling, so templates
/// that reference an input without an edge still resolve.
pub fn build_output(node_id: &str, params: &Map<String, Value>, value: &Value) -> NodeOutput {
    let node_name = default_node_name(node_id, params);
    let input_type = params
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("Text")
        .to_string();
    let type_field = type_field_for(&input_type);
    let input_str = coerce_to_string(value);

    let mut map = Map::new();
    map.insert("output".to_string(), Value::String(input_str.clone()));
    map.insert("content".to_string(), Value::String(input_str.clone()));
    map.insert("value".to_string(), Value::String(input_str.clone()));
    map.insert("text".to_string(), Value::String(input_str.clone()));
    map.insert(type_field.to_string(), Value::String(input_str));
    map.insert("type".to_string(), Value::String(input_type));
    map.insert("input_raw".to_string(), value.clone());

    NodeOutput::normalize(Value::Object(map), "input", &node_name, Some(type_field))
}

pub struct InputNode;

#[async_trait]
impl NodeHandler for InputNode {
    fn type_tag(&self) -> &str {
        "input"
    }

    fn description(&self) -> &str {
        "Exposes one run input as a typed node output"
    }

    async fn execute(
        &self,
        ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let value = inputs.get("input").ok_or_else(|| {
            WorkflowError::MissingInput(format!(
                "no run input found for input node '{}'",
                ctx.node_id()
            ))
        })?;

        Ok(build_output(ctx.node_id(), &params, value).into_value())
    }
}
