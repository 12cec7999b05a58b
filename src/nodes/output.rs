//! Workflow output node.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::context::NodeCtx;
use crate::output::NodeOutput;
use crate::registry::NodeHandler;
use crate::template::coerce_to_string;
use crate::types::WorkflowResult;

lazy_static! {
    static ref OUTPUT_NUM_RE: Regex = Regex::new(r"output[-_]?(\d+)").unwrap();
}

fn default_node_name(node_id: &str, params: &Map<String, Value>) -> String {
    params
        .get("node_name")
        .or_else(|| params.get("nodeName"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let num = OUTPUT_NUM_RE
                .captures(node_id)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "0".to_string());
            format!("output_{}", num)
        })
}

pub struct OutputNode;

#[async_trait]
impl NodeHandler for OutputNode {
    fn type_tag(&self) -> &str {
        "output"
    }

    fn description(&self) -> &str {
        "Renders a template over prior outputs, or passes the upstream value through"
    }

    async fn execute(
        &self,
        ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let node_name = default_node_name(ctx.node_id(), &params);
        let output_type = params
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("Text")
            .to_string();

        // The template arrives already resolved; unresolvable tokens
        // stay verbatim and have been reported as run warnings.
        let template = params
            .get("output")
            .or_else(|| params.get("template"))
            .and_then(Value::as_str)
            .unwrap_or("");

        let rendered = if !template.is_empty() {
            template.to_string()
        } else {
            match inputs.get("input") {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(coerce_to_string)
                    .collect::<Vec<_>>()
                    .join(""),
                Some(value) => coerce_to_string(value),
                None => format!("No output template configured for {}", node_name),
            }
        };

        let mut map = Map::new();
        map.insert("output".to_string(), Value::String(rendered.clone()));
        map.insert("value".to_string(), Value::String(rendered.clone()));
        map.insert("text".to_string(), Value::String(rendered.clone()));
        map.insert("content".to_string(), Value::String(rendered));
        map.insert("type".to_string(), Value::String(output_type));
        if let Some(field_name) = params.get("field_name").or_else(|| params.get("fieldName")) {
            map.insert("field_name".to_string(), field_name.clone());
        }

        Ok(NodeOutput::normalize(Value::Object(map), "output", &node_name, None).into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Clock;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::watch;

    fn ctx(node_id: &str) -> NodeCtx {
        let (_tx, rx) = watch::channel(false);
        NodeCtx::new(node_id.into(), HashMap::new(), rx, Clock::system())
    }

    #[tokio::test]
    async fn test_resolved_template_wins() {
        let mut params = Map::new();
        params.insert("template".to_string(), json!("answer: 4"));
        let mut inputs = Map::new();
        inputs.insert("input".to_string(), json!("ignored"));

        let raw = OutputNode
            .execute(ctx("output-0"), params, inputs)
            .await
            .unwrap();
        assert_eq!(raw["output"], json!("answer: 4"));
        assert_eq!(raw["result"], json!("answer: 4"));
    }

    #[tokio::test]
    async fn test_upstream_fallback() {
        let mut inputs = Map::new();
        inputs.insert("input".to_string(), json!("direct value"));

        let raw = OutputNode
            .execute(ctx("output-0"), Map::new(), inputs)
            .await
            .unwrap();
        assert_eq!(raw["output"], json!("direct value"));
    }

    #[tokio::test]
    async fn test_fan_in_concatenation() {
        let mut inputs = Map::new();
        inputs.insert("input".to_string(), json!(["a", "b"]));

        let raw = OutputNode
            .execute(ctx("output-1"), Map::new(), inputs)
            .await
            .unwrap();
        assert_eq!(raw["output"], json!("ab"));
        assert_eq!(raw["node_name"], json!("output_1"));
    }
}
