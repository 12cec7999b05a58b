//! JSON handler node: parse, stringify, extract and reshape JSON data.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::nodes::condition::lookup_path;
use crate::registry::NodeHandler;
use crate::types::WorkflowResult;

pub struct JsonHandlerNode;

#[async_trait]
impl NodeHandler for JsonHandlerNode {
    fn type_tag(&self) -> &str {
        "json_handler"
    }

    fn description(&self) -> &str {
        "Parses, stringifies, extracts from and reshapes JSON"
    }

    async fn execute(
        &self,
        _ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let input = inputs
            .get("input")
            .or_else(|| params.get("data"))
            .cloned()
            .unwrap_or(Value::Null);
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("parse");

        match operation {
            "parse" => {
                let data = parse_input(&input)?;
                Ok(json!({"data": data.clone(), "output": data, "operation": "parse"}))
            }
            "stringify" => {
                let pretty = params
                    .get("format_output")
                    .or_else(|| params.get("formatOutput"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let text = if pretty {
                    serde_json::to_string_pretty(&input)?
                } else {
                    serde_json::to_string(&input)?
                };
                Ok(json!({"output": text, "text": text, "operation": "stringify"}))
            }
            "extract" => {
                let path = params
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| WorkflowError::handler("parse", "extract needs a path"))?;
                let data = parse_input(&input)?;
                let found = lookup_path(&data, path);
                let value = match found {
                    Some(value) => value,
                    None => params
                        .get("default_value")
                        .or_else(|| params.get("defaultValue"))
                        .cloned()
                        .ok_or_else(|| {
                            WorkflowError::handler(
                                "parse",
                                format!("path '{}' not found in input", path),
                            )
                        })?,
                };
                Ok(json!({"data": value.clone(), "output": value, "operation": "extract", "path": path}))
            }
            "transform" => {
                let mappings = params
                    .get("transform_keys")
                    .or_else(|| params.get("transformKeys"))
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new()));
                let data = parse_input(&input)?;
                let source = data.as_object().ok_or_else(|| {
                    WorkflowError::handler("parse", "transform needs an object input")
                })?;

                let mut out = Map::new();
                for (old_key, new_key) in key_pairs(&mappings)? {
                    if let Some(value) = source.get(&old_key) {
                        out.insert(new_key, value.clone());
                    }
                }
                let data = Value::Object(out);
                Ok(json!({"data": data.clone(), "output": data, "operation": "transform"}))
            }
            other => Err(WorkflowError::handler(
                "parse",
                format!("unknown json operation '{}'", other),
            )),
        }
    }
}

/// Strings are parsed as JSON; structured values pass through.
fn parse_input(input: &Value) -> WorkflowResult<Value> {
    match input {
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| WorkflowError::handler("parse", format!("invalid JSON input: {}", e))),
        other => Ok(other.clone()),
    }
}

/// Accepts `[["old", "new"], ...]` pairs or an `{"old": "new"}` map.
fn key_pairs(mappings: &Value) -> WorkflowResult<Vec<(String, String)>> {
    match mappings {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let pair = item.as_array().filter(|p| p.len() == 2);
                match pair {
                    Some(p) => Ok((
                        p[0].as_str().unwrap_or_default().to_string(),
                        p[1].as_str().unwrap_or_default().to_string(),
                    )),
                    None => Err(WorkflowError::handler(
                        "parse",
                        "transform_keys entries must be [old, new] pairs",
                    )),
                }
            })
            .collect(),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(old, new)| (old.clone(), new.as_str().unwrap_or_default().to_string()))
            .collect()),
        _ => Err(WorkflowError::handler(
            "parse",
            "transform_keys must be a list or object",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Clock;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::watch;

    fn ctx() -> NodeCtx {
        let (_tx, rx) = watch::channel(false);
        NodeCtx::new("json-0".into(), HashMap::new(), rx, Clock::system())
    }

    fn call_params(raw: Value) -> Map<String, Value> {
        match raw {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn with_input(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("input".to_string(), value);
        map
    }

    #[tokio::test]
    async fn test_parse_string_input() {
        let raw = JsonHandlerNode
            .execute(
                ctx(),
                call_params(json!({})),
                with_input(json!(r#"{"a": [1, 2]}"#)),
            )
            .await
            .unwrap();
        assert_eq!(raw["data"], json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn test_parse_rejects_bad_json() {
        let err = JsonHandlerNode
            .execute(ctx(), call_params(json!({})), with_input(json!("{nope")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "handler_error");
    }

    #[tokio::test]
    async fn test_stringify_pretty() {
        let raw = JsonHandlerNode
            .execute(
                ctx(),
                call_params(json!({"operation": "stringify", "formatOutput": true})),
                with_input(json!({"a": 1})),
            )
            .await
            .unwrap();
        let text = raw["output"].as_str().unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("\"a\": 1"));
    }

    #[tokio::test]
    async fn test_extract_with_array_index() {
        let raw = JsonHandlerNode
            .execute(
                ctx(),
                call_params(json!({"operation": "extract", "path": "data.users.0.name"})),
                with_input(json!({"data": {"users": [{"name": "ada"}]}})),
            )
            .await
            .unwrap();
        assert_eq!(raw["output"], json!("ada"));
    }

    #[tokio::test]
    async fn test_extract_default_value() {
        let raw = JsonHandlerNode
            .execute(
                ctx(),
                call_params(
                    json!({"operation": "extract", "path": "missing", "defaultValue": "fallback"}),
                ),
                with_input(json!({"a": 1})),
            )
            .await
            .unwrap();
        assert_eq!(raw["output"], json!("fallback"));
    }

    #[tokio::test]
    async fn test_extract_missing_without_default_errors() {
        let err = JsonHandlerNode
            .execute(
                ctx(),
                call_params(json!({"operation": "extract", "path": "missing"})),
                with_input(json!({"a": 1})),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_transform_remaps_keys() {
        let raw = JsonHandlerNode
            .execute(
                ctx(),
                call_params(json!({
                    "operation": "transform",
                    "transformKeys": [["first_name", "name"], ["years", "age"]]
                })),
                with_input(json!({"first_name": "ada", "years": 36, "ignored": true})),
            )
            .await
            .unwrap();
        assert_eq!(raw["output"], json!({"age": 36, "name": "ada"}));
    }
}
