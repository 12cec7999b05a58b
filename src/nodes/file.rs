//! File transformer node: converts file content between text, base64
//! and JSON representations.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::registry::NodeHandler;
use crate::template::coerce_to_string;
use crate::types::WorkflowResult;

pub struct FileTransformerNode;

#[async_trait]
impl NodeHandler for FileTransformerNode {
    fn type_tag(&self) -> &str {
        "file_transformer"
    }

    fn description(&self) -> &str {
        "Converts file content between text, base64 and JSON forms"
    }

    async fn execute(
        &self,
        _ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let input = inputs.get("input").cloned().unwrap_or(Value::Null);
        let mut content = extract_content(&input);

        let input_encoding = params
            .get("input_encoding")
            .or_else(|| params.get("inputEncoding"))
            .and_then(Value::as_str);
        if input_encoding == Some("base64") {
            let bytes = STANDARD.decode(content.trim()).map_err(|e| {
                WorkflowError::handler("parse", format!("invalid base64 input: {}", e))
            })?;
            content = String::from_utf8_lossy(&bytes).into_owned();
        }

        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("convert");
        let encoding = params
            .get("encoding")
            .and_then(Value::as_str)
            .unwrap_or("utf-8");

        match operation {
            "convert" => {
                let format = params
                    .get("output_format")
                    .or_else(|| params.get("outputFormat"))
                    .and_then(Value::as_str)
                    .unwrap_or("text");
                let converted = match format {
                    "text" => Value::String(content.clone()),
                    "base64" => Value::String(STANDARD.encode(content.as_bytes())),
                    "json" => json!({"content": content, "encoding": encoding}),
                    other => {
                        return Err(WorkflowError::handler(
                            "parse",
                            format!("unknown output format '{}'", other),
                        ))
                    }
                };
                Ok(json!({
                    "content": converted.clone(),
                    "output": converted,
                    "operation": "convert",
                    "format": format,
                }))
            }
            "extract" => Ok(json!({
                "content": content.clone(),
                "output": content.clone(),
                "metadata": {
                    "length": content.chars().count(),
                    "encoding": encoding,
                },
                "operation": "extract",
            })),
            other => Err(WorkflowError::handler(
                "parse",
                format!("unknown file operation '{}'", other),
            )),
        }
    }
}

/// File payloads arrive as bare strings or as objects with a `content`
/// (or `data`) field.
fn extract_content(input: &Value) -> String {
    match input {
        Value::Object(map) => map
            .get("content")
            .or_else(|| map.get("data"))
            .map(coerce_to_string)
            .unwrap_or_else(|| coerce_to_string(input)),
        other => coerce_to_string(other),
    }
}
