//! Text processor node: pure string transforms.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::registry::NodeHandler;
use crate::template::coerce_to_string;
use crate::types::WorkflowResult;

pub struct TextProcessorNode;

#[async_trait]
impl NodeHandler for TextProcessorNode {
    fn type_tag(&self) -> &str {
        "text_processor"
    }

    fn description(&self) -> &str {
        "Transforms, extracts from, splits or analyzes text"
    }

    async fn execute(
        &self,
        _ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let text = inputs
            .get("input")
            .map(coerce_to_string)
            .or_else(|| params.get("text").map(coerce_to_string))
            .unwrap_or_default();
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("transform");

        match operation {
            "transform" => {
                let transform_type = param_str(&params, &["transform_type", "transformType"])
                    .unwrap_or_else(|| "uppercase".to_string());
                let result = apply_transform(&text, &transform_type, &params)?;
                Ok(json!({
                    "text": result,
                    "output": result,
                    "operation": "transform",
                    "transform_type": transform_type,
                }))
            }
            "extract" => {
                let pattern = param_str(&params, &["extract_pattern", "extractPattern", "pattern"])
                    .ok_or_else(|| {
                        WorkflowError::handler("parse", "extract needs an extract_pattern")
                    })?;
                let re = Regex::new(&pattern).map_err(|e| {
                    WorkflowError::handler("parse", format!("invalid extract pattern: {}", e))
                })?;
                let matches: Vec<String> = re
                    .captures_iter(&text)
                    .map(|c| {
                        c.get(1)
                            .or_else(|| c.get(0))
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default()
                    })
                    .collect();
                Ok(json!({
                    "matches": matches,
                    "output": matches,
                    "count": matches.len(),
                    "operation": "extract",
                }))
            }
            "split" => {
                let delimiter = param_str(&params, &["split_delimiter", "splitDelimiter"])
                    .unwrap_or_else(|| ",".to_string());
                let parts: Vec<String> = text
                    .split(delimiter.as_str())
                    .map(|p| p.trim().to_string())
                    .collect();
                Ok(json!({
                    "parts": parts,
                    "output": parts,
                    "count": parts.len(),
                    "operation": "split",
                }))
            }
            "analyze" => {
                let words = text.split_whitespace().count();
                let stats = json!({
                    "characters": text.chars().count(),
                    "words": words,
                    "lines": text.lines().count(),
                });
                Ok(json!({
                    "output": stats,
                    "text": text,
                    "operation": "analyze",
                }))
            }
            other => Err(WorkflowError::handler(
                "parse",
                format!("unknown text operation '{}'", other),
            )),
        }
    }
}

fn apply_transform(
    text: &str,
    transform_type: &str,
    params: &Map<String, Value>,
) -> WorkflowResult<String> {
    Ok(match transform_type {
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        "capitalize" => {
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        }
        "title" => text
            .split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        "strip" | "trim" => text.trim().to_string(),
        "replace" => {
            let pattern = param_str(params, &["pattern"]).unwrap_or_default();
            let replacement = param_str(params, &["replacement"]).unwrap_or_default();
            text.replace(pattern.as_str(), &replacement)
        }
        "regex_replace" => {
            let pattern = param_str(params, &["pattern"]).unwrap_or_default();
            let replacement = param_str(params, &["replacement"]).unwrap_or_default();
            let re = Regex::new(&pattern).map_err(|e| {
                WorkflowError::handler("parse", format!("invalid replace pattern: {}", e))
            })?;
            re.replace_all(text, replacement.as_str()).into_owned()
        }
        other => {
            return Err(WorkflowError::handler(
                "parse",
                format!("unknown transform type '{}'", other),
            ))
        }
    })
}

fn param_str(params: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| params.get(*k))
        .and_then(Value::as_str)
        .map(str::to_string)
}
