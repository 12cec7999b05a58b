//! Merge node: combines fan-in values under a declared strategy.

use async_trait::async_trait;
use json_value_merge::Merge;
use serde_json::{Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::registry::NodeHandler;
use crate::types::WorkflowResult;

pub struct MergeNode;

#[async_trait]
impl NodeHandler for MergeNode {
    fn type_tag(&self) -> &str {
        "merge"
    }

    fn description(&self) -> &str {
        "Combines upstream values: pick_first, join_all, concat_arrays, merge_objects, avg, min, max, create_object"
    }

    async fn execute(
        &self,
        _ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let strategy = params
            .get("strategy")
            .or_else(|| params.get("function"))
            .and_then(Value::as_str)
            .unwrap_or("pick_first")
            .to_string();
        let delimiter = params
            .get("delimiter")
            .and_then(Value::as_str)
            .unwrap_or(", ")
            .to_string();

        // Fan-in groups arrive as lists; one flattening level recovers
        // the individual upstream values.
        let values: Vec<Value> = inputs
            .values()
            .flat_map(|v| match v {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            })
            .collect();

        let merged = match strategy.as_str() {
            "pick_first" => values
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null),
            "join_all" => join_all(&values, &delimiter),
            "concat_arrays" => {
                let mut out = Vec::new();
                for value in values {
                    match value {
                        Value::Array(items) => out.extend(items),
                        other => out.push(other),
                    }
                }
                Value::Array(out)
            }
            "merge_objects" => {
                let mut out = Value::Object(Map::new());
                for value in values.iter().filter(|v| v.is_object()) {
                    out.merge(value);
                }
                out
            }
            "avg" | "min" | "max" => fold_numeric(&strategy, &values)?,
            "create_object" => Value::Object(inputs.clone()),
            other => {
                return Err(WorkflowError::handler(
                    "parse",
                    format!("unknown merge strategy '{}'", other),
                ))
            }
        };

        Ok(serde_json::json!({
            "output": merged,
            "strategy": strategy,
        }))
    }
}

/// Strings join with the delimiter, pure numbers sum, anything mixed or
/// structured comes back as a list.
fn join_all(values: &[Value], delimiter: &str) -> Value {
    if !values.is_empty() && values.iter().all(|v| v.is_string()) {
        let joined = values
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(delimiter);
        return Value::String(joined);
    }
    if !values.is_empty() && values.iter().all(|v| v.is_number()) {
        let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
        return number(sum);
    }
    Value::Array(values.to_vec())
}

fn fold_numeric(strategy: &str, values: &[Value]) -> WorkflowResult<Value> {
    let numbers: Vec<f64> = values.iter().filter_map(to_f64).collect();
    if numbers.is_empty() {
        return Err(WorkflowError::handler(
            "parse",
            format!("merge strategy '{}' needs numeric inputs", strategy),
        ));
    }
    let result = match strategy {
        "avg" => numbers.iter().sum::<f64>() / numbers.len() as f64,
        "min" => numbers.iter().cloned().fold(f64::INFINITY, f64::min),
        _ => numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    };
    Ok(number(result))
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
