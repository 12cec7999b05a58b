//! Condition node: routes execution down the first matching path.
//!
//! Params shape:
//!
//! ```json
//! {
//!   "paths": [
//!     {"id": "p0", "clauses": [
//!       {"field": "input.score", "operator": ">", "value": 0.5},
//!       {"field": "input.label", "operator": "==", "value": "ok", "logic": "AND"}
//!     ]}
//!   ]
//! }
//! ```
//!
//! The matched path id is returned as the primary value and as
//! `matched_path`; the executor disables every outgoing edge whose
//! source handle names a different path.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::registry::NodeHandler;
use crate::types::WorkflowResult;

#[derive(Debug, Clone, Deserialize)]
struct PathSpec {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    clauses: Vec<ClauseSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClauseSpec {
    #[serde(alias = "inputField")]
    field: String,
    operator: String,
    #[serde(default)]
    value: Value,
    /// Combination with the preceding clause, `AND` (default) or `OR`.
    #[serde(default)]
    logic: Option<String>,
}

pub struct ConditionNode;

#[async_trait]
impl NodeHandler for ConditionNode {
    fn type_tag(&self) -> &str {
        "condition"
    }

    fn description(&self) -> &str {
        "Evaluates ordered clause paths and selects one outgoing branch"
    }

    async fn execute(
        &self,
        _ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let paths: Vec<PathSpec> = match params.get("paths") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                WorkflowError::handler("parse", format!("invalid condition paths: {}", e))
            })?,
            None => Vec::new(),
        };

        let inputs = Value::Object(inputs);
        for (index, path) in paths.iter().enumerate() {
            let path_id = path
                .id
                .clone()
                .unwrap_or_else(|| format!("p{}", index));
            if eval_path(&path.clauses, &inputs)? {
                return Ok(serde_json::json!({
                    "output": path_id,
                    "matched_path": path_id,
                }));
            }
        }

        Ok(serde_json::json!({
            "output": Value::Null,
            "matched_path": Value::Null,
        }))
    }
}

fn eval_path(clauses: &[ClauseSpec], inputs: &Value) -> WorkflowResult<bool> {
    let mut acc: Option<bool> = None;
    for clause in clauses {
        let left = lookup_path(inputs, &clause.field).unwrap_or(Value::Null);
        let result = eval_clause(&left, &clause.operator, &clause.value)?;
        acc = Some(match (acc, clause.logic.as_deref()) {
            (None, _) => result,
            (Some(prev), Some(logic)) if logic.eq_ignore_ascii_case("or") => prev || result,
            (Some(prev), _) => prev && result,
        });
    }
    Ok(acc.unwrap_or(false))
}

/// Walk a dotted path through objects and array indices.
pub fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn eval_clause(left: &Value, operator: &str, right: &Value) -> WorkflowResult<bool> {
    match operator {
        "==" => Ok(loose_eq(left, right)),
        "!=" => Ok(!loose_eq(left, right)),
        ">" | ">=" | "<" | "<=" => {
            let ordering = compare_order(left, right).ok_or_else(|| {
                WorkflowError::handler(
                    "parse",
                    format!("values are not comparable with '{}'", operator),
                )
            })?;
            Ok(match operator {
                ">" => ordering.is_gt(),
                ">=" => ordering.is_ge(),
                "<" => ordering.is_lt(),
                _ => ordering.is_le(),
            })
        }
        "contains" => Ok(contains(left, right)),
        "not_contains" => Ok(!contains(left, right)),
        "startswith" => Ok(as_text(left).starts_with(&as_text(right))),
        "endswith" => Ok(as_text(left).ends_with(&as_text(right))),
        "is_empty" => Ok(is_empty(left)),
        "is_not_empty" => Ok(!is_empty(left)),
        "matches_regex" => {
            let pattern = Regex::new(&as_text(right)).map_err(|e| {
                WorkflowError::handler("parse", format!("invalid regex: {}", e))
            })?;
            Ok(pattern.is_match(&as_text(left)))
        }
        "in_list" => Ok(in_list(left, right)),
        "not_in_list" => Ok(!in_list(left, right)),
        "length_equals" | "length_greater_than" | "length_less_than" => {
            let len = length_of(left);
            let target = as_number(right).ok_or_else(|| {
                WorkflowError::handler("parse", "length comparison needs a numeric value")
            })? as usize;
            Ok(match operator {
                "length_equals" => len == target,
                "length_greater_than" => len > target,
                _ => len < target,
            })
        }
        "date_before" | "date_after" | "date_equals" => {
            let lhs = parse_date(left).ok_or_else(|| bad_date(left))?;
            let rhs = parse_date(right).ok_or_else(|| bad_date(right))?;
            Ok(match operator {
                "date_before" => lhs < rhs,
                "date_after" => lhs > rhs,
                _ => lhs.date_naive() == rhs.date_naive(),
            })
        }
        "date_between" => {
            let lhs = parse_date(left).ok_or_else(|| bad_date(left))?;
            let bounds = right.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                WorkflowError::handler("parse", "date_between needs a [start, end] pair")
            })?;
            let start = parse_date(&bounds[0]).ok_or_else(|| bad_date(&bounds[0]))?;
            let end = parse_date(&bounds[1]).ok_or_else(|| bad_date(&bounds[1]))?;
            Ok(lhs >= start && lhs <= end)
        }
        "type_equals" => {
            let name = match left {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            };
            Ok(as_text(right).eq_ignore_ascii_case(name))
        }
        other => Err(WorkflowError::handler(
            "parse",
            format!("unsupported operator '{}'", other),
        )),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a == b;
    }
    if left == right {
        return true;
    }
    as_text(left) == as_text(right)
}

fn compare_order(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, right)),
        Value::Object(map) => map.contains_key(&as_text(right)),
        _ => as_text(left).contains(&as_text(right)),
    }
}

fn in_list(left: &Value, right: &Value) -> bool {
    match right {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, left)),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

fn length_of(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(m) => m.len(),
        Value::Null => 0,
        _ => as_text(value).chars().count(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(*b as u8 as f64),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    crate::template::coerce_to_string(value)
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates.
fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

fn bad_date(value: &Value) -> WorkflowError {
    WorkflowError::handler("parse", format!("'{}' is not a date", as_text(value)))
}
