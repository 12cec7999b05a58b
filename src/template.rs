//! Variable template resolution.
//!
//! Templates embed `{{ node_ref.field }}` tokens that are substituted
//! with values from the run's output table. Node references are matched
//! loosely because workflow documents carry several historical id
//! conventions (`input_0`, `input-0`, `input_input0`); the normalization
//! ladder below encodes those conventions as rules rather than stored
//! aliases. Resolution is a single pass: substituted text is never
//! re-scanned for tokens.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::output::{NodeOutput, METADATA_FIELDS};

lazy_static! {
    static ref TOKEN_RE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+)\.([A-Za-z0-9_\-]+)\s*\}\}").unwrap();
    static ref TRAILING_NUM_RE: Regex = Regex::new(r"[-_]?(\d+)$").unwrap();
}

/// Field lookup order when the requested field is absent from a record.
pub const FIELD_FALLBACK: [&str; 6] = ["output", "text", "content", "response", "result", "value"];

/// A token that could not be resolved. The token itself is preserved
/// verbatim in the produced text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateWarning {
    pub token: String,
    pub reason: String,
}

/// Result of resolving one template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub text: String,
    pub warnings: Vec<TemplateWarning>,
}

/// Substitute every recognized token in `template` with values from the
/// output table. Tokens with an unrecognized shape are left untouched;
/// tokens that fail node or field lookup are kept verbatim and reported
/// as warnings.
pub fn resolve_template(template: &str, outputs: &HashMap<String, NodeOutput>) -> Resolved {
    if !template.contains("{{") {
        return Resolved {
            text: template.to_string(),
            warnings: Vec::new(),
        };
    }

    let mut warnings = Vec::new();
    let text = TOKEN_RE
        .replace_all(template, |caps: &Captures| {
            let node_ref = &caps[1];
            let field = &caps[2];
            match lookup(node_ref, field, outputs) {
                Ok(value) => coerce_to_string(&value),
                Err(reason) => {
                    warnings.push(TemplateWarning {
                        token: format!("{}.{}", node_ref, field),
                        reason,
                    });
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Resolved { text, warnings }
}

/// Resolve templates in every string found inside `params`, descending
/// into nested objects and arrays. Non-string leaves pass through
/// unchanged.
pub fn resolve_params(
    params: &Value,
    outputs: &HashMap<String, NodeOutput>,
) -> (Value, Vec<TemplateWarning>) {
    let mut warnings = Vec::new();
    let resolved = resolve_params_inner(params, outputs, &mut warnings);
    (resolved, warnings)
}

fn resolve_params_inner(
    value: &Value,
    outputs: &HashMap<String, NodeOutput>,
    warnings: &mut Vec<TemplateWarning>,
) -> Value {
    match value {
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (key, item) in map {
                result.insert(key.clone(), resolve_params_inner(item, outputs, warnings));
            }
            Value::Object(result)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|item| resolve_params_inner(item, outputs, warnings))
                .collect(),
        ),
        Value::String(s) => {
            let resolved = resolve_template(s, outputs);
            warnings.extend(resolved.warnings);
            Value::String(resolved.text)
        }
        other => other.clone(),
    }
}

fn lookup(
    node_ref: &str,
    field: &str,
    outputs: &HashMap<String, NodeOutput>,
) -> Result<Value, String> {
    let key = normalize_node_ref(node_ref, outputs)
        .ok_or_else(|| format!("node '{}' not found", node_ref))?;
    let record = &outputs[&key];
    resolve_field(record, field)
        .cloned()
        .ok_or_else(|| format!("field '{}' not found in node '{}'", field, key))
}

/// Match a requested node reference against the output table keys.
///
/// The ladder, in order: exact match, `-`/`_` exchange, trailing-number
/// alignment (same number, requested stem contained in the key), and a
/// prefix-family pass where the key merely has to contain the stem and
/// end with the same number.
pub fn normalize_node_ref(
    requested: &str,
    outputs: &HashMap<String, NodeOutput>,
) -> Option<String> {
    if outputs.contains_key(requested) {
        return Some(requested.to_string());
    }

    let dashed = requested.replace('_', "-");
    if outputs.contains_key(&dashed) {
        return Some(dashed);
    }
    let underscored = requested.replace('-', "_");
    if outputs.contains_key(&underscored) {
        return Some(underscored);
    }

    // Candidate scan order is sorted so fuzzy matches are deterministic.
    let mut keys: Vec<&String> = outputs.keys().collect();
    keys.sort();

    let (stem, num) = split_trailing_number(requested);
    if let Some(num) = num {
        for key in &keys {
            let (_, key_num) = split_trailing_number(key);
            if key_num == Some(num) && !stem.is_empty() && key.contains(stem) {
                return Some((*key).to_string());
            }
        }
        for key in &keys {
            if !stem.is_empty() && key.contains(stem) && key.ends_with(&num.to_string()) {
                return Some((*key).to_string());
            }
        }
    }

    None
}

fn split_trailing_number(s: &str) -> (&str, Option<u64>) {
    if let Some(m) = TRAILING_NUM_RE.find(s) {
        let digits = s[m.start()..].trim_start_matches(['-', '_']);
        if let Ok(n) = digits.parse::<u64>() {
            return (&s[..m.start()], Some(n));
        }
    }
    (s, None)
}

/// Locate a field inside a record: exact name, lowercase form, the
/// standard fallback ladder, and finally the first non-metadata field.
pub fn resolve_field<'a>(record: &'a NodeOutput, field: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(field) {
        return Some(value);
    }

    let lower = field.to_lowercase();
    if lower != field {
        if let Some(value) = record.get(&lower) {
            return Some(value);
        }
    }

    for candidate in FIELD_FALLBACK {
        if let Some(value) = record.get(candidate) {
            return Some(value);
        }
    }

    record
        .fields()
        .find(|(key, _)| !METADATA_FIELDS.contains(&key.as_str()))
        .map(|(_, value)| value)
}

/// Stringify a resolved value: strings pass through, null becomes the
/// empty string, scalars use their textual form and structured values
/// their canonical JSON form.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
