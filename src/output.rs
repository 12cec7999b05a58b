use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Alias fields materialized on every node output. Readers may address
/// any of them and receive the primary value unless the handler set a
/// distinct one.
pub const ALIAS_FIELDS: [&str; 6] = ["output", "content", "text", "response", "value", "result"];

/// When a handler returns a mapping without `output`, the primary value
/// is chosen from these fields in order.
pub const PRIMARY_CANDIDATES: [&str; 5] = ["text", "content", "response", "result", "value"];

/// Fields that never act as a value source during fallback resolution.
pub const METADATA_FIELDS: [&str; 6] = [
    "type",
    "node_name",
    "usage",
    "model",
    "execution_time",
    "input_raw",
];

/// Normalized record produced by a node.
///
/// Internally a JSON object; the `output` field always holds the
/// primary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOutput(Map<String, Value>);

impl NodeOutput {
    /// Coerce a raw handler return value into a canonical record.
    ///
    /// Rules:
    /// - A mapping with an `output` field keeps it as primary and all
    ///   supplied keys are preserved.
    /// - A mapping without `output` promotes the first of `text`,
    ///   `content`, `response`, `result`, `value` to primary, falling
    ///   back to the first non-metadata field.
    /// - Any other value becomes the primary directly.
    /// - All six alias fields are materialized; fields the handler
    ///   supplied are never overwritten.
    /// - `type` and `node_name` are attached when the handler did not
    ///   set them.
    ///
    /// `type_field`, when given, additionally materializes the declared
    /// I/O field of input nodes (`text`, `image`, `audio`, `file` or
    /// `json`) with the primary value.
    pub fn normalize(
        raw: Value,
        type_tag: &str,
        node_name: &str,
        type_field: Option<&str>,
    ) -> Self {
        let mut map = match raw {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("output".to_string(), other);
                map
            }
        };

        if !map.contains_key("output") {
            let primary = PRIMARY_CANDIDATES
                .iter()
                .find_map(|f| map.get(*f).cloned())
                .or_else(|| {
                    map.iter()
                        .find(|(k, _)| !METADATA_FIELDS.contains(&k.as_str()))
                        .map(|(_, v)| v.clone())
                })
                .unwrap_or(Value::Null);
            map.insert("output".to_string(), primary);
        }

        let primary = map.get("output").cloned().unwrap_or(Value::Null);
        for alias in ALIAS_FIELDS {
            if !map.contains_key(alias) {
                map.insert(alias.to_string(), primary.clone());
            }
        }

        if let Some(field) = type_field {
            if !map.contains_key(field) {
                map.insert(field.to_string(), primary.clone());
            }
        }

        if !map.contains_key("type") {
            map.insert("type".to_string(), Value::String(type_tag.to_string()));
        }
        if !map.contains_key("node_name") {
            map.insert("node_name".to_string(), Value::String(node_name.to_string()));
        }

        Self(map)
    }

    /// Build directly from an already normalized map.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// The canonical result of the node.
    pub fn primary(&self) -> &Value {
        self.0.get("output").unwrap_or(&Value::Null)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_normalization() {
        let out = NodeOutput::normalize(json!("hello"), "text_processor", "proc_0", None);
        for alias in ALIAS_FIELDS {
            assert_eq!(out.get(alias), Some(&json!("hello")), "alias {}", alias);
        }
        assert_eq!(out.get("type"), Some(&json!("text_processor")));
        assert_eq!(out.get("node_name"), Some(&json!("proc_0")));
    }

    #[test]
    fn test_mapping_with_output_preserves_fields() {
        let raw = json!({"output": "main", "response": "other", "model": "gpt-4o"});
        let out = NodeOutput::normalize(raw, "openai", "openai_0", None);
        assert_eq!(out.primary(), &json!("main"));
        assert_eq!(out.get("response"), Some(&json!("other")));
        assert_eq!(out.get("model"), Some(&json!("gpt-4o")));
        assert_eq!(out.get("text"), Some(&json!("main")));
    }

    #[test]
    fn test_mapping_without_output_promotes_candidate() {
        let raw = json!({"content": "from content", "extra": 1});
        let out = NodeOutput::normalize(raw, "ai_tools", "ai_0", None);
        assert_eq!(out.primary(), &json!("from content"));
        assert_eq!(out.get("content"), Some(&json!("from content")));
    }

    #[test]
    fn test_first_non_metadata_field_fallback() {
        let raw = json!({"type": "github", "node_name": "gh", "repositories": ["a", "b"]});
        let out = NodeOutput::normalize(raw, "github", "gh", None);
        assert_eq!(out.primary(), &json!(["a", "b"]));
    }

    #[test]
    fn test_input_type_field() {
        let out = NodeOutput::normalize(json!({"output": "42"}), "input", "input_0", Some("json"));
        assert_eq!(out.get("json"), Some(&json!("42")));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = json!({"response": "r", "usage": {"total_tokens": 10}});
        let once = NodeOutput::normalize(raw, "openai", "openai-0", None);
        let twice = NodeOutput::normalize(once.clone().into_value(), "openai", "openai-0", None);
        assert_eq!(once, twice);
    }
}
