//! HTTP request integration node.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::registry::{HandlerKind, NodeHandler};
use crate::types::WorkflowResult;

pub struct HttpRequestNode;

#[async_trait]
impl NodeHandler for HttpRequestNode {
    fn type_tag(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Executes an HTTP request and captures the response body and status"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Integration
    }

    async fn execute(
        &self,
        _ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkflowError::MissingInput("url must be a string".to_string()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(WorkflowError::handler(
                "parse",
                "url must start with http:// or https://",
            ));
        }

        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| WorkflowError::handler("parse", format!("invalid method '{}'", method)))?;

        let timeout = params
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(30);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| WorkflowError::Execution(e.to_string()))?;

        let mut request = client.request(method, url);
        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(text) = value.as_str() {
                    request = request.header(key, text);
                }
            }
        }

        // An explicit body param wins over the upstream input value.
        let body = params.get("body").or_else(|| inputs.get("input"));
        if let Some(body) = body {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request.send().await.map_err(|e| WorkflowError::Handler {
            kind: "upstream_http".to_string(),
            message: e.to_string(),
            retriable: e.is_timeout() || e.is_connect(),
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WorkflowError::handler("upstream_http", e.to_string()))?;

        if !status.is_success() {
            return Err(WorkflowError::Handler {
                kind: "upstream_http".to_string(),
                message: format!("request returned status {}", status.as_u16()),
                retriable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(json!({
            "output": body,
            "status": status.as_u16(),
        }))
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
        NodeCtx::new("http-0".into(), HashMap::new(), rx, Clock::system())
    }

    fn call_params(raw: Value) -> Map<String, Value> {
        match raw {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_url_fails() {
        let err = HttpRequestNode
            .execute(ctx(), Map::new(), Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "missing_input");
    }

    #[tokio::test]
    async fn test_non_http_scheme_rejected() {
        let err = HttpRequestNode
            .execute(
                ctx(),
                call_params(json!({"url": "ftp://example.com"})),
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let err = HttpRequestNode
            .execute(
                ctx(),
                call_params(json!({"url": "https://example.com", "method": "GE T"})),
                Map::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid method"));
    }

    #[test]
    fn test_kind_is_integration() {
        assert_eq!(HttpRequestNode.kind(), HandlerKind::Integration);
    }
}
