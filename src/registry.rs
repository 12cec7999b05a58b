//! Node handler contract and registry.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::context::NodeCtx;
use crate::error::WorkflowError;
use crate::types::WorkflowResult;

/// Handler class, used to pick the per-node timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Pure in-process transforms.
    Builtin,
    /// Handlers that talk to external services.
    Integration,
    /// Model-backed handlers with long upstream latencies.
    Ai,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Builtin => write!(f, "builtin"),
            HandlerKind::Integration => write!(f, "integration"),
            HandlerKind::Ai => write!(f, "ai"),
        }
    }
}

/// A trait defining the characteristics of a node handler.
///
/// Handlers receive their parameters with every template already
/// resolved; they must not re-interpret `{{...}}` tokens. The returned
/// value is passed through the output normalizer, so any JSON shape is
/// acceptable.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The node type tag this handler serves.
    fn type_tag(&self) -> &str;

    /// Gets the description of the handler.
    fn description(&self) -> &str;

    /// Gets the handler kind. Defaults to `Builtin`.
    fn kind(&self) -> HandlerKind {
        HandlerKind::Builtin
    }

    /// Executes the node.
    ///
    /// # Arguments
    /// * `ctx` - Read-only run view: output snapshot, cancellation
    ///   signal and clock.
    /// * `params` - The node's parameter mapping, template-resolved.
    /// * `inputs` - The assembled input bundle keyed by target handle.
    ///
    /// # Returns
    /// * `WorkflowResult<Value>` - The raw result, normalized by the
    ///   coordinator before publication.
    async fn execute(
        &self,
        ctx: NodeCtx,
        params: Map<String, Value>,
        inputs: Map<String, Value>,
    ) -> WorkflowResult<Value>;
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandler")
            .field("type_tag", &self.type_tag())
            .finish()
    }
}

/// Manages the registration and lookup of node handlers.
pub struct NodeRegistry {
    /// A map of registered handlers keyed by type tag.
    handlers: RwLock<HashMap<String, Arc<dyn NodeHandler>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new handler under its type tag.
    ///
    /// # Errors
    /// * Returns `WorkflowError::Config` if the tag is already taken.
    pub async fn register(&self, handler: Arc<dyn NodeHandler>) -> WorkflowResult<()> {
        let tag = handler.type_tag().to_string();
        let mut handlers = self.handlers.write().await;

        if handlers.contains_key(&tag) {
            return Err(WorkflowError::Config(format!(
                "handler already registered for type '{}'",
                tag
            )));
        }

        handlers.insert(tag, handler);
        Ok(())
    }

    /// Removes the handler for a type tag.
    ///
    /// # Errors
    /// * Returns `WorkflowError::Config` if no handler is registered.
    pub async fn unregister(&self, type_tag: &str) -> WorkflowResult<()> {
        let mut handlers = self.handlers.write().await;

        if handlers.remove(type_tag).is_none() {
            return Err(WorkflowError::Config(format!(
                "no handler registered for type '{}'",
                type_tag
            )));
        }

        Ok(())
    }

    /// Gets a handler by type tag.
    pub async fn get(&self, type_tag: &str) -> WorkflowResult<Arc<dyn NodeHandler>> {
        let handlers = self.handlers.read().await;

        handlers.get(type_tag).cloned().ok_or_else(|| {
            WorkflowError::InvalidWorkflow(format!("unknown node type '{}'", type_tag))
        })
    }

    /// Checks if a handler is registered for a type tag.
    pub async fn has(&self, type_tag: &str) -> bool {
        let handlers = self.handlers.read().await;
        handlers.contains_key(type_tag)
    }

    /// Names of all registered type tags.
    pub async fn registered_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        handlers.keys().cloned().collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
