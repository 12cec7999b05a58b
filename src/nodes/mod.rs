//! Built-in node handlers.

pub mod condition;
pub mod file;
pub mod http;
pub mod input;
pub mod json;
pub mod merge;
pub mod output;
pub mod text;
pub mod time;

use std::sync::Arc;

use crate::registry::NodeRegistry;
use crate::types::WorkflowResult;

pub use condition::ConditionNode;
pub use file::FileTransformerNode;
pub use http::HttpRequestNode;
pub use input::InputNode;
pub use json::JsonHandlerNode;
pub use merge::MergeNode;
pub use output::OutputNode;
pub use text::TextProcessorNode;
pub use time::TimeNode;

/// Register every built-in handler on a registry.
pub async fn register_builtins(registry: &NodeRegistry) -> WorkflowResult<()> {
    registry.register(Arc::new(InputNode)).await?;
    registry.register(Arc::new(OutputNode)).await?;
    registry.register(Arc::new(ConditionNode)).await?;
    registry.register(Arc::new(MergeNode)).await?;
    registry.register(Arc::new(TimeNode)).await?;
    registry.register(Arc::new(TextProcessorNode)).await?;
    registry.register(Arc::new(JsonHandlerNode)).await?;
    registry.register(Arc::new(FileTransformerNode)).await?;
    registry.register(Arc::new(HttpRequestNode)).await?;
    Ok(())
}
