//! flowspeed is an in-memory workflow execution engine. A workflow is a
//! directed acyclic graph of typed nodes (inputs, outputs, AI calls,
//! HTTP integrations, transforms, conditionals, merges); edges carry
//! data between them. The engine computes a dependency order, resolves
//! `{{node.field}}` templates against prior outputs, runs independent
//! nodes concurrently and isolates per-node failures, producing a
//! structured report with every node's output and status.
//!
//! ```no_run
//! use flowspeed::{EngineConfig, WorkflowEngine};
//! use serde_json::{json, Map};
//!
//! # async fn demo() -> Result<(), flowspeed::WorkflowError> {
//! let engine = WorkflowEngine::new(EngineConfig::default()).await?;
//! let document = r#"{
//!     "nodes": [
//!         {"id": "input_0", "type": "input"},
//!         {"id": "output-0", "type": "output",
//!          "data": {"params": {"template": "got: {{input_0.text}}"}}}
//!     ],
//!     "edges": [{"source": "input_0", "target": "output-0"}]
//! }"#;
//!
//! let mut inputs = Map::new();
//! inputs.insert("input".to_string(), json!("hello"));
//! let report = engine.run(document, inputs).await?;
//! assert_eq!(report.outputs["output-0"].primary(), &json!("got: hello"));
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logger;
pub mod nodes;
pub mod output;
pub mod parser;
pub mod registry;
pub mod template;
pub mod types;

pub use config::EngineConfig;
pub use context::{Context, NodeCtx};
pub use engine::{ValidationReport, WorkflowEngine};
pub use error::{ErrorInfo, WorkflowError};
pub use graph::WorkflowGraph;
pub use output::NodeOutput;
pub use parser::{EdgeConfig, NodeConfig, WorkflowParser};
pub use registry::{HandlerKind, NodeHandler, NodeRegistry};
pub use template::TemplateWarning;
pub use types::{
    Clock, ExecutionStats, NodeRunRecord, NodeState, RunReport, RunSnapshot, RunState, RunStatus,
    SkipReason, WorkflowResult,
};
