//! Workflow engine and run coordinator.
//!
//! The engine owns the handler registry and configuration; each `run`
//! parses and validates a document, seeds the output table with input
//! values, drives the executor and assembles the final report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::info;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::assemble;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::WorkflowError;
use crate::executor::WorkflowExecutor;
use crate::graph::WorkflowGraph;
use crate::nodes;
use crate::parser::WorkflowParser;
use crate::registry::{NodeHandler, NodeRegistry};
use crate::types::{
    Clock, NodeRunRecord, NodeState, RunReport, RunSnapshot, RunState, RunStatus, SkipReason,
    WorkflowResult,
};

/// Structural findings from a dry-run validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

struct RunHandle {
    executor: WorkflowExecutor,
    context: Context,
}

/// Workflow engine for validating and executing workflows.
pub struct WorkflowEngine {
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
    clock: Clock,
    runs: Arc<RwLock<HashMap<String, RunHandle>>>,
}

impl WorkflowEngine {
    /// Create an engine with every built-in handler registered.
    pub async fn new(config: EngineConfig) -> WorkflowResult<Self> {
        let registry = NodeRegistry::new();
        nodes::register_builtins(&registry).await?;
        Ok(Self {
            registry: Arc::new(registry),
            config,
            clock: Clock::system(),
            runs: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Replace the engine clock. Handlers observe the replacement
    /// through their context; used to pin time in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Register an additional handler, typically an integration or AI
    /// node.
    pub async fn register_handler(&self, handler: Arc<dyn NodeHandler>) -> WorkflowResult<()> {
        self.registry.register(handler).await
    }

    /// Validate a document without executing it: structural errors
    /// (malformed JSON, bad ids, cycles, unknown node types) and
    /// warnings (nodes with no connections).
    pub async fn validate(&self, document: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match WorkflowParser::parse(document) {
            Ok((parsed_nodes, parsed_edges)) => {
                for node in &parsed_nodes {
                    if !self.registry.has(&node.type_tag).await {
                        errors.push(format!(
                            "node '{}' has unknown type '{}'",
                            node.id, node.type_tag
                        ));
                    }
                }
                if parsed_nodes.len() > 1 {
                    for node in &parsed_nodes {
                        let connected = parsed_edges
                            .iter()
                            .any(|e| e.source == node.id || e.target == node.id);
                        if !connected {
                            warnings.push(format!("node '{}' has no connections", node.id));
                        }
                    }
                }
                if let Err(err) = WorkflowGraph::new(parsed_nodes, parsed_edges) {
                    errors.push(err.to_string());
                }
            }
            Err(err) => errors.push(err.to_string()),
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Execute a workflow document with the given run inputs.
    ///
    /// # Errors
    /// * Returns `WorkflowError::InvalidWorkflow` when the document is
    ///   structurally broken; no handler runs in that case. Node
    ///   failures never surface here, they are reported per node in
    ///   the returned report.
    pub async fn run(
        &self,
        document: &str,
        run_inputs: Map<String, Value>,
    ) -> WorkflowResult<RunReport> {
        let (parsed_nodes, parsed_edges) = WorkflowParser::parse(document)?;
        let graph = Arc::new(WorkflowGraph::new(parsed_nodes, parsed_edges)?);

        let mut unknown = Vec::new();
        for node in graph.nodes() {
            if !self.registry.has(&node.type_tag).await {
                unknown.push(format!("{} ({})", node.id, node.type_tag));
            }
        }
        if !unknown.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "unknown node types: {}",
                unknown.join(", ")
            )));
        }

        let run_id = Uuid::new_v4().to_string();
        info!("Starting run {}", run_id);
        let context = Context::new();

        // Input outputs are visible before anything is scheduled, so
        // templates can reference input nodes that have no edge to the
        // consuming node.
        for node in graph.nodes().filter(|n| n.type_tag == "input") {
            if let Some(value) = assemble::ambient_input_for(node, &run_inputs) {
                let seeded = nodes::input::build_output(&node.id, node.params(), &value);
                context.set_output(node.id.clone(), seeded).await;
            }
        }

        let mut executor = WorkflowExecutor::create(
            context.clone(),
            self.registry.clone(),
            self.config.clone(),
            graph.clone(),
            run_inputs,
            self.clock.clone(),
        );

        self.runs.write().await.insert(
            run_id.clone(),
            RunHandle {
                executor: executor.clone(),
                context: context.clone(),
            },
        );

        let started = Instant::now();
        executor.execute().await?;
        let execution_time = started.elapsed().as_secs_f64();

        let run_state = executor.run_state().await;
        let mut node_results = context.records().await;
        for node in graph.nodes() {
            node_results
                .entry(node.id.clone())
                .or_insert_with(NodeRunRecord::pending);
        }

        let status = overall_status(run_state, &graph, &node_results);
        let report = RunReport {
            run_id: run_id.clone(),
            status,
            outputs: context.snapshot_outputs().await,
            node_results,
            execution_path: context.execution_path().await,
            execution_time,
            stats: executor.stats().await,
            warnings: context.warnings().await,
        };

        info!(
            "Run {} finished: {} ({} nodes in {:.3}s)",
            run_id,
            status,
            report.stats.total_nodes,
            execution_time
        );
        Ok(report)
    }

    /// Request cancellation of a run. In-flight handlers observe the
    /// signal through their context; the run drains and reports
    /// `cancelled`.
    pub async fn cancel(&self, run_id: &str) -> WorkflowResult<()> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| WorkflowError::Config(format!("unknown run '{}'", run_id)))?;
        handle.executor.cancel();
        Ok(())
    }

    /// Point-in-time view of a run's node states.
    pub async fn status(&self, run_id: &str) -> Option<RunSnapshot> {
        let runs = self.runs.read().await;
        let handle = runs.get(run_id)?;
        Some(RunSnapshot {
            run_id: run_id.to_string(),
            state: handle.executor.run_state().await,
            node_states: handle.context.node_states().await,
        })
    }

    /// Ids of runs the engine currently tracks.
    pub async fn run_ids(&self) -> Vec<String> {
        self.runs.read().await.keys().cloned().collect()
    }

    /// Drop bookkeeping for a finished run.
    pub async fn forget(&self, run_id: &str) {
        self.runs.write().await.remove(run_id);
    }
}

fn overall_status(
    run_state: RunState,
    graph: &WorkflowGraph,
    node_results: &HashMap<String, NodeRunRecord>,
) -> RunStatus {
    if run_state == RunState::Cancelled {
        return RunStatus::Cancelled;
    }

    // Condition skips are normal routing, not damage.
    let has_damage = node_results.values().any(|r| {
        matches!(
            r.status,
            NodeState::Failed | NodeState::Skipped(SkipReason::UpstreamFailed)
        )
    });
    if !has_damage {
        return RunStatus::Completed;
    }

    let terminal_completed = graph.terminal_nodes().iter().any(|id| {
        node_results
            .get(*id)
            .map(|r| r.status == NodeState::Completed)
            .unwrap_or(false)
    });
    if terminal_completed {
        RunStatus::Partial
    } else {
        RunStatus::Failed
    }
}
