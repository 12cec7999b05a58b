//! Workflow executor.
//!
//! Schedules nodes over the dependency graph: nodes whose predecessors
//! have all settled are pulled from a ready queue and dispatched as
//! tokio tasks, bounded by a semaphore. Failures never abort the run;
//! descendants are skipped only when every predecessor path is dead,
//! so independent branches and diamond merges keep executing.
//!
//! Execution flow:
//! 1. Seed the ready queue with zero in-degree nodes.
//! 2. Dispatch ready nodes, assembling inputs and resolving templates
//!    against the current output table snapshot.
//! 3. On each settlement (completed, failed or skipped), decrement the
//!    in-degree of successors and enqueue those that reach zero.
//! 4. Repeat until the queue and the in-flight set are both drained,
//!    or cancellation stops dispatch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::assemble;
use crate::config::EngineConfig;
use crate::context::{Context, NodeCtx};
use crate::error::WorkflowError;
use crate::executor::channel::WatchChannel;
use crate::graph::WorkflowGraph;
use crate::output::NodeOutput;
use crate::registry::NodeRegistry;
use crate::types::{
    Clock, ExecutionStats, NodeRunRecord, NodeState, RunState, SkipReason, WorkflowResult,
};

/// Identifies one edge for condition-branch disabling.
type EdgeKey = (String, String, Option<String>);

enum Dispatch {
    Run,
    Skip(SkipReason),
}

/// Executes one workflow run over a DAG.
#[derive(Clone)]
pub struct WorkflowExecutor {
    context: Context,
    graph: Arc<WorkflowGraph>,
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
    run_inputs: Arc<Map<String, Value>>,
    clock: Clock,
    state: Arc<RwLock<RunState>>,
    state_channel: WatchChannel<RunState>,
    cancel_channel: WatchChannel<bool>,
    ready_queue: Arc<Mutex<VecDeque<String>>>,
    in_degree: Arc<Mutex<HashMap<String, usize>>>,
    /// Condition branches that were not taken.
    disabled_edges: Arc<Mutex<HashSet<EdgeKey>>>,
    stats: Arc<Mutex<ExecutionStats>>,
}

impl WorkflowExecutor {
    /// Create a new executor for one run.
    ///
    /// # Arguments
    /// * `context` - The run context, already seeded with input outputs
    /// * `registry` - The handler registry
    /// * `config` - Engine execution settings
    /// * `graph` - The validated workflow graph
    /// * `run_inputs` - Ambient run inputs for input nodes
    /// * `clock` - Time source handed to handlers
    pub fn create(
        context: Context,
        registry: Arc<NodeRegistry>,
        config: EngineConfig,
        graph: Arc<WorkflowGraph>,
        run_inputs: Map<String, Value>,
        clock: Clock,
    ) -> Self {
        Self {
            context,
            graph,
            registry,
            config,
            run_inputs: Arc::new(run_inputs),
            clock,
            state: Arc::new(RwLock::new(RunState::Init)),
            state_channel: WatchChannel::new(RunState::Init),
            cancel_channel: WatchChannel::new(false),
            ready_queue: Arc::new(Mutex::new(VecDeque::new())),
            in_degree: Arc::new(Mutex::new(HashMap::new())),
            disabled_edges: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(Mutex::new(ExecutionStats::default())),
        }
    }

    /// Observer for run state changes.
    pub fn state_receiver(&self) -> tokio::sync::watch::Receiver<RunState> {
        self.state_channel.rx.clone()
    }

    pub async fn run_state(&self) -> RunState {
        *self.state.read().await
    }

    pub async fn stats(&self) -> ExecutionStats {
        self.stats.lock().await.clone()
    }

    /// Request cancellation. Running handlers observe the signal
    /// through their context; no new nodes are started.
    pub fn cancel(&self) {
        let _ = self.cancel_channel.tx.send(true);
    }

    /// Execute the workflow until every node settles or cancellation
    /// drains the in-flight set.
    ///
    /// # Errors
    /// * Returns `WorkflowError::InvalidState` if the executor already
    ///   ran.
    pub async fn execute(&mut self) -> WorkflowResult<()> {
        self.validate_execution_state().await?;

        let graph = self.graph.clone();
        info!(
            "Starting workflow execution with {} nodes",
            graph.node_count()
        );

        if graph.node_count() == 0 {
            warn!("Workflow has no nodes");
            self.update_state(RunState::Completed).await;
            return Ok(());
        }

        self.update_state(RunState::Running).await;

        for node in graph.nodes() {
            self.context
                .update_node_state(&node.id, NodeState::Pending)
                .await;
        }

        let initial_ready: Vec<String> = {
            let mut in_degree = self.in_degree.lock().await;
            *in_degree = graph.in_degree_map();
            graph
                .nodes()
                .filter(|n| in_degree.get(&n.id) == Some(&0))
                .map(|n| n.id.clone())
                .collect()
        };
        debug!("Initial ready queue size: {}", initial_ready.len());
        for node_id in &initial_ready {
            self.context
                .update_node_state(node_id, NodeState::Ready)
                .await;
        }
        self.ready_queue.lock().await.extend(initial_ready);
        self.stats.lock().await.total_nodes = graph.node_count();

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut task_set: JoinSet<(String, WorkflowResult<Value>, f64)> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut cancel_rx = self.cancel_channel.rx.clone();
        let mut cancel_requested = false;
        let mut cancel_deadline: Option<Instant> = None;

        loop {
            if !cancel_requested && *cancel_rx.borrow() {
                cancel_requested = true;
                self.ready_queue.lock().await.clear();
                cancel_deadline = self
                    .config
                    .cancel_grace()
                    .map(|grace| Instant::now() + grace);
                info!(
                    "Cancellation requested, waiting for {} in-flight nodes",
                    in_flight.len()
                );
            }

            if !cancel_requested {
                self.dispatch_ready(&semaphore, &mut task_set, &mut in_flight)
                    .await;
            }

            if task_set.is_empty() {
                let queue_empty = self.ready_queue.lock().await.is_empty();
                if cancel_requested || queue_empty {
                    break;
                }
                continue;
            }

            tokio::select! {
                joined = task_set.join_next() => {
                    match joined {
                        Some(Ok((node_id, result, elapsed))) => {
                            in_flight.remove(&node_id);
                            self.handle_task_result(&node_id, result, elapsed).await;
                        }
                        Some(Err(join_error)) => {
                            error!("Node task join error: {}", join_error);
                        }
                        None => {}
                    }
                }
                changed = cancel_rx.changed(), if !cancel_requested => {
                    let _ = changed;
                    continue;
                }
                _ = sleep_until_deadline(cancel_deadline), if cancel_requested && cancel_deadline.is_some() => {
                    warn!(
                        "Cancel grace period elapsed, aborting {} in-flight nodes",
                        in_flight.len()
                    );
                    task_set.abort_all();
                    while task_set.join_next().await.is_some() {}
                    for node_id in in_flight.drain() {
                        let err = WorkflowError::Cancelled(format!(
                            "node '{}' aborted after cancel grace period",
                            node_id
                        ));
                        self.context
                            .update_node_state(&node_id, NodeState::Failed)
                            .await;
                        self.context
                            .record_result(node_id.clone(), NodeRunRecord::failed(0.0, &err))
                            .await;
                    }
                    break;
                }
            }
        }

        // A panicking handler surfaces as a join error without a node
        // id; anything left in the in-flight set at this point never
        // settled and is recorded as failed.
        for node_id in in_flight.drain() {
            if self.context.node_state(&node_id).await == NodeState::Running {
                let err =
                    WorkflowError::Execution(format!("node '{}' task ended abnormally", node_id));
                self.settle_failure(&node_id, err, 0.0).await;
            }
        }

        self.finalize(cancel_requested).await;
        Ok(())
    }

    async fn validate_execution_state(&self) -> WorkflowResult<()> {
        let state = self.state.read().await;
        if !matches!(*state, RunState::Init) {
            return Err(WorkflowError::InvalidState(format!(
                "run already started (state: {})",
                state
            )));
        }
        Ok(())
    }

    /// Drain the ready queue, skipping dead nodes and spawning the
    /// rest. Skip settlement can enqueue successors, so the queue is
    /// drained repeatedly until stable.
    async fn dispatch_ready(
        &self,
        semaphore: &Arc<Semaphore>,
        task_set: &mut JoinSet<(String, WorkflowResult<Value>, f64)>,
        in_flight: &mut HashSet<String>,
    ) {
        loop {
            let batch: Vec<String> = {
                let mut queue = self.ready_queue.lock().await;
                queue.drain(..).collect()
            };
            if batch.is_empty() {
                return;
            }

            let mut spawned = 0usize;
            for node_id in batch {
                match self.classify(&node_id).await {
                    Dispatch::Skip(reason) => {
                        debug!("Skipping node {} ({})", node_id, reason.as_str());
                        self.settle_skip(&node_id, reason).await;
                    }
                    Dispatch::Run => {
                        if self.spawn_node(&node_id, semaphore, task_set).await {
                            in_flight.insert(node_id);
                            spawned += 1;
                        }
                    }
                }
            }

            if spawned > 0 {
                let mut stats = self.stats.lock().await;
                stats.parallel_batches += 1;
                stats.max_concurrent = stats.max_concurrent.max(task_set.len());
            }
        }
    }

    /// Decide whether a ready node runs or is skipped. A node runs when
    /// it has no predecessors, or at least one completed predecessor
    /// reachable through an enabled edge.
    async fn classify(&self, node_id: &str) -> Dispatch {
        let predecessors = self.graph.predecessors(node_id);
        if predecessors.is_empty() {
            return Dispatch::Run;
        }

        let disabled = self.disabled_edges.lock().await;
        let mut saw_failure = false;
        for pred in predecessors {
            match self.context.node_state(pred).await {
                NodeState::Completed => {
                    let any_enabled = self
                        .graph
                        .incoming_edges(node_id)
                        .iter()
                        .filter(|e| e.source == *pred)
                        .any(|e| {
                            !disabled.contains(&(
                                e.source.clone(),
                                e.target.clone(),
                                e.source_handle.clone(),
                            ))
                        });
                    if any_enabled {
                        return Dispatch::Run;
                    }
                }
                NodeState::Failed | NodeState::Skipped(SkipReason::UpstreamFailed) => {
                    saw_failure = true;
                }
                _ => {}
            }
        }

        if saw_failure {
            Dispatch::Skip(SkipReason::UpstreamFailed)
        } else {
            Dispatch::Skip(SkipReason::ConditionSkipped)
        }
    }

    /// Assemble inputs and spawn the handler task. Returns false when
    /// the node failed before spawning (unknown handler type).
    async fn spawn_node(
        &self,
        node_id: &str,
        semaphore: &Arc<Semaphore>,
        task_set: &mut JoinSet<(String, WorkflowResult<Value>, f64)>,
    ) -> bool {
        let Some(node) = self.graph.node(node_id).cloned() else {
            error!("Node {} not found in graph", node_id);
            return false;
        };

        let handler = match self.registry.get(&node.type_tag).await {
            Ok(handler) => handler,
            Err(err) => {
                error!("Node {} has no handler: {}", node_id, err);
                self.settle_failure(node_id, err, 0.0).await;
                return false;
            }
        };

        self.context
            .update_node_state(node_id, NodeState::Running)
            .await;

        let snapshot = self.context.snapshot_outputs().await;
        let assembled = assemble::assemble(&node, &self.graph, &snapshot, &self.run_inputs);
        self.context.push_warnings(assembled.warnings.clone()).await;

        let ctx = NodeCtx::new(
            node_id.to_string(),
            snapshot,
            self.cancel_channel.rx.clone(),
            self.clock.clone(),
        );
        let timeout = self.config.timeout_for(handler.kind());
        // Built-ins are CPU bound and share the in-flight budget;
        // integration and AI handlers block on the network and run
        // unbounded.
        let semaphore = (handler.kind() == crate::registry::HandlerKind::Builtin)
            .then(|| semaphore.clone());
        let node_id = node_id.to_string();

        debug!("Starting node execution: {}", node_id);
        task_set.spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let start = Instant::now();
            let call = handler.execute(ctx, assembled.params, assembled.inputs);
            let result = match timeout {
                Some(deadline) => match tokio::time::timeout(deadline, call).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkflowError::Timeout(format!(
                        "node '{}' exceeded its {}s deadline",
                        node_id,
                        deadline.as_secs()
                    ))),
                },
                None => call.await,
            };
            (node_id, result, start.elapsed().as_secs_f64())
        });
        true
    }

    /// Process a settled handler call: publish the output or record the
    /// failure, then release successors.
    async fn handle_task_result(
        &self,
        node_id: &str,
        result: WorkflowResult<Value>,
        elapsed: f64,
    ) {
        match result {
            Ok(raw) => {
                let Some(node) = self.graph.node(node_id) else {
                    return;
                };
                let record = NodeOutput::normalize(raw, &node.type_tag, &node.node_name(), None);

                if node.type_tag == "condition" {
                    self.apply_condition_routing(node_id, &record).await;
                }

                // Output must be visible before any successor becomes ready.
                self.context.set_output(node_id.to_string(), record).await;
                self.context
                    .update_node_state(node_id, NodeState::Completed)
                    .await;
                self.context
                    .record_result(node_id.to_string(), NodeRunRecord::completed(elapsed))
                    .await;
                self.context.push_execution_path(node_id.to_string()).await;
                self.stats.lock().await.completed_nodes += 1;

                info!("Node {} completed in {:.3}s", node_id, elapsed);
                self.release_successors(node_id).await;
            }
            Err(err) => {
                error!("Node {} failed: {}", node_id, err);
                self.settle_failure(node_id, err, elapsed).await;
            }
        }
    }

    /// Disable the outgoing branches a condition node did not take.
    async fn apply_condition_routing(&self, node_id: &str, record: &NodeOutput) {
        let matched = record
            .get("matched_path")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut disabled = self.disabled_edges.lock().await;
        for edge in self.graph.outgoing_edges(node_id) {
            let off = match (&matched, &edge.source_handle) {
                // No path matched: every condition-sourced edge is dead.
                (None, _) => true,
                // Labeled edges survive only on the matched handle.
                (Some(m), Some(handle)) => handle != m,
                // Unlabeled edges follow the condition output itself.
                (Some(_), None) => false,
            };
            if off {
                debug!(
                    "Condition {} disabling edge to {} (handle {:?})",
                    node_id, edge.target, edge.source_handle
                );
                disabled.insert((
                    edge.source.clone(),
                    edge.target.clone(),
                    edge.source_handle.clone(),
                ));
            }
        }
    }

    async fn settle_failure(&self, node_id: &str, err: WorkflowError, elapsed: f64) {
        self.context
            .update_node_state(node_id, NodeState::Failed)
            .await;
        self.context
            .record_result(node_id.to_string(), NodeRunRecord::failed(elapsed, &err))
            .await;
        self.stats.lock().await.failed_nodes += 1;
        self.release_successors(node_id).await;
    }

    async fn settle_skip(&self, node_id: &str, reason: SkipReason) {
        self.context
            .update_node_state(node_id, NodeState::Skipped(reason))
            .await;
        self.context
            .record_result(node_id.to_string(), NodeRunRecord::skipped(reason))
            .await;
        self.stats.lock().await.skipped_nodes += 1;
        self.release_successors(node_id).await;
    }

    /// Decrement successor in-degrees and enqueue the ones that become
    /// ready.
    async fn release_successors(&self, node_id: &str) {
        let mut in_degree = self.in_degree.lock().await;
        let mut queue = self.ready_queue.lock().await;
        let mut newly_ready = Vec::new();
        for succ in self.graph.successors(node_id) {
            if let Some(degree) = in_degree.get_mut(succ) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    debug!("Node {} is ready", succ);
                    queue.push_back(succ.clone());
                    newly_ready.push(succ.clone());
                }
            } else {
                warn!("Successor {} missing from in-degree map", succ);
            }
        }
        drop(queue);
        drop(in_degree);
        for succ in newly_ready {
            self.context.update_node_state(&succ, NodeState::Ready).await;
        }
    }

    async fn finalize(&self, cancelled: bool) {
        let final_state = if cancelled {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        self.update_state(final_state).await;
        info!("Workflow run finished ({})", final_state);
    }

    async fn update_state(&self, new_state: RunState) {
        let mut state = self.state.write().await;
        *state = new_state;
        let _ = self.state_channel.tx.send(new_state);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
