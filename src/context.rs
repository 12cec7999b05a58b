//! Run-scoped shared state.
//!
//! The `Context` owns the output table, the node state map, template
//! warnings and the execution path. Only the run coordinator writes it;
//! handlers see a read-only snapshot through `NodeCtx`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::warn;
use tokio::sync::{watch, RwLock};

use crate::output::NodeOutput;
use crate::template::TemplateWarning;
use crate::types::{Clock, NodeRunRecord, NodeState};

#[derive(Debug, Default)]
struct ContextData {
    /// Node output table. Entries are written once when the producing
    /// node completes and never mutated afterwards.
    outputs: HashMap<String, NodeOutput>,
    /// Node state tracking (node ID -> state)
    states: HashMap<String, NodeState>,
    /// Per-node outcome records
    records: HashMap<String, NodeRunRecord>,
    /// Unresolved template warnings accumulated across the run
    warnings: Vec<TemplateWarning>,
    /// Node ids in completion order
    execution_path: Vec<String>,
}

/// Workflow context for sharing data between nodes
#[derive(Debug, Clone)]
pub struct Context {
    data: Arc<RwLock<ContextData>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(ContextData::default())),
        }
    }

    /// Get a node's output
    pub async fn get_output(&self, node_id: &str) -> Option<NodeOutput> {
        let data = self.data.read().await;
        data.outputs.get(node_id).cloned()
    }

    /// Publish a node's output. Re-publishing the same key replaces the
    /// record; only the coordinator calls this, and only once per node
    /// apart from eager input seeding.
    pub async fn set_output(&self, node_id: String, output: NodeOutput) {
        let mut data = self.data.write().await;
        data.outputs.insert(node_id, output);
    }

    /// Clone of the full output table, used as a consistent snapshot
    /// for template resolution and handler reads.
    pub async fn snapshot_outputs(&self) -> HashMap<String, NodeOutput> {
        let data = self.data.read().await;
        data.outputs.clone()
    }

    /// Get node state
    pub async fn node_state(&self, node_id: &str) -> NodeState {
        let data = self.data.read().await;
        data.states
            .get(node_id)
            .copied()
            .unwrap_or(NodeState::Pending)
    }

    /// Update node state, enforcing the monotone transition table.
    /// Invalid transitions are logged and ignored.
    pub async fn update_node_state(&self, node_id: &str, state: NodeState) {
        let mut data = self.data.write().await;
        let current = data.states.get(node_id).copied();
        if current == Some(state) {
            return;
        }
        let from = current.unwrap_or(NodeState::Pending);
        if from != state && !from.can_transition_to(&state) {
            warn!(
                "Ignoring invalid state transition for node {}: {} -> {}",
                node_id, from, state
            );
            return;
        }
        data.states.insert(node_id.to_string(), state);
    }

    pub async fn node_states(&self) -> HashMap<String, NodeState> {
        let data = self.data.read().await;
        data.states.clone()
    }

    /// Get completed node set
    pub async fn completed_nodes(&self) -> HashSet<String> {
        let data = self.data.read().await;
        data.states
            .iter()
            .filter(|(_, s)| matches!(s, NodeState::Completed))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn record_result(&self, node_id: String, record: NodeRunRecord) {
        let mut data = self.data.write().await;
        data.records.insert(node_id, record);
    }

    pub async fn records(&self) -> HashMap<String, NodeRunRecord> {
        let data = self.data.read().await;
        data.records.clone()
    }

    pub async fn push_warnings(&self, warnings: Vec<TemplateWarning>) {
        if warnings.is_empty() {
            return;
        }
        let mut data = self.data.write().await;
        data.warnings.extend(warnings);
    }

    pub async fn warnings(&self) -> Vec<TemplateWarning> {
        let data = self.data.read().await;
        data.warnings.clone()
    }

    pub async fn push_execution_path(&self, node_id: String) {
        let mut data = self.data.write().await;
        data.execution_path.push(node_id);
    }

    pub async fn execution_path(&self) -> Vec<String> {
        let data = self.data.read().await;
        data.execution_path.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view handed to a node handler.
///
/// Carries a snapshot of the output table taken when the node was
/// dispatched, the run-wide cancellation signal and the engine clock.
#[derive(Debug, Clone)]
pub struct NodeCtx {
    node_id: String,
    outputs: Arc<HashMap<String, NodeOutput>>,
    cancelled: watch::Receiver<bool>,
    clock: Clock,
}

impl NodeCtx {
    pub fn new(
        node_id: String,
        outputs: HashMap<String, NodeOutput>,
        cancelled: watch::Receiver<bool>,
        clock: Clock,
    ) -> Self {
        Self {
            node_id,
            outputs: Arc::new(outputs),
            cancelled,
            clock,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.outputs.get(node_id)
    }

    pub fn outputs(&self) -> &HashMap<String, NodeOutput> {
        &self.outputs
    }

    /// Current time per the engine clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Non-blocking check of the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when the run is cancelled. Long-running handlers select
    /// on this next to their own work.
    pub async fn wait_cancelled(&self) {
        let mut rx = self.cancelled.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped; the run is over either way.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_output_table_roundtrip() {
        let ctx = Context::new();
        let out = NodeOutput::normalize(json!({"output": "v"}), "test", "n1", None);
        ctx.set_output("n1".to_string(), out.clone()).await;
        assert_eq!(ctx.get_output("n1").await, Some(out));
        assert_eq!(ctx.get_output("missing").await, None);
    }

    #[tokio::test]
    async fn test_state_transitions_are_monotone() {
        let ctx = Context::new();
        ctx.update_node_state("a", NodeState::Ready).await;
        ctx.update_node_state("a", NodeState::Running).await;
        ctx.update_node_state("a", NodeState::Completed).await;
        // Terminal states never regress.
        ctx.update_node_state("a", NodeState::Running).await;
        assert_eq!(ctx.node_state("a").await, NodeState::Completed);
    }

    #[tokio::test]
    async fn test_completed_set() {
        let ctx = Context::new();
        ctx.update_node_state("a", NodeState::Running).await;
        ctx.update_node_state("a", NodeState::Completed).await;
        ctx.update_node_state("b", NodeState::Running).await;
        let completed = ctx.completed_nodes().await;
        assert!(completed.contains("a"));
        assert!(!completed.contains("b"));
    }

    #[tokio::test]
    async fn test_node_ctx_cancellation() {
        let (tx, rx) = watch::channel(false);
        let ctx = NodeCtx::new("n".into(), HashMap::new(), rx, Clock::system());
        assert!(!ctx.is_cancelled());
        tx.send(true).unwrap();
        assert!(ctx.is_cancelled());
        // wait_cancelled returns immediately once the flag is set.
        ctx.wait_cancelled().await;
    }
}
