use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ErrorInfo, WorkflowError};
use crate::output::NodeOutput;
use crate::template::TemplateWarning;

/// Type alias for workflow operation results
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Reason a node was skipped without executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Every predecessor path failed or was skipped.
    UpstreamFailed,
    /// The node is only reachable through condition branches that were
    /// not taken.
    ConditionSkipped,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamFailed => "upstream_failed",
            Self::ConditionSkipped => "condition_skipped",
        }
    }
}

/// Per-node execution state.
///
/// Transitions are monotone: `Pending -> Ready -> Running` and then one
/// of `Completed` or `Failed`. `Skipped` is terminal and reachable only
/// from `Pending`/`Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped(SkipReason),
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped(_))
    }

    /// Terminal without a usable output.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped(_) => "skipped",
        }
    }

    /// Validate state transition
    pub fn can_transition_to(&self, new: &NodeState) -> bool {
        match (self, new) {
            (Self::Pending, Self::Ready) => true,
            (Self::Pending, Self::Skipped(_)) => true,
            (Self::Pending, Self::Running) => true,
            (Self::Ready, Self::Running) => true,
            (Self::Ready, Self::Skipped(_)) => true,
            (Self::Running, Self::Completed) => true,
            (Self::Running, Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for NodeState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Run state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Running,
    Completed,
    Cancelled,
}

impl RunState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every reachable node succeeded. Condition skips alone do not
    /// demote a run from this status.
    Completed,
    /// Some nodes failed or were skipped but at least one terminal node
    /// produced an output.
    Partial,
    /// No terminal node completed.
    Failed,
    /// The run was cancelled externally.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Outcome record for a single node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRunRecord {
    pub status: NodeState,
    /// Seconds spent in the handler, 0 for nodes that never ran.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl NodeRunRecord {
    pub fn completed(execution_time: f64) -> Self {
        Self {
            status: NodeState::Completed,
            execution_time,
            error: None,
        }
    }

    pub fn failed(execution_time: f64, err: &WorkflowError) -> Self {
        Self {
            status: NodeState::Failed,
            execution_time,
            error: Some(ErrorInfo::from(err)),
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            status: NodeState::Skipped(reason),
            execution_time: 0.0,
            error: Some(ErrorInfo {
                kind: reason.as_str().to_string(),
                message: match reason {
                    SkipReason::UpstreamFailed => {
                        "skipped because all predecessors failed or were skipped".to_string()
                    }
                    SkipReason::ConditionSkipped => {
                        "skipped because no taken condition branch reaches this node".to_string()
                    }
                },
            }),
        }
    }

    pub fn pending() -> Self {
        Self {
            status: NodeState::Pending,
            execution_time: 0.0,
            error: None,
        }
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    /// Number of dispatch rounds that started at least one node.
    pub parallel_batches: usize,
    /// Highest number of nodes observed in flight at once.
    pub max_concurrent: usize,
}

/// Final report of a workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub outputs: HashMap<String, NodeOutput>,
    pub node_results: HashMap<String, NodeRunRecord>,
    /// Node ids in completion order.
    pub execution_path: Vec<String>,
    /// Total wall-clock seconds.
    pub execution_time: f64,
    pub stats: ExecutionStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TemplateWarning>,
}

/// Point-in-time view of a run, returned by `WorkflowEngine::status`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub state: RunState,
    pub node_states: HashMap<String, NodeState>,
}

/// Time source handed to handlers. A fixed instant can be injected for
/// deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    fixed: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn system() -> Self {
        Self { fixed: None }
    }

    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self { fixed: Some(at) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }
}
