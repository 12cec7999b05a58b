use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::HandlerKind;

fn default_max_in_flight() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Engine-wide execution settings.
///
/// Timeouts are grouped by handler kind: built-in transforms run without
/// a deadline, integration handlers default to 60 seconds and AI
/// handlers to 120 seconds. A `None` disables the deadline for that
/// kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of built-in nodes executing at the same time.
    /// Integration and AI handlers block on the network and are not
    /// bounded by this limit.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Deadline for built-in handlers, in seconds.
    #[serde(default)]
    pub builtin_timeout_secs: Option<u64>,
    /// Deadline for integration handlers, in seconds.
    #[serde(default = "EngineConfig::default_integration_timeout")]
    pub integration_timeout_secs: Option<u64>,
    /// Deadline for AI handlers, in seconds.
    #[serde(default = "EngineConfig::default_ai_timeout")]
    pub ai_timeout_secs: Option<u64>,
    /// How long a cancelled run waits for in-flight handlers before
    /// aborting them. `None` waits indefinitely.
    #[serde(default)]
    pub cancel_grace_secs: Option<u64>,
}

impl EngineConfig {
    fn default_integration_timeout() -> Option<u64> {
        Some(60)
    }

    fn default_ai_timeout() -> Option<u64> {
        Some(120)
    }

    /// Deadline for a handler of the given kind, if any.
    pub fn timeout_for(&self, kind: HandlerKind) -> Option<Duration> {
        let secs = match kind {
            HandlerKind::Builtin => self.builtin_timeout_secs,
            HandlerKind::Integration => self.integration_timeout_secs,
            HandlerKind::Ai => self.ai_timeout_secs,
        };
        secs.map(Duration::from_secs)
    }

    pub fn cancel_grace(&self) -> Option<Duration> {
        self.cancel_grace_secs.map(Duration::from_secs)
    }

    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            builtin_timeout_secs: None,
            integration_timeout_secs: Self::default_integration_timeout(),
            ai_timeout_secs: Self::default_ai_timeout(),
            cancel_grace_secs: None,
        }
    }
}
