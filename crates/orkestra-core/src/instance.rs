use crate::definition::AgentDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime state of a registered agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Ready to accept a job.
    #[default]
    Idle,
    /// Executing a job.
    Busy,
    /// Marked faulty; not routable.
    Error,
    /// Taken out of rotation; not routable.
    Offline,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Busy => write!(f, "busy"),
            AgentState::Error => write!(f, "error"),
            AgentState::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for AgentState {
    type Err = crate::OrkestraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(AgentState::Idle),
            "busy" => Ok(AgentState::Busy),
            "error" => Ok(AgentState::Error),
            "offline" => Ok(AgentState::Offline),
            other => Err(crate::OrkestraError::Config(format!(
                "unknown agent state: {other}"
            ))),
        }
    }
}

/// Rolling execution metrics, kept in constant space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    /// Executions recorded, successful or not.
    pub total_executions: u64,
    /// Percentage of successful executions, 0–100.
    pub success_rate: f64,
    /// Arithmetic mean of every recorded duration.
    pub average_execution_time_ms: f64,
    /// Failed executions, timeouts included.
    pub error_count: u64,
    /// When the last execution was recorded.
    #[serde(default)]
    pub last_execution_time: Option<DateTime<Utc>>,
}

impl ExecutionMetrics {
    /// Fold one execution into the metrics.
    ///
    /// The average is updated incrementally as
    /// `(old_avg * (n - 1) + duration) / n`; no history is retained.
    pub fn record(&mut self, success: bool, duration_ms: u64, at: DateTime<Utc>) {
        self.total_executions += 1;
        if !success {
            self.error_count += 1;
        }
        let n = self.total_executions as f64;
        self.success_rate =
            100.0 * (self.total_executions - self.error_count) as f64 / n;
        self.average_execution_time_ms =
            (self.average_execution_time_ms * (n - 1.0) + duration_ms as f64) / n;
        self.last_execution_time = Some(at);
    }
}

/// Result of the last liveness check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// Health record patched by health checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHealth {
    /// Unset until the first check runs.
    pub last_check: Option<DateTime<Utc>>,
    /// Outcome of the last check.
    pub status: HealthStatus,
    /// Why the last check failed, empty when healthy.
    #[serde(default)]
    pub detail: String,
}

/// A registered agent: its definition plus live state and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstance {
    /// The registered definition, replaced wholesale on update.
    pub definition: AgentDefinition,
    /// Lifecycle state; only `idle` agents are routed to.
    pub state: AgentState,
    /// Rolling execution metrics, updated as jobs finish.
    pub metrics: ExecutionMetrics,
    /// Last liveness check result.
    pub health: AgentHealth,
    /// Monotonic position assigned at registration; the final routing tie-break.
    #[serde(default)]
    pub registration_order: u64,
}

impl AgentInstance {
    /// A fresh instance: idle, zeroed metrics, unknown health.
    pub fn new(definition: AgentDefinition, registration_order: u64) -> Self {
        Self {
            definition,
            state: AgentState::Idle,
            metrics: ExecutionMetrics::default(),
            health: AgentHealth::default(),
            registration_order,
        }
    }

    /// The agent id.
    pub fn id(&self) -> &str {
        self.definition.id()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_incremental_average() {
        let mut m = ExecutionMetrics::default();
        let now = Utc::now();
        m.record(true, 1000, now);
        m.record(true, 2000, now);
        m.record(true, 3000, now);
        assert_eq!(m.total_executions, 3);
        assert!((m.average_execution_time_ms - 2000.0).abs() < 1e-9);
        assert!((m.success_rate - 100.0).abs() < 1e-9);

        m.record(false, 500, now);
        assert_eq!(m.error_count, 1);
        assert!((m.success_rate - 75.0).abs() < 1e-9);
        assert!((m.average_execution_time_ms - 1625.0).abs() < 1e-9);
        assert_eq!(m.last_execution_time, Some(now));
    }

    #[test]
    fn test_metrics_mean_of_uneven_durations() {
        let durations = [7u64, 13, 101, 0, 55, 999, 4];
        let mut m = ExecutionMetrics::default();
        for d in durations {
            m.record(true, d, Utc::now());
        }
        let mean = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
        assert!((m.average_execution_time_ms - mean).abs() < 1e-6);
    }

    #[test]
    fn test_agent_state_round_trip() {
        let json = serde_json::to_string(&AgentState::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
        assert_eq!("BUSY".parse::<AgentState>().unwrap(), AgentState::Busy);
    }
}
