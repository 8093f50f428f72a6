use crate::error::ErrorKind;
use crate::instance::{AgentState, HealthStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notifications emitted by the agent registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AgentEvent {
    Registered {
        agent_id: String,
    },
    Unregistered {
        agent_id: String,
    },
    Updated {
        agent_id: String,
        version: String,
    },
    StateChanged {
        agent_id: String,
        previous: AgentState,
        state: AgentState,
    },
    HealthChecked {
        agent_id: String,
        status: HealthStatus,
    },
    ExecutionRecorded {
        agent_id: String,
        success: bool,
        duration_ms: u64,
    },
}

impl AgentEvent {
    /// Wire name of the event, e.g. `agent:registered`.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Registered { .. } => "agent:registered",
            AgentEvent::Unregistered { .. } => "agent:unregistered",
            AgentEvent::Updated { .. } => "agent:updated",
            AgentEvent::StateChanged { .. } => "agent:state-changed",
            AgentEvent::HealthChecked { .. } => "agent:health-checked",
            AgentEvent::ExecutionRecorded { .. } => "agent:execution-recorded",
        }
    }

    /// The agent the event concerns.
    pub fn agent_id(&self) -> &str {
        match self {
            AgentEvent::Registered { agent_id }
            | AgentEvent::Unregistered { agent_id }
            | AgentEvent::Updated { agent_id, .. }
            | AgentEvent::StateChanged { agent_id, .. }
            | AgentEvent::HealthChecked { agent_id, .. }
            | AgentEvent::ExecutionRecorded { agent_id, .. } => agent_id,
        }
    }
}

/// Notifications emitted by the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum JobEvent {
    Submitted {
        job_id: Uuid,
        capability: String,
    },
    Routed {
        job_id: Uuid,
        agent_id: String,
    },
    Completed {
        job_id: Uuid,
        agent_id: String,
        duration_ms: u64,
    },
    Failed {
        job_id: Uuid,
        agent_id: Option<String>,
        kind: ErrorKind,
    },
}

impl JobEvent {
    /// Wire name of the event, e.g. `job:completed`.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Submitted { .. } => "job:submitted",
            JobEvent::Routed { .. } => "job:routed",
            JobEvent::Completed { .. } => "job:completed",
            JobEvent::Failed { .. } => "job:failed",
        }
    }

    /// The job the event concerns.
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Submitted { job_id, .. }
            | JobEvent::Routed { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let e = AgentEvent::StateChanged {
            agent_id: "a".into(),
            previous: AgentState::Idle,
            state: AgentState::Busy,
        };
        assert_eq!(e.name(), "agent:state-changed");
        assert_eq!(e.agent_id(), "a");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let e = JobEvent::Failed {
            job_id: Uuid::nil(),
            agent_id: None,
            kind: ErrorKind::Routing,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["kind"], "routing");
    }
}
