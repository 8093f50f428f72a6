use chrono::{DateTime, Utc};
use orkestra_core::{AgentState, ExecutionMetrics, JobError, JobRequest, OrkestraError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position of a job in its lifecycle.
///
/// `pending -> routing -> executing -> completed`, or any transient state
/// `-> failed`. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting for the dispatch loop.
    Pending,
    /// Being matched to an agent.
    Routing,
    /// Handed to an execution backend.
    Executing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn can_advance_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Routing)
                | (JobStatus::Routing, JobStatus::Executing)
                | (JobStatus::Executing, JobStatus::Completed)
                | (
                    JobStatus::Pending | JobStatus::Routing | JobStatus::Executing,
                    JobStatus::Failed
                )
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Routing => write!(f, "routing"),
            JobStatus::Executing => write!(f, "executing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Which agent the router picked for a job, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// The chosen agent.
    pub agent_id: String,
    /// The agent capability that satisfied the request.
    pub matched_capability: String,
    /// The strategy's ranking score (success rate for the built-in strategies).
    pub score: f64,
    /// Human-readable summary of the match.
    pub reason: String,
    /// Name of the strategy that made the choice.
    pub strategy: String,
}

/// One request's passage through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Assigned at submission.
    pub id: Uuid,
    /// The request as submitted, payload sanitized.
    pub request: JobRequest,
    /// Agent the job was routed to.
    pub agent_id: Option<String>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Backend output, set on completion.
    pub result: Option<serde_json::Value>,
    /// Why the job failed, set on failure.
    pub error: Option<JobError>,
    /// Routing provenance, set once routed.
    pub routing: Option<RoutingDecision>,
    /// Submission time.
    pub start_time: DateTime<Utc>,
    /// When an agent took the job; unset until `executing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal status.
    pub end_time: Option<DateTime<Utc>>,
}

impl Job {
    /// A new pending job for `request`.
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            agent_id: None,
            status: JobStatus::Pending,
            result: None,
            error: None,
            routing: None,
            start_time: Utc::now(),
            dispatched_at: None,
            end_time: None,
        }
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a transient state. Returns false (and changes nothing) when
    /// the transition is not allowed.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if next.is_terminal() || !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Attach the routing decision and move to `executing`.
    pub fn assign(&mut self, decision: RoutingDecision) -> bool {
        if !self.status.can_advance_to(JobStatus::Executing) {
            return false;
        }
        self.agent_id = Some(decision.agent_id.clone());
        self.routing = Some(decision);
        self.dispatched_at = Some(Utc::now());
        self.status = JobStatus::Executing;
        true
    }

    /// Finish successfully. No-op on a terminal job.
    pub fn complete(&mut self, result: serde_json::Value) -> bool {
        if !self.status.can_advance_to(JobStatus::Completed) {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.end_time = Some(Utc::now());
        true
    }

    /// Finish with an error. No-op on a terminal job.
    pub fn fail(&mut self, error: &OrkestraError) -> bool {
        if !self.status.can_advance_to(JobStatus::Failed) {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(JobError::from(error));
        self.end_time = Some(Utc::now());
        true
    }

    /// Wall time from submission to completion, if finished.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }

    /// Time the assigned agent spent on the job, excluding queue wait.
    /// `None` until the job was both dispatched and finished.
    pub fn execution_ms(&self) -> Option<u64> {
        let start = self.dispatched_at?;
        self.end_time
            .map(|end| (end - start).num_milliseconds().max(0) as u64)
    }
}

/// Criteria for listing jobs. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs in this status.
    pub status: Option<JobStatus>,
    /// Only jobs routed to this agent.
    pub agent_id: Option<String>,
}

impl JobFilter {
    /// Whether `job` satisfies every set criterion.
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self
                .agent_id
                .as_ref()
                .map_or(true, |id| job.agent_id.as_deref() == Some(id.as_str()))
    }
}

/// Per-agent entry of [`EngineMetrics`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetricsView {
    pub id: String,
    pub name: String,
    pub state: AgentState,
    pub metrics: ExecutionMetrics,
}

/// Aggregate introspection of the engine and registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetrics {
    /// Jobs currently in the job table, in any state.
    pub total_jobs: usize,
    /// Jobs executing right now.
    pub active_jobs: usize,
    /// Pending jobs waiting for a dispatch slot or an idle agent.
    pub queued_jobs: usize,
    /// Every registered agent, in registration order.
    pub agents: Vec<AgentMetricsView>,
}
