use crate::backend::BackendRegistry;
use crate::config::EngineConfig;
use crate::job_queue::JobQueue;
use crate::router::Router;
use crate::types::{AgentMetricsView, EngineMetrics, Job, JobFilter, JobStatus, RoutingDecision};
use orkestra_core::{
    AgentInstance, AgentState, JobError, JobEvent, JobRequest, OrkestraError, OrkestraResult,
};
use orkestra_registry::{AgentFilter, AgentRegistry};
use orkestra_security::{AuditLog, AuditOutcome, RequestValidator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

struct Dispatcher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The job engine: validates requests, queues jobs, routes them to idle
/// agents and drives each through its execution backend.
///
/// Construct it, wrap it in an `Arc` and call [`start`](Self::start) to run
/// the dispatch loop.
pub struct JobEngine {
    config: EngineConfig,
    registry: Arc<AgentRegistry>,
    router: Router,
    backends: BackendRegistry,
    validator: RequestValidator,
    audit: Option<Arc<AuditLog>>,
    jobs: Mutex<JobQueue>,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
    active_jobs: AtomicUsize,
    wake: Notify,
    events: broadcast::Sender<JobEvent>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl JobEngine {
    /// An engine over `registry` with the default router and validator.
    pub fn new(registry: Arc<AgentRegistry>, backends: BackendRegistry, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            router: Router::new(registry.clone()),
            registry,
            backends,
            validator: RequestValidator::default(),
            audit: None,
            jobs: Mutex::new(JobQueue::new()),
            waiters: Mutex::new(HashMap::new()),
            active_jobs: AtomicUsize::new(0),
            wake: Notify::new(),
            events,
            dispatcher: Mutex::new(None),
        }
    }

    /// Replace the request validator.
    pub fn with_validator(mut self, validator: RequestValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the router (e.g. one with custom strategies).
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Record job outcomes and permission denials in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The registry jobs are routed against.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The router, for inspecting candidates or strategies.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Spawn the dispatch loop. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            warn!("Job engine already started");
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).dispatch_loop(rx));
        *dispatcher = Some(Dispatcher { shutdown, handle });
        info!(
            max_concurrent_jobs = self.config.concurrency_limit(),
            "Job engine started"
        );
    }

    /// Stop the dispatch loop. Queued jobs stay queued; in-flight executions
    /// run to completion.
    pub async fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(Dispatcher { shutdown, handle }) = dispatcher {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
            info!("Job engine stopped");
        }
    }

    /// Whether the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.dispatcher.lock().is_some()
    }

    /// Submit a request and wait for its result.
    ///
    /// Validation failures are returned before any job is created. The wait
    /// is bounded by the request's timeout (or the configured default); on
    /// elapse the job is failed with [`OrkestraError::Timeout`] even if its
    /// backend is still running.
    pub async fn submit(&self, request: JobRequest) -> OrkestraResult<serde_json::Value> {
        let timeout_ms = request
            .timeout_ms()
            .filter(|t| *t > 0)
            .unwrap_or(self.config.default_timeout_ms);

        let (tx, rx) = oneshot::channel();
        let job_id = self.enqueue(request, Some(tx))?;

        if tokio::time::timeout(Duration::from_millis(timeout_ms), rx)
            .await
            .is_err()
        {
            self.expire(job_id, timeout_ms);
        }
        self.outcome(job_id)
    }

    /// Submit a request without waiting. Returns the job id.
    pub fn submit_detached(&self, request: JobRequest) -> OrkestraResult<Uuid> {
        self.enqueue(request, None)
    }

    /// A copy of one job.
    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    /// Jobs matching `filter`, oldest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        self.jobs.lock().list(filter)
    }

    /// Job counts plus per-agent registry metrics.
    pub fn get_metrics(&self) -> EngineMetrics {
        let (total_jobs, queued_jobs) = {
            let jobs = self.jobs.lock();
            (jobs.total_count(), jobs.queued_count())
        };
        let agents = self
            .registry
            .list(&AgentFilter::default())
            .into_iter()
            .map(|a| AgentMetricsView {
                id: a.id().to_string(),
                name: a.definition.metadata.name.clone(),
                state: a.state,
                metrics: a.metrics,
            })
            .collect();
        EngineMetrics {
            total_jobs,
            active_jobs: self.active_jobs.load(Ordering::SeqCst),
            queued_jobs,
            agents,
        }
    }

    /// Drop terminal jobs from the job table.
    pub fn prune_finished(&self) -> usize {
        let removed = self.jobs.lock().prune_finished();
        if removed > 0 {
            debug!(removed, "Pruned finished jobs");
        }
        removed
    }

    fn enqueue(
        &self,
        request: JobRequest,
        waiter: Option<oneshot::Sender<()>>,
    ) -> OrkestraResult<Uuid> {
        let warnings = self.validator.validate_request(&request).into_result()?;
        for warning in &warnings {
            warn!(
                capability = %request.capability_name(),
                warning = %warning,
                "Request accepted with warning"
            );
        }

        let capability = request.capability_name().to_string();
        let job = Job::new(request);
        let job_id = job.id;

        if let Some(tx) = waiter {
            self.waiters.lock().insert(job_id, tx);
        }
        self.jobs.lock().push(job);

        info!(job_id = %job_id, capability = %capability, "Job submitted");
        if self.audit.is_some() {
            let payload = self
                .jobs
                .lock()
                .get(job_id)
                .and_then(|j| j.request.payload.as_ref())
                .map(|p| self.validator.sanitize_payload(p));
            self.audit(
                job_id,
                None,
                "job_submitted",
                serde_json::json!({ "capability": capability, "payload": payload }),
                AuditOutcome::Success,
            );
        }
        self.emit(JobEvent::Submitted { job_id, capability });
        self.wake.notify_one();
        Ok(job_id)
    }

    async fn dispatch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.poll_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            self.dispatch_ready();
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tick.tick() => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("Dispatch loop exiting");
    }

    /// Start queued jobs while under the concurrency limit.
    fn dispatch_ready(self: &Arc<Self>) {
        while self.active_jobs.load(Ordering::SeqCst) < self.config.concurrency_limit() {
            let next = self.jobs.lock().pop();
            match next {
                Some(job_id) => self.dispatch(job_id),
                None => break,
            }
        }
    }

    fn dispatch(self: &Arc<Self>, job_id: Uuid) {
        let request = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(job_id) else {
                return;
            };
            if !job.advance(JobStatus::Routing) {
                return;
            }
            job.request.clone()
        };

        // Routing and the idle -> busy flip happen back to back on the
        // dispatch loop, the only writer of agent busy state.
        let decision = match self.router.route(&request) {
            Ok(decision) => match self.registry.claim(&decision.agent_id) {
                Ok(()) => decision,
                Err(e) => {
                    self.fail_unrouted(job_id, OrkestraError::Routing(e.detail()));
                    return;
                }
            },
            Err(e) => {
                self.fail_unrouted(job_id, e);
                return;
            }
        };
        let agent_id = decision.agent_id.clone();
        let claimed_at = Instant::now();

        let job = self
            .jobs
            .lock()
            .get_mut(job_id)
            .and_then(|job| job.assign(decision.clone()).then(|| job.clone()));
        let Some(job) = job else {
            // The caller gave up while the job was routing.
            self.release(&agent_id);
            return;
        };

        info!(
            job_id = %job_id,
            agent_id = %agent_id,
            capability = %decision.matched_capability,
            strategy = %decision.strategy,
            "Job routed"
        );
        self.emit(JobEvent::Routed {
            job_id,
            agent_id: agent_id.clone(),
        });

        let Some(agent) = self.registry.get(&agent_id) else {
            let err = OrkestraError::NotFound(format!("agent '{agent_id}' is not registered"));
            self.finish(job_id, &agent_id, Err(err), 0);
            return;
        };

        if let Err(e) = self.check_permissions(&job, &agent, &decision) {
            self.finish(job_id, &agent_id, Err(e), elapsed_ms(claimed_at));
            return;
        }

        let backend = match self.backends.get(agent.definition.runtime_kind) {
            Ok(backend) => backend,
            Err(e) => {
                self.finish(job_id, &agent_id, Err(e), elapsed_ms(claimed_at));
                return;
            }
        };

        self.active_jobs.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let limit_ms = agent.definition.limits.max_execution_time_ms;
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                Duration::from_millis(limit_ms),
                backend.execute(&job, &agent),
            )
            .await
            {
                Ok(Ok(output)) => {
                    let duration = output.duration_ms.unwrap_or_else(|| elapsed_ms(started));
                    (Ok(output.result), duration)
                }
                Ok(Err(e)) => (Err(e), elapsed_ms(started)),
                Err(_) => (
                    Err(OrkestraError::Timeout(format!(
                        "agent '{}' exceeded its {limit_ms}ms execution limit",
                        agent.id()
                    ))),
                    elapsed_ms(started),
                ),
            };

            let (result, duration_ms) = outcome;
            engine.finish(job.id, agent.id(), result, duration_ms);
            engine.active_jobs.fetch_sub(1, Ordering::SeqCst);
            engine.wake.notify_one();
        });
    }

    /// Permissions required by the matched capability and the agent's
    /// security block, checked against the engine's grants.
    fn check_permissions(
        &self,
        job: &Job,
        agent: &AgentInstance,
        decision: &RoutingDecision,
    ) -> OrkestraResult<()> {
        let mut required: Vec<String> = agent
            .definition
            .capability(&decision.matched_capability)
            .map(|c| c.permissions.clone())
            .unwrap_or_default();
        required.extend(agent.definition.security.required_permissions.iter().cloned());

        let granted = &self.config.granted_permissions;
        if self.validator.validate_permissions(&required, granted) {
            return Ok(());
        }

        let missing = granted.missing(&required).join(", ");
        warn!(job_id = %job.id, agent_id = %agent.id(), missing = %missing, "Permission denied");
        self.audit(
            job.id,
            Some(agent.id()),
            "permission_denied",
            serde_json::json!({ "missing": missing }),
            AuditOutcome::Denied,
        );
        Err(OrkestraError::Permission(format!(
            "capability '{}' on agent '{}' requires ungranted permission(s): {missing}",
            decision.matched_capability,
            agent.id()
        )))
    }

    /// Terminal transition for a job whose agent was engaged.
    ///
    /// Metrics are recorded only if this call is what ends the job; a result
    /// arriving after the caller timed out is discarded. The agent is
    /// returned to `idle` either way.
    fn finish(
        &self,
        job_id: Uuid,
        agent_id: &str,
        result: OrkestraResult<serde_json::Value>,
        duration_ms: u64,
    ) {
        let success = result.is_ok();
        let ended = {
            let mut jobs = self.jobs.lock();
            match (jobs.get_mut(job_id), &result) {
                (Some(job), Ok(value)) => job.complete(value.clone()),
                (Some(job), Err(e)) => job.fail(e),
                (None, _) => false,
            }
        };

        if ended {
            if let Err(e) = self.registry.record_execution(agent_id, success, duration_ms) {
                warn!(agent_id = %agent_id, error = %e, "Failed to record execution");
            }
        } else {
            debug!(job_id = %job_id, agent_id = %agent_id, "Discarding result for finished job");
        }
        self.release(agent_id);

        if !ended {
            return;
        }
        match &result {
            Ok(_) => {
                info!(job_id = %job_id, agent_id = %agent_id, duration_ms, "Job completed");
                self.audit(
                    job_id,
                    Some(agent_id),
                    "job_completed",
                    serde_json::json!({ "duration_ms": duration_ms }),
                    AuditOutcome::Success,
                );
                self.emit(JobEvent::Completed {
                    job_id,
                    agent_id: agent_id.to_string(),
                    duration_ms,
                });
            }
            Err(e) => {
                warn!(job_id = %job_id, agent_id = %agent_id, error = %e, "Job failed");
                self.audit(
                    job_id,
                    Some(agent_id),
                    "job_failed",
                    serde_json::json!({ "kind": e.kind(), "error": e.detail() }),
                    AuditOutcome::Error,
                );
                self.emit(JobEvent::Failed {
                    job_id,
                    agent_id: Some(agent_id.to_string()),
                    kind: e.kind(),
                });
            }
        }
        self.notify_waiter(job_id);
    }

    /// Fail a job before any agent was engaged. No metrics are recorded.
    fn fail_unrouted(&self, job_id: Uuid, error: OrkestraError) {
        let ended = self
            .jobs
            .lock()
            .get_mut(job_id)
            .is_some_and(|job| job.fail(&error));
        if !ended {
            return;
        }
        warn!(job_id = %job_id, error = %error, "Job failed before dispatch");
        self.audit(
            job_id,
            None,
            "job_failed",
            serde_json::json!({ "kind": error.kind(), "error": error.detail() }),
            AuditOutcome::Error,
        );
        self.emit(JobEvent::Failed {
            job_id,
            agent_id: None,
            kind: error.kind(),
        });
        self.notify_waiter(job_id);
    }

    /// The caller's wait elapsed: fail the job if it is still running.
    ///
    /// If an agent was already executing it, the failure counts against that
    /// agent. The agent stays `busy` until its backend call returns.
    fn expire(&self, job_id: Uuid, timeout_ms: u64) {
        let error =
            OrkestraError::Timeout(format!("job {job_id} did not finish within {timeout_ms}ms"));
        let engaged = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(job_id) else {
                return;
            };
            let agent = job.agent_id.clone();
            if !job.fail(&error) {
                return;
            }
            agent.map(|a| (a, job.execution_ms().unwrap_or(0)))
        };

        warn!(job_id = %job_id, timeout_ms, "Job timed out");
        if let Some((agent_id, duration_ms)) = &engaged {
            if let Err(e) = self.registry.record_execution(agent_id, false, *duration_ms) {
                warn!(agent_id = %agent_id, error = %e, "Failed to record execution");
            }
        }
        let agent_id = engaged.map(|(a, _)| a);
        self.audit(
            job_id,
            agent_id.as_deref(),
            "job_timeout",
            serde_json::json!({ "timeout_ms": timeout_ms }),
            AuditOutcome::Error,
        );
        self.emit(JobEvent::Failed {
            job_id,
            agent_id,
            kind: error.kind(),
        });
        self.waiters.lock().remove(&job_id);
    }

    fn outcome(&self, job_id: Uuid) -> OrkestraResult<serde_json::Value> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| OrkestraError::NotFound(format!("job {job_id} is no longer tracked")))?;
        match job.status {
            JobStatus::Completed => Ok(job.result.clone().unwrap_or_default()),
            JobStatus::Failed => Err(job
                .error
                .as_ref()
                .map(JobError::to_error)
                .unwrap_or_else(|| OrkestraError::Execution(format!("job {job_id} failed")))),
            status => Err(OrkestraError::Execution(format!(
                "job {job_id} is still {status}"
            ))),
        }
    }

    fn release(&self, agent_id: &str) {
        if let Err(e) = self.registry.update_agent_state(agent_id, AgentState::Idle) {
            debug!(agent_id = %agent_id, error = %e, "Could not restore agent to idle");
        }
    }

    fn notify_waiter(&self, job_id: Uuid) {
        if let Some(tx) = self.waiters.lock().remove(&job_id) {
            let _ = tx.send(());
        }
    }

    fn audit(
        &self,
        job_id: Uuid,
        agent_id: Option<&str>,
        action: &str,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) {
        if let Some(audit) = &self.audit {
            audit.log_action(
                Some(job_id),
                agent_id.map(str::to_string),
                action,
                details,
                outcome,
            );
        }
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
