//! Job engine for the Orkestra agent orchestrator.
//!
//! Accepts validated job requests, queues them FIFO, routes each to the best
//! idle agent in the registry and runs it through the execution backend
//! selected by the agent's runtime kind, under a global concurrency limit.
//!
//! # Main types
//!
//! - [`JobEngine`]: Job lifecycle, dispatch loop, timeouts and metrics.
//! - [`Router`]: Capability matching with pluggable [`RoutingStrategy`]s.
//! - [`BackendRegistry`]: Runtime kind to [`ExecutionBackend`] map.
//! - [`HealthMonitor`]: Periodic agent health checks.

/// Execution backend trait and the process adapter.
pub mod backend;
/// Engine configuration.
pub mod config;
/// The job engine and dispatch loop.
pub mod engine;
/// In-memory job table and FIFO queue.
pub mod job_queue;
/// Periodic health checks.
pub mod monitor;
/// Agent selection.
pub mod router;
/// Jobs, routing decisions and engine metrics.
pub mod types;

pub use backend::{BackendRegistry, ExecutionBackend, ExecutionOutput, ProcessBackend};
pub use config::EngineConfig;
pub use engine::JobEngine;
pub use job_queue::JobQueue;
pub use monitor::HealthMonitor;
pub use router::{
    BestPerformanceStrategy, Candidate, Router, RoutingStrategy, SecurityFirstStrategy,
    DEFAULT_STRATEGY,
};
pub use types::{AgentMetricsView, EngineMetrics, Job, JobFilter, JobStatus, RoutingDecision};
