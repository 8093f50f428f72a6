//! Core types and error definitions for the Orkestra agent orchestrator.
//!
//! This crate provides the foundational types shared across all Orkestra crates:
//! agent definitions and their runtime instances, job requests, registry and
//! job events, and the unified error type.
//!
//! # Main types
//!
//! - [`OrkestraError`]: Unified error enum for all Orkestra subsystems.
//! - [`OrkestraResult`]: Convenience alias for `Result<T, OrkestraError>`.
//! - [`AgentDefinition`]: Declarative description of an agent.
//! - [`AgentInstance`]: A registered agent with live state, health and metrics.
//! - [`JobRequest`]: A unit of work submitted to the job engine.
//! - [`AgentEvent`] / [`JobEvent`]: Notifications for subscribers.

/// Agent definition data model.
pub mod definition;
/// Unified error type.
pub mod error;
/// Registry and job notifications.
pub mod events;
/// Registered agent instances, state and metrics.
pub mod instance;
/// Job requests and their execution context.
pub mod request;

pub use definition::{
    AgentCapability, AgentDefinition, AgentMetadata, AgentStatus, AgentType, ResourceLimits,
    RuntimeKind, RuntimeSettings, SecurityConstraints,
};
pub use error::{ErrorKind, JobError, OrkestraError, OrkestraResult};
pub use events::{AgentEvent, JobEvent};
pub use instance::{AgentHealth, AgentInstance, AgentState, ExecutionMetrics, HealthStatus};
pub use request::{JobRequest, Priority, RequestContext};
