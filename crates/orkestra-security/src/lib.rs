//! Security primitives for the Orkestra orchestrator.
//!
//! Provides the request validation middleware, payload redaction,
//! permission sets and the audit trail used by the job engine.
//!
//! # Main types
//!
//! - [`RequestValidator`]: Validates job requests and redacts sensitive payload fields.
//! - [`PermissionSet`]: A collection of granted permission strings.
//! - [`AuditLog`]: Append-only audit trail persisted to disk.

/// Audit logging module.
pub mod audit;
/// Permission sets.
pub mod permission;
/// Request validation and payload sanitization.
pub mod validator;

pub use audit::{AuditLog, AuditOutcome};
pub use permission::PermissionSet;
pub use validator::{
    RequestValidator, ValidationConfig, ValidationReport, DEFAULT_MAX_PAYLOAD_BYTES,
    REDACTION_MARKER,
};
