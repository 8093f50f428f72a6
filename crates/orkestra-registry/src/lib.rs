//! Agent registry and file-based agent loader for Orkestra.
//!
//! The [`AgentRegistry`] owns every registered agent instance, persists a
//! snapshot after each mutation and broadcasts [`orkestra_core::AgentEvent`]s.
//! The [`AgentLoader`] discovers definition files (JSON, YAML or TOML) and
//! registers them.

/// Definition file discovery and loading.
pub mod loader;
/// The agent registry.
pub mod registry;
/// On-disk registry snapshots.
pub mod snapshot;

pub use loader::{
    discover, is_agent_path, read_definition, AgentLoader, DefinitionFormat, LoadOutcome,
};
pub use registry::{AgentFilter, AgentRegistry};
pub use snapshot::{RegistrySnapshot, SNAPSHOT_VERSION};
