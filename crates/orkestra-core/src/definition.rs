use crate::error::{OrkestraError, OrkestraResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What an agent does with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Performs side-effecting work.
    Executor,
    /// Converts input from one shape to another.
    Transformer,
    /// Inspects input and reports findings.
    Analyzer,
    /// Produces new content.
    Generator,
    /// Checks input against rules.
    Validator,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Executor => write!(f, "executor"),
            AgentType::Transformer => write!(f, "transformer"),
            AgentType::Analyzer => write!(f, "analyzer"),
            AgentType::Generator => write!(f, "generator"),
            AgentType::Validator => write!(f, "validator"),
        }
    }
}

/// Selects the execution backend adapter that runs an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// A Node.js script runtime.
    Node,
    /// A Python interpreter.
    Python,
    /// A Deno script runtime.
    Deno,
    /// An external executable or remote executor.
    External,
}

impl RuntimeKind {
    /// All runtime kinds, in declaration order.
    pub const ALL: [RuntimeKind; 4] = [
        RuntimeKind::Node,
        RuntimeKind::Python,
        RuntimeKind::Deno,
        RuntimeKind::External,
    ];
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Node => write!(f, "node"),
            RuntimeKind::Python => write!(f, "python"),
            RuntimeKind::Deno => write!(f, "deno"),
            RuntimeKind::External => write!(f, "external"),
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = OrkestraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" => Ok(RuntimeKind::Node),
            "python" => Ok(RuntimeKind::Python),
            "deno" => Ok(RuntimeKind::Deno),
            "external" => Ok(RuntimeKind::External),
            other => Err(OrkestraError::Config(format!("unknown runtime kind: {other}"))),
        }
    }
}

/// Whether an agent definition is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum AgentStatus {
    #[default]
    Active,
    Inactive,
}

/// Identity and descriptive metadata of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    /// Globally unique agent id.
    #[serde(default)]
    pub id: String,
    /// Human-readable display name.
    #[serde(default)]
    pub name: String,
    /// Definition version; replacing an agent bumps it by convention.
    #[serde(default)]
    pub version: String,
    /// Free text shown in listings.
    #[serde(default)]
    pub description: String,
    /// Free-form labels, matched by substring in registry filters.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Inactive agents stay registered but are never routed to.
    #[serde(default)]
    pub status: AgentStatus,
    /// Defaults to load time when the file omits it.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Bumped whenever the definition is replaced.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl AgentMetadata {
    /// Metadata with the three required fields set and everything else defaulted.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            tags: Vec::new(),
            status: AgentStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A named operation an agent can perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapability {
    /// Exact name requests route on; the part before `:`, `.` or `/` is its category.
    pub name: String,
    /// Free text shown in listings.
    #[serde(default)]
    pub description: String,
    /// Permissions a caller must hold to use this capability.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl AgentCapability {
    /// A capability with no description or permissions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            permissions: Vec::new(),
        }
    }

    /// Attach required permissions.
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    /// The category a capability belongs to: the segment before the first
    /// `:`, `.` or `/`. A name without a separator is its own category.
    pub fn category(&self) -> &str {
        self.name
            .split([':', '.', '/'])
            .next()
            .unwrap_or(self.name.as_str())
    }
}

/// Security constraints declared by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConstraints {
    /// Whether the agent must run isolated. Defaults to `true`.
    #[serde(default = "default_sandboxed")]
    pub sandboxed: bool,
    /// Hosts the agent may reach over the network.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Actions the agent must never be asked to perform.
    #[serde(default)]
    pub denied_actions: Vec<String>,
    /// Permissions required by every capability of this agent.
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

impl Default for SecurityConstraints {
    fn default() -> Self {
        Self {
            sandboxed: default_sandboxed(),
            allowed_hosts: Vec::new(),
            denied_actions: Vec::new(),
            required_permissions: Vec::new(),
        }
    }
}

fn default_sandboxed() -> bool {
    true
}

/// Resource limits for a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Wall-clock cap on one backend call. Defaults to 30s.
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,
    /// Advisory memory cap in MiB. Defaults to 512.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Advisory concurrency cap. Defaults to 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_execution_time_ms: default_max_execution_time_ms(),
            max_memory_mb: default_max_memory_mb(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_execution_time_ms() -> u64 {
    30_000
}
fn default_max_memory_mb() -> u64 {
    512
}
fn default_max_concurrent() -> u32 {
    1
}

/// How the process adapter launches the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Script path or executable.
    pub entrypoint: String,
    /// Extra arguments passed after the entrypoint.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables added to the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Declarative description of an agent.
///
/// Immutable once registered; updates replace the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Identity, version and labels.
    pub metadata: AgentMetadata,
    /// Role of the agent, serialized as `type`.
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    /// Runtime the process backend launches the agent with.
    pub runtime_kind: RuntimeKind,
    /// What the agent can do. Must not be empty.
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
    /// Required section, even if empty.
    pub security: SecurityConstraints,
    /// Per-execution limits; defaults apply when omitted.
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Launch settings for the process backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeSettings>,
}

impl AgentDefinition {
    /// A definition with default security and limits.
    pub fn new(metadata: AgentMetadata, agent_type: AgentType, runtime_kind: RuntimeKind) -> Self {
        Self {
            metadata,
            agent_type,
            runtime_kind,
            capabilities: Vec::new(),
            security: SecurityConstraints::default(),
            limits: ResourceLimits::default(),
            runtime: None,
        }
    }

    /// Add a capability.
    pub fn with_capability(mut self, capability: AgentCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Replace the security block.
    pub fn with_security(mut self, security: SecurityConstraints) -> Self {
        self.security = security;
        self
    }

    /// Replace the resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the process launch settings.
    pub fn with_runtime(mut self, runtime: RuntimeSettings) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The agent id.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Look up a capability by exact name.
    pub fn capability(&self, name: &str) -> Option<&AgentCapability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Deserialize a definition from a JSON value.
    ///
    /// Type errors (unknown `type`, unknown `runtimeKind`, non-boolean
    /// `sandboxed`, ...) are reported as [`OrkestraError::Registration`].
    /// Unknown fields are ignored.
    pub fn from_value(value: serde_json::Value) -> OrkestraResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| OrkestraError::Registration(format!("invalid agent definition: {e}")))
    }

    /// Check the semantic rules every registered definition must satisfy.
    ///
    /// All violations are reported together in a single
    /// [`OrkestraError::Registration`].
    pub fn validate(&self) -> OrkestraResult<()> {
        let mut problems = Vec::new();

        if self.metadata.id.trim().is_empty() {
            problems.push("metadata.id is required".to_string());
        }
        if self.metadata.name.trim().is_empty() {
            problems.push("metadata.name is required".to_string());
        }
        if self.metadata.version.trim().is_empty() {
            problems.push("metadata.version is required".to_string());
        }
        if self.capabilities.is_empty() {
            problems.push("at least one capability is required".to_string());
        }
        for (i, cap) in self.capabilities.iter().enumerate() {
            if cap.name.trim().is_empty() {
                problems.push(format!("capabilities[{i}].name is required"));
            }
        }
        if self.limits.max_execution_time_ms == 0 {
            problems.push("limits.maxExecutionTimeMs must be positive".to_string());
        }
        if self.limits.max_concurrent == 0 {
            problems.push("limits.maxConcurrent must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            let id = if self.metadata.id.is_empty() {
                "<unnamed>"
            } else {
                self.metadata.id.as_str()
            };
            Err(OrkestraError::Registration(format!(
                "agent '{id}': {}",
                problems.join("; ")
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> AgentDefinition {
        AgentDefinition::new(
            AgentMetadata::new("agent-1", "Translator", "1.0.0"),
            AgentType::Transformer,
            RuntimeKind::Node,
        )
        .with_capability(AgentCapability::new("translate"))
    }

    #[test]
    fn test_valid_definition() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_missing_capabilities_rejected() {
        let mut def = sample();
        def.capabilities.clear();
        let err = def.validate().unwrap_err();
        assert!(matches!(err, OrkestraError::Registration(_)));
        assert!(err.to_string().contains("capability"));
    }

    #[test]
    fn test_all_problems_reported() {
        let mut def = sample();
        def.metadata.name = String::new();
        def.metadata.version = "  ".into();
        let msg = def.validate().unwrap_err().to_string();
        assert!(msg.contains("metadata.name"));
        assert!(msg.contains("metadata.version"));
    }

    #[test]
    fn test_from_value_camel_case_and_defaults() {
        let def = AgentDefinition::from_value(serde_json::json!({
            "metadata": {"id": "a", "name": "A", "version": "1"},
            "type": "analyzer",
            "runtimeKind": "python",
            "capabilities": [{"name": "scan:code", "permissions": ["fs:read"]}],
            "security": {"sandboxed": false},
            "somethingNew": {"ignored": true}
        }))
        .unwrap();
        assert_eq!(def.agent_type, AgentType::Analyzer);
        assert_eq!(def.runtime_kind, RuntimeKind::Python);
        assert!(!def.security.sandboxed);
        assert_eq!(def.limits, ResourceLimits::default());
        assert_eq!(def.capabilities[0].category(), "scan");
    }

    #[test]
    fn test_from_value_rejects_bad_enum() {
        let err = AgentDefinition::from_value(serde_json::json!({
            "metadata": {"id": "a", "name": "A", "version": "1"},
            "type": "wizard",
            "runtimeKind": "node",
            "capabilities": [{"name": "x"}],
            "security": {"sandboxed": true}
        }))
        .unwrap_err();
        assert!(matches!(err, OrkestraError::Registration(_)));
    }

    #[test]
    fn test_from_value_rejects_non_bool_sandboxed() {
        let err = AgentDefinition::from_value(serde_json::json!({
            "metadata": {"id": "a", "name": "A", "version": "1"},
            "type": "executor",
            "runtimeKind": "node",
            "capabilities": [{"name": "x"}],
            "security": {"sandboxed": "yes"}
        }))
        .unwrap_err();
        assert!(matches!(err, OrkestraError::Registration(_)));
    }

    #[test]
    fn test_runtime_kind_from_str() {
        assert_eq!("Deno".parse::<RuntimeKind>().unwrap(), RuntimeKind::Deno);
        assert!("ruby".parse::<RuntimeKind>().is_err());
    }
}
