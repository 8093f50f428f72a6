//! `orkestra.toml` parsing.

use orkestra_core::RuntimeKind;
use orkestra_orchestrator::EngineConfig;
use orkestra_security::ValidationConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level `orkestra.toml`. Every section is optional.
#[derive(Debug, Deserialize)]
pub struct OrkestraConfig {
    /// Holds the registry snapshot and audit logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Files or directories scanned for agent definitions.
    #[serde(default = "default_agent_paths")]
    pub agent_paths: Vec<PathBuf>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

/// `[security]`: permission enforcement and the grants the engine holds.
#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enforce_permissions: bool,
    #[serde(default)]
    pub granted_permissions: Vec<String>,
}

/// `[health]`: how often the health monitor runs.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
        }
    }
}

/// `[backends]`
#[derive(Debug, Deserialize)]
pub struct BackendsConfig {
    /// Runtime kinds that get a process adapter.
    #[serde(default = "default_backends")]
    pub enabled: Vec<RuntimeKind>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            enabled: default_backends(),
        }
    }
}

impl Default for OrkestraConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            agent_paths: default_agent_paths(),
            engine: EngineConfig::default(),
            validation: ValidationConfig::default(),
            security: SecurityConfig::default(),
            health: HealthConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}

impl OrkestraConfig {
    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::parse(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display()))
    }

    /// Parse TOML text.
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Engine settings with the `[security]` grants folded in.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        for permission in &self.security.granted_permissions {
            engine.granted_permissions.grant(permission.clone());
        }
        engine
    }

    /// Validation settings with the `[security]` enforcement flag folded in.
    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            enforce_permissions: self.validation.enforce_permissions
                || self.security.enforce_permissions,
            ..self.validation.clone()
        }
    }

    /// Health check period, at least one second.
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs.max(1))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }

    /// Agent paths resolved against the directory holding the config file.
    pub fn resolved_agent_paths(&self, config_dir: &Path) -> Vec<PathBuf> {
        self.agent_paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { config_dir.join(p) })
            .collect()
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_agent_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("./agents")]
}
fn default_health_interval() -> u64 {
    30
}
fn default_backends() -> Vec<RuntimeKind> {
    vec![RuntimeKind::Node, RuntimeKind::External]
}
