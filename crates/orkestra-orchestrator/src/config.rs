use orkestra_security::PermissionSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job engine settings. Every field has a default, so a partial TOML
/// `[engine]` table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Jobs allowed in `executing` at once, across all agents.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Caller wait budget when a request carries no timeout.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Dispatch loop safety-net tick; submissions also wake it directly.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Permissions the security policy grants to dispatched jobs.
    #[serde(default)]
    pub granted_permissions: PermissionSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            granted_permissions: PermissionSet::default(),
        }
    }
}

impl EngineConfig {
    /// Concurrency limit, never below one.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }

    /// Poll interval as a `Duration`, never below one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.granted_permissions.is_empty());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_concurrent_jobs": 0, "granted_permissions": ["fs:read"]}"#)
                .unwrap();
        assert_eq!(config.concurrency_limit(), 1);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert!(config.granted_permissions.has("fs:read"));
    }
}
