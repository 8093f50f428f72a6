use chrono::{DateTime, Utc};
use orkestra_core::{AgentInstance, OrkestraError, OrkestraResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Durable image of the registry's instance table.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub agents: Vec<AgentInstance>,
}

impl RegistrySnapshot {
    /// Capture the given instances, ordered by registration.
    pub fn capture<'a>(agents: impl IntoIterator<Item = &'a AgentInstance>) -> Self {
        let mut agents: Vec<AgentInstance> = agents.into_iter().cloned().collect();
        agents.sort_by_key(|a| a.registration_order);
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: Utc::now(),
            agents,
        }
    }

    /// Read a snapshot. A missing file yields `Ok(None)`.
    pub fn read(path: &Path) -> OrkestraResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&data).map_err(|e| {
            OrkestraError::Config(format!(
                "Failed to parse registry snapshot {}: {e}",
                path.display()
            ))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                path = %path.display(),
                version = %snapshot.version,
                "Registry snapshot has unexpected version, loading anyway"
            );
        }
        Ok(Some(snapshot))
    }

    /// Write the snapshot: serialize to a sibling temp file, then rename it
    /// over `path` so readers never observe a partial document.
    pub fn write(&self, path: &Path) -> OrkestraResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), agents = self.agents.len(), "Registry snapshot written");
        Ok(())
    }
}
