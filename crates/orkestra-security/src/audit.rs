use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// One audit record, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Job the action concerns, if any.
    pub job_id: Option<Uuid>,
    /// Agent the action concerns, if any.
    pub agent_id: Option<String>,
    /// What happened, e.g. `job.completed` or `permission.denied`.
    pub action: String,
    /// Action-specific fields.
    pub details: serde_json::Value,
    /// How the action ended.
    pub outcome: AuditOutcome,
}

/// How an audited action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The action went through.
    Success,
    /// Refused by a permission or validation check.
    Denied,
    /// Attempted but failed.
    Error,
}

/// Append-only audit log of dispatch decisions, written as JSON lines.
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditLog {
    /// Open `<log_dir>/audit.jsonl` for appending from a background task.
    /// Must be called inside a Tokio runtime.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "Failed to create audit dir");
            }
            let path = log_dir.join("audit.jsonl");
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Audit log unavailable, entries dropped");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(action = %entry.action, error = %e, "Unserializable audit entry");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = file.write_all(&line).await {
                    warn!(error = %e, "Failed to write audit entry");
                    continue;
                }
                if let Err(e) = file.flush().await {
                    warn!(error = %e, "Failed to flush audit log");
                }
            }
        });

        Self { tx }
    }

    /// Queue `entry` for the writer task. Never blocks.
    pub fn log(&self, entry: AuditEntry) {
        info!(
            job_id = ?entry.job_id,
            agent_id = ?entry.agent_id,
            action = %entry.action,
            outcome = ?entry.outcome,
            "audit"
        );
        let _ = self.tx.send(entry);
    }

    /// Build and log an entry stamped with the current time.
    pub fn log_action(
        &self,
        job_id: Option<Uuid>,
        agent_id: Option<String>,
        action: impl Into<String>,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            job_id,
            agent_id,
            action: action.into(),
            details,
            outcome,
        });
    }
}
