use crate::types::Job;
use async_trait::async_trait;
use orkestra_core::{AgentInstance, OrkestraError, OrkestraResult, RuntimeKind};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// What a backend returns for a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    /// Value stored as the job result.
    pub result: serde_json::Value,
    /// Duration reported by the backend itself, if it measures one.
    pub duration_ms: Option<u64>,
}

impl ExecutionOutput {
    /// An output without a self-reported duration.
    pub fn new(result: serde_json::Value) -> Self {
        Self {
            result,
            duration_ms: None,
        }
    }
}

/// Runs a job on behalf of an agent. One implementation per runtime kind.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Execute `job` with `agent`. An `Err` marks the job failed.
    async fn execute(&self, job: &Job, agent: &AgentInstance) -> OrkestraResult<ExecutionOutput>;
}

/// Map from runtime kind to the backend that handles it.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<RuntimeKind, Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    /// A registry with no backends wired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a [`ProcessBackend`] for each of `kinds`.
    pub fn with_process_backends(kinds: &[RuntimeKind]) -> Self {
        let mut registry = Self::new();
        for kind in kinds {
            registry.register(*kind, Arc::new(ProcessBackend::new(*kind)));
        }
        registry
    }

    /// Wire `backend` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: RuntimeKind, backend: Arc<dyn ExecutionBackend>) {
        info!(runtime = %kind, backend = backend.name(), "Registered execution backend");
        self.backends.insert(kind, backend);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, kind: RuntimeKind, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.register(kind, backend);
        self
    }

    /// The backend for `kind`, or [`OrkestraError::UnsupportedRuntime`].
    pub fn get(&self, kind: RuntimeKind) -> OrkestraResult<Arc<dyn ExecutionBackend>> {
        self.backends.get(&kind).cloned().ok_or_else(|| {
            OrkestraError::UnsupportedRuntime(format!("no execution backend for runtime '{kind}'"))
        })
    }

    /// Runtime kinds with a backend, in declaration order.
    pub fn kinds(&self) -> Vec<RuntimeKind> {
        RuntimeKind::ALL
            .iter()
            .copied()
            .filter(|k| self.backends.contains_key(k))
            .collect()
    }
}

/// Runs the agent's `runtime.entrypoint` as a child process.
///
/// The job payload is written to stdin as JSON; stdout is parsed as JSON,
/// falling back to a plain string. A non-zero exit status is an
/// [`OrkestraError::Execution`]. The child is killed if the call is dropped
/// (engine timeout).
pub struct ProcessBackend {
    kind: RuntimeKind,
}

impl ProcessBackend {
    /// A process backend for `kind`.
    pub fn new(kind: RuntimeKind) -> Self {
        Self { kind }
    }

    /// Program and leading arguments used to launch `entrypoint`.
    pub fn command_line(&self, entrypoint: &str) -> (String, Vec<String>) {
        match self.kind {
            RuntimeKind::Node => ("node".into(), vec![entrypoint.into()]),
            RuntimeKind::Python => ("python3".into(), vec![entrypoint.into()]),
            RuntimeKind::Deno => ("deno".into(), vec!["run".into(), entrypoint.into()]),
            RuntimeKind::External => (entrypoint.into(), Vec::new()),
        }
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(&self, job: &Job, agent: &AgentInstance) -> OrkestraResult<ExecutionOutput> {
        let runtime = agent.definition.runtime.as_ref().ok_or_else(|| {
            OrkestraError::Execution(format!(
                "agent '{}' has no runtime entrypoint configured",
                agent.id()
            ))
        })?;

        let (program, mut args) = self.command_line(&runtime.entrypoint);
        args.extend(runtime.args.iter().cloned());

        debug!(
            job_id = %job.id,
            agent_id = %agent.id(),
            program = %program,
            "Spawning agent process"
        );

        let mut child = tokio::process::Command::new(&program)
            .args(&args)
            .envs(&runtime.env)
            .env("ORKESTRA_JOB_ID", job.id.to_string())
            .env("ORKESTRA_CAPABILITY", job.request.capability_name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrkestraError::Execution(format!("Failed to spawn {program}: {e}")))?;

        let input = serde_json::to_vec(
            job.request
                .payload
                .as_ref()
                .unwrap_or(&serde_json::Value::Null),
        )?;
        if let Some(mut stdin) = child.stdin.take() {
            // A process that ignores its input may exit before reading it.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(job_id = %job.id, error = %e, "Agent process closed stdin early");
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrkestraError::Execution(format!(
                "{program} exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                truncate_output(stderr.trim(), 2_000)
            )));
        }

        let trimmed = stdout.trim();
        let result = serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()));
        Ok(ExecutionOutput::new(result))
    }
}

fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..end], s.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orkestra_core::{
        AgentCapability, AgentDefinition, AgentMetadata, AgentType, JobRequest, RuntimeSettings,
    };

    fn external_agent(entrypoint: &str, args: &[&str]) -> AgentInstance {
        let def = AgentDefinition::new(
            AgentMetadata::new("proc", "Proc", "1.0.0"),
            AgentType::Executor,
            RuntimeKind::External,
        )
        .with_capability(AgentCapability::new("run"))
        .with_runtime(RuntimeSettings {
            entrypoint: entrypoint.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: Default::default(),
        });
        AgentInstance::new(def, 0)
    }

    #[test]
    fn test_unwired_runtime_is_unsupported() {
        let registry = BackendRegistry::with_process_backends(&[RuntimeKind::Node]);
        assert_eq!(registry.kinds(), vec![RuntimeKind::Node]);
        let err = registry.get(RuntimeKind::Python).err().unwrap();
        assert!(matches!(err, OrkestraError::UnsupportedRuntime(_)));
    }

    #[test]
    fn test_command_lines() {
        let (program, args) = ProcessBackend::new(RuntimeKind::Deno).command_line("agent.ts");
        assert_eq!(program, "deno");
        assert_eq!(args, vec!["run", "agent.ts"]);
        let (program, args) = ProcessBackend::new(RuntimeKind::External).command_line("/bin/tool");
        assert_eq!(program, "/bin/tool");
        assert!(args.is_empty());
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        assert!(truncate_output(&"x".repeat(50), 10).contains("truncated"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_echoes_payload_as_json() {
        let backend = ProcessBackend::new(RuntimeKind::External);
        let agent = external_agent("cat", &[]);
        let job = Job::new(JobRequest::new("run").with_payload(serde_json::json!({"n": 1})));

        let output = backend.execute(&job, &agent).await.unwrap();
        assert_eq!(output.result, serde_json::json!({"n": 1}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_non_zero_exit_is_execution_error() {
        let backend = ProcessBackend::new(RuntimeKind::External);
        let agent = external_agent("sh", &["-c", "echo boom >&2; exit 3"]);
        let job = Job::new(JobRequest::new("run"));

        let err = backend.execute(&job, &agent).await.unwrap_err();
        assert!(matches!(err, OrkestraError::Execution(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_entrypoint_is_execution_error() {
        let backend = ProcessBackend::new(RuntimeKind::Node);
        let def = AgentDefinition::new(
            AgentMetadata::new("bare", "Bare", "1.0.0"),
            AgentType::Executor,
            RuntimeKind::Node,
        )
        .with_capability(AgentCapability::new("run"));
        let job = Job::new(JobRequest::new("run"));
        let err = backend
            .execute(&job, &AgentInstance::new(def, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, OrkestraError::Execution(_)));
    }
}
