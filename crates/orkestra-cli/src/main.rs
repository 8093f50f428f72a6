mod agent_watcher;
mod config;

use agent_watcher::{apply_changes, AgentWatcher};
use clap::{Parser, Subcommand};
use config::OrkestraConfig;
use orkestra_core::{JobRequest, Priority};
use orkestra_orchestrator::{BackendRegistry, HealthMonitor, JobEngine};
use orkestra_registry::{AgentFilter, AgentLoader, AgentRegistry};
use orkestra_security::{AuditLog, RequestValidator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WATCH_DEBOUNCE_MS: u64 = 500;
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "orkestra", about = "Orkestra agent registry and job orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "orkestra.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect agent definitions
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },
    /// Submit one job and print its result
    Run {
        /// Capability to route on
        #[arg(long)]
        capability: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Caller timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<i64>,
        /// low, medium, high or critical
        #[arg(long)]
        priority: Option<Priority>,
        /// Routing strategy name
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Run the engine, health monitor and agent hot reload until Ctrl-C
    Serve,
}

#[derive(Subcommand)]
enum AgentsAction {
    /// List agents found under the configured paths
    List {
        /// Only agents with a tag containing this text
        #[arg(long)]
        tag: Option<String>,
        /// Only agents offering this exact capability
        #[arg(long)]
        capability: Option<String>,
    },
    /// Check agent files without registering them anywhere
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = OrkestraConfig::load(&cli.config)?;

    // Relative agent paths resolve against the config file's directory
    let config_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let agent_paths = config.resolved_agent_paths(&config_dir);

    match cli.command {
        Commands::Agents { action } => match action {
            AgentsAction::List { tag, capability } => {
                let registry = Arc::new(AgentRegistry::in_memory());
                AgentLoader::new(registry.clone()).load_all(&agent_paths);
                list_agents(&registry, tag, capability);
            }
            AgentsAction::Validate { paths } => validate_files(&paths)?,
        },
        Commands::Run {
            capability,
            payload,
            timeout_ms,
            priority,
            strategy,
        } => {
            let mut request = JobRequest::new(capability);
            if let Some(raw) = payload {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("--payload is not valid JSON: {e}"))?;
                request = request.with_payload(value);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout_ms(ms);
            }
            if let Some(p) = priority {
                request = request.with_priority(p);
            }
            if let Some(s) = strategy {
                request = request.with_strategy(s);
            }

            let registry = Arc::new(AgentRegistry::in_memory());
            AgentLoader::new(registry.clone()).load_all(&agent_paths);
            let engine = Arc::new(build_engine(&config, registry));
            engine.start();

            let outcome = engine.submit(request).await;
            engine.shutdown().await;
            let result = outcome?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve => serve(config, agent_paths).await?,
    }

    Ok(())
}

fn build_engine(config: &OrkestraConfig, registry: Arc<AgentRegistry>) -> JobEngine {
    let backends = BackendRegistry::with_process_backends(&config.backends.enabled);
    JobEngine::new(registry, backends, config.engine_config())
        .with_validator(RequestValidator::new(config.validation_config()))
}

async fn serve(config: OrkestraConfig, agent_paths: Vec<PathBuf>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir).map_err(|e| {
        anyhow::anyhow!(
            "Failed to create data dir '{}': {e}",
            config.data_dir.display()
        )
    })?;

    // Loader and watcher must agree on paths for removals to match.
    let agent_paths: Vec<PathBuf> = agent_paths
        .iter()
        .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
        .collect();

    let registry = Arc::new(AgentRegistry::open(config.snapshot_path())?);
    if !registry.is_empty() {
        info!(agents = registry.len(), "Restored agents from snapshot");
    }
    let loader = Arc::new(AgentLoader::new(registry.clone()));
    loader.load_all(&agent_paths);

    let audit = Arc::new(AuditLog::new(config.audit_dir()));
    let engine = Arc::new(build_engine(&config, registry.clone()).with_audit(audit));
    engine.start();

    let monitor = HealthMonitor::spawn(registry.clone(), config.health_interval());

    let watch_loader = loader.clone();
    let _watcher = AgentWatcher::start(&agent_paths, WATCH_DEBOUNCE_MS, move |files| {
        apply_changes(&watch_loader, &files);
    })?;

    info!(agents = registry.len(), "Orkestra serving, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut metrics_tick = tokio::time::interval(METRICS_LOG_INTERVAL);
    metrics_tick.tick().await;

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = metrics_tick.tick() => {
                let metrics = engine.get_metrics();
                info!(
                    total_jobs = metrics.total_jobs,
                    active_jobs = metrics.active_jobs,
                    queued_jobs = metrics.queued_jobs,
                    agents = metrics.agents.len(),
                    "Engine metrics"
                );
                let pruned = engine.prune_finished();
                if pruned > 0 {
                    info!(pruned, "Finished jobs pruned");
                }
            }
        }
    }

    info!("Shutting down");
    engine.shutdown().await;
    monitor.stop().await;
    Ok(())
}

fn list_agents(registry: &AgentRegistry, tag: Option<String>, capability: Option<String>) {
    let filter = AgentFilter {
        tag,
        capability,
        ..Default::default()
    };
    let agents = registry.list(&filter);
    if agents.is_empty() {
        println!("No agents found.");
        println!("Add agent files under the paths listed in orkestra.toml (agent_paths)");
        return;
    }

    println!(
        "{:<24} {:<10} {:<12} {:<9} CAPABILITIES",
        "ID", "VERSION", "TYPE", "RUNTIME"
    );
    for agent in &agents {
        let def = &agent.definition;
        let capabilities: Vec<&str> = def.capabilities.iter().map(|c| c.name.as_str()).collect();
        println!(
            "{:<24} {:<10} {:<12} {:<9} {}",
            agent.id(),
            def.metadata.version,
            def.agent_type.to_string(),
            def.runtime_kind.to_string(),
            capabilities.join(", ")
        );
    }
    println!("\nTotal: {} agent(s)", agents.len());
}

fn validate_files(paths: &[PathBuf]) -> anyhow::Result<()> {
    let files = orkestra_registry::discover(paths);
    if files.is_empty() {
        anyhow::bail!("no agent files found under the given paths");
    }

    let mut failures = 0;
    for file in &files {
        // Fresh registry per file so ids shared across files do not collide.
        let scratch = AgentRegistry::in_memory();
        let outcome = orkestra_registry::read_definition(file).and_then(|def| {
            let id = def.id().to_string();
            scratch.register(def).map(|()| id)
        });
        match outcome {
            Ok(id) => println!("ok    {}  ({id})", file.display()),
            Err(e) => {
                failures += 1;
                println!("FAIL  {}  {e}", file.display());
            }
        }
    }

    println!("\n{} file(s), {failures} failure(s)", files.len());
    if failures > 0 {
        anyhow::bail!("{failures} agent file(s) failed validation");
    }
    Ok(())
}
