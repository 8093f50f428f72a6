use orkestra_registry::AgentRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic health checks over every registered agent.
///
/// Runs in its own task on its own timer; it touches only instance health
/// through the registry and never waits on the dispatch loop.
pub struct HealthMonitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start checking every `interval`. The first round runs immediately.
    pub fn spawn(registry: Arc<AgentRegistry>, interval: Duration) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let results = registry.health_check_all();
                        let unhealthy: Vec<&str> = results
                            .iter()
                            .filter(|(_, healthy)| !healthy)
                            .map(|(id, _)| id.as_str())
                            .collect();
                        if unhealthy.is_empty() {
                            debug!(agents = results.len(), "Health check round complete");
                        } else {
                            warn!(
                                agents = results.len(),
                                unhealthy = ?unhealthy,
                                "Unhealthy agents detected"
                            );
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        info!(interval_ms = period.as_millis() as u64, "Health monitor started");
        Self { shutdown, handle }
    }

    /// Stop the monitor and wait for its task to end.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Health monitor ended abnormally");
        }
        info!("Health monitor stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orkestra_core::{
        AgentCapability, AgentDefinition, AgentMetadata, AgentState, AgentType, HealthStatus,
        RuntimeKind,
    };

    fn agent(id: &str) -> AgentDefinition {
        AgentDefinition::new(
            AgentMetadata::new(id, id, "1.0.0"),
            AgentType::Analyzer,
            RuntimeKind::External,
        )
        .with_capability(AgentCapability::new("scan"))
    }

    #[tokio::test]
    async fn test_monitor_marks_health() {
        let registry = Arc::new(AgentRegistry::in_memory());
        registry.register(agent("ok")).unwrap();
        registry.register(agent("down")).unwrap();
        registry
            .update_agent_state("down", AgentState::Error)
            .unwrap();

        let monitor = HealthMonitor::spawn(registry.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;

        let ok = registry.get("ok").unwrap();
        assert_eq!(ok.health.status, HealthStatus::Healthy);
        assert!(ok.health.last_check.is_some());
        assert_eq!(
            registry.get("down").unwrap().health.status,
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_stop_ends_checks() {
        let registry = Arc::new(AgentRegistry::in_memory());
        let monitor = HealthMonitor::spawn(registry.clone(), Duration::from_millis(10));
        monitor.stop().await;

        registry.register(agent("late")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            registry.get("late").unwrap().health.status,
            HealthStatus::Unknown
        );
    }
}
