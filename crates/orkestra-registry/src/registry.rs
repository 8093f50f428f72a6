use crate::snapshot::RegistrySnapshot;
use chrono::Utc;
use orkestra_core::{
    AgentDefinition, AgentEvent, AgentInstance, AgentState, AgentStatus, AgentType, HealthStatus,
    OrkestraError, OrkestraResult, RuntimeKind,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Criteria for [`AgentRegistry::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct AgentFilter {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub status: Option<AgentStatus>,
    pub agent_type: Option<AgentType>,
    pub runtime_kind: Option<RuntimeKind>,
    pub state: Option<AgentState>,
    /// Substring matched against every tag.
    pub tag: Option<String>,
    /// Exact capability name.
    pub capability: Option<String>,
}

impl AgentFilter {
    /// Whether `instance` satisfies every set criterion.
    pub fn matches(&self, instance: &AgentInstance) -> bool {
        let def = &instance.definition;
        let meta = &def.metadata;
        self.id.as_ref().map_or(true, |v| &meta.id == v)
            && self.name.as_ref().map_or(true, |v| &meta.name == v)
            && self.version.as_ref().map_or(true, |v| &meta.version == v)
            && self.status.map_or(true, |v| meta.status == v)
            && self.agent_type.map_or(true, |v| def.agent_type == v)
            && self.runtime_kind.map_or(true, |v| def.runtime_kind == v)
            && self.state.map_or(true, |v| instance.state == v)
            && self
                .tag
                .as_ref()
                .map_or(true, |v| meta.tags.iter().any(|t| t.contains(v.as_str())))
            && self
                .capability
                .as_ref()
                .map_or(true, |v| def.capability(v).is_some())
    }
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, AgentInstance>,
    next_order: u64,
}

/// Authoritative catalog of agent definitions and their live state.
///
/// Every mutating call flushes a snapshot synchronously while holding the
/// write lock, so flushes are serialized with mutations.
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
    snapshot_path: Option<PathBuf>,
    events: broadcast::Sender<AgentEvent>,
}

impl AgentRegistry {
    /// A registry without persistence.
    pub fn in_memory() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(RegistryState::default()),
            snapshot_path: None,
            events,
        }
    }

    /// A registry persisted at `snapshot_path`, restoring any existing snapshot.
    ///
    /// Instances saved as `busy` come back `idle`: nothing is in flight
    /// across a restart.
    pub fn open(snapshot_path: impl Into<PathBuf>) -> OrkestraResult<Self> {
        let snapshot_path = snapshot_path.into();
        let mut state = RegistryState::default();

        if let Some(snapshot) = RegistrySnapshot::read(&snapshot_path)? {
            for mut instance in snapshot.agents {
                if instance.state == AgentState::Busy {
                    instance.state = AgentState::Idle;
                }
                state.next_order = state.next_order.max(instance.registration_order + 1);
                state.agents.insert(instance.id().to_string(), instance);
            }
            info!(
                path = %snapshot_path.display(),
                agents = state.agents.len(),
                "Registry restored from snapshot"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(snapshot_path),
            events,
        })
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Where snapshots are written, if persistent.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Register a new agent. The definition is validated first; on any
    /// failure the registry is left unchanged.
    pub fn register(&self, definition: AgentDefinition) -> OrkestraResult<()> {
        definition.validate()?;
        let id = definition.id().to_string();

        let mut state = self.state.write();
        if state.agents.contains_key(&id) {
            return Err(OrkestraError::DuplicateAgent(format!(
                "agent '{id}' is already registered"
            )));
        }

        let order = state.next_order;
        state
            .agents
            .insert(id.clone(), AgentInstance::new(definition, order));

        if let Err(e) = self.persist(&state) {
            state.agents.remove(&id);
            return Err(e);
        }
        state.next_order += 1;
        drop(state);

        info!(agent_id = %id, "Registered agent");
        self.emit(AgentEvent::Registered { agent_id: id });
        Ok(())
    }

    /// Remove an agent. Refused while the agent is busy.
    pub fn unregister(&self, id: &str) -> OrkestraResult<AgentInstance> {
        let mut state = self.state.write();
        let instance = state
            .agents
            .get(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;
        if instance.state == AgentState::Busy {
            return Err(OrkestraError::Busy(format!(
                "agent '{id}' is executing a job"
            )));
        }

        let removed = state
            .agents
            .remove(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;
        if let Err(e) = self.persist(&state) {
            state.agents.insert(id.to_string(), removed);
            return Err(e);
        }
        drop(state);

        info!(agent_id = %id, "Unregistered agent");
        self.emit(AgentEvent::Unregistered {
            agent_id: id.to_string(),
        });
        Ok(removed)
    }

    /// A copy of one instance.
    pub fn get(&self, id: &str) -> Option<AgentInstance> {
        self.state.read().agents.get(id).cloned()
    }

    /// Whether an agent with `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().agents.contains_key(id)
    }

    /// All instances matching `filter`, in registration order.
    pub fn list(&self, filter: &AgentFilter) -> Vec<AgentInstance> {
        let state = self.state.read();
        let mut agents: Vec<AgentInstance> = state
            .agents
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.registration_order);
        agents
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.state.read().agents.len()
    }

    /// True when no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().agents.is_empty()
    }

    /// Merge `patch` into an agent's definition.
    ///
    /// Top-level fields are replaced; `metadata` is deep-merged. The id
    /// cannot change. `updatedAt` is bumped and the merged definition is
    /// re-validated before anything is written.
    pub fn update(&self, id: &str, patch: serde_json::Value) -> OrkestraResult<AgentDefinition> {
        let serde_json::Value::Object(patch) = patch else {
            return Err(OrkestraError::Registration(
                "update patch must be a JSON object".to_string(),
            ));
        };

        let mut state = self.state.write();
        let current = state
            .agents
            .get(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;

        let mut merged = serde_json::to_value(&current.definition)?;
        if let serde_json::Value::Object(target) = &mut merged {
            for (key, value) in patch {
                if key == "metadata" {
                    if let Some(existing) = target.get_mut(&key) {
                        deep_merge(existing, value);
                        continue;
                    }
                }
                target.insert(key, value);
            }
        }

        let mut definition = AgentDefinition::from_value(merged)?;
        if definition.metadata.id != id {
            return Err(OrkestraError::Registration(format!(
                "agent id cannot change (was '{id}', got '{}')",
                definition.metadata.id
            )));
        }
        definition.metadata.updated_at = Utc::now();
        definition.validate()?;

        let instance = state
            .agents
            .get_mut(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;
        let previous = std::mem::replace(&mut instance.definition, definition.clone());

        if let Err(e) = self.persist(&state) {
            if let Some(instance) = state.agents.get_mut(id) {
                instance.definition = previous;
            }
            return Err(e);
        }
        drop(state);

        info!(agent_id = %id, version = %definition.metadata.version, "Updated agent");
        self.emit(AgentEvent::Updated {
            agent_id: id.to_string(),
            version: definition.metadata.version.clone(),
        });
        Ok(definition)
    }

    /// Liveness check: healthy unless the agent is in `error` or `offline`.
    /// Never fails; an unknown id reports `false`.
    pub fn health_check(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let Some(instance) = state.agents.get_mut(id) else {
            return false;
        };

        let healthy = !matches!(instance.state, AgentState::Error | AgentState::Offline);
        instance.health.last_check = Some(Utc::now());
        instance.health.status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        instance.health.detail = format!("agent state is {}", instance.state);
        let status = instance.health.status;

        self.persist_quietly(&state);
        drop(state);

        debug!(agent_id = %id, ?status, "Health checked");
        self.emit(AgentEvent::HealthChecked {
            agent_id: id.to_string(),
            status,
        });
        healthy
    }

    /// Health-check every registered agent.
    pub fn health_check_all(&self) -> Vec<(String, bool)> {
        let ids: Vec<String> = self
            .list(&AgentFilter::default())
            .into_iter()
            .map(|a| a.id().to_string())
            .collect();
        ids.into_iter()
            .map(|id| {
                let healthy = self.health_check(&id);
                (id, healthy)
            })
            .collect()
    }

    /// Set an agent's state.
    pub fn update_agent_state(&self, id: &str, new_state: AgentState) -> OrkestraResult<()> {
        let mut state = self.state.write();
        let instance = state
            .agents
            .get_mut(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;
        let previous = std::mem::replace(&mut instance.state, new_state);

        self.persist_quietly(&state);
        drop(state);

        debug!(agent_id = %id, %previous, state = %new_state, "Agent state changed");
        self.emit(AgentEvent::StateChanged {
            agent_id: id.to_string(),
            previous,
            state: new_state,
        });
        Ok(())
    }

    /// Flip an agent from `idle` to `busy` in one step.
    ///
    /// Fails with [`OrkestraError::Busy`] if the agent is not idle.
    pub fn claim(&self, id: &str) -> OrkestraResult<()> {
        let mut state = self.state.write();
        let instance = state
            .agents
            .get_mut(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;
        if instance.state != AgentState::Idle {
            return Err(OrkestraError::Busy(format!(
                "agent '{id}' is {}, not idle",
                instance.state
            )));
        }
        instance.state = AgentState::Busy;

        self.persist_quietly(&state);
        drop(state);

        debug!(agent_id = %id, "Agent claimed");
        self.emit(AgentEvent::StateChanged {
            agent_id: id.to_string(),
            previous: AgentState::Idle,
            state: AgentState::Busy,
        });
        Ok(())
    }

    /// Fold one execution into the agent's metrics.
    pub fn record_execution(&self, id: &str, success: bool, duration_ms: u64) -> OrkestraResult<()> {
        let mut state = self.state.write();
        let instance = state
            .agents
            .get_mut(id)
            .ok_or_else(|| OrkestraError::NotFound(format!("agent '{id}' is not registered")))?;
        instance.metrics.record(success, duration_ms, Utc::now());

        self.persist_quietly(&state);
        drop(state);

        self.emit(AgentEvent::ExecutionRecorded {
            agent_id: id.to_string(),
            success,
            duration_ms,
        });
        Ok(())
    }

    fn persist(&self, state: &RegistryState) -> OrkestraResult<()> {
        match &self.snapshot_path {
            Some(path) => RegistrySnapshot::capture(state.agents.values()).write(path),
            None => Ok(()),
        }
    }

    /// Flush for runtime-state mutations, where a failed write must not
    /// fail the caller.
    fn persist_quietly(&self, state: &RegistryState) {
        if let Err(e) = self.persist(state) {
            warn!(error = %e, "Failed to write registry snapshot");
        }
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn deep_merge(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orkestra_core::{AgentCapability, AgentMetadata};
    use serde_json::json;

    fn def(id: &str) -> AgentDefinition {
        AgentDefinition::new(
            AgentMetadata::new(id, format!("Agent {id}"), "1.0.0"),
            AgentType::Executor,
            RuntimeKind::Node,
        )
        .with_capability(AgentCapability::new("translate"))
    }

    #[test]
    fn test_register_and_list() {
        let registry = AgentRegistry::in_memory();
        registry.register(def("agent-1")).unwrap();
        let agents = registry.list(&AgentFilter::default());
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].state, AgentState::Idle);
        assert_eq!(agents[0].metrics.total_executions, 0);
    }

    #[test]
    fn test_duplicate_rejected_original_untouched() {
        let registry = AgentRegistry::in_memory();
        registry.register(def("agent-1")).unwrap();
        registry.record_execution("agent-1", true, 10).unwrap();

        let mut dup = def("agent-1");
        dup.metadata.name = "Impostor".into();
        let err = registry.register(dup).unwrap_err();
        assert!(matches!(err, OrkestraError::DuplicateAgent(_)));

        let agents = registry.list(&AgentFilter::default());
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].definition.metadata.name, "Agent agent-1");
        assert_eq!(agents[0].metrics.total_executions, 1);
    }

    #[test]
    fn test_invalid_definition_not_registered() {
        let registry = AgentRegistry::in_memory();
        let mut bad = def("agent-1");
        bad.capabilities.clear();
        assert!(matches!(
            registry.register(bad),
            Err(OrkestraError::Registration(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_guards() {
        let registry = AgentRegistry::in_memory();
        assert!(matches!(
            registry.unregister("ghost"),
            Err(OrkestraError::NotFound(_))
        ));

        registry.register(def("agent-1")).unwrap();
        registry.update_agent_state("agent-1", AgentState::Busy).unwrap();
        assert!(matches!(
            registry.unregister("agent-1"),
            Err(OrkestraError::Busy(_))
        ));

        registry.update_agent_state("agent-1", AgentState::Idle).unwrap();
        let removed = registry.unregister("agent-1").unwrap();
        assert_eq!(removed.id(), "agent-1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_claim_only_from_idle() {
        let registry = AgentRegistry::in_memory();
        registry.register(def("a")).unwrap();
        registry.claim("a").unwrap();
        assert_eq!(registry.get("a").unwrap().state, AgentState::Busy);
        assert!(matches!(registry.claim("a"), Err(OrkestraError::Busy(_))));
    }

    #[test]
    fn test_filter_by_tag_substring() {
        let registry = AgentRegistry::in_memory();
        let mut a = def("a");
        a.metadata.tags = vec!["security-scanner".into()];
        let mut b = def("b");
        b.metadata.tags = vec!["nlp".into()];
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        let filter = AgentFilter {
            tag: Some("scan".into()),
            ..Default::default()
        };
        let found = registry.list(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "a");
    }

    #[test]
    fn test_update_deep_merges_metadata() {
        let registry = AgentRegistry::in_memory();
        registry.register(def("a")).unwrap();
        let before = registry.get("a").unwrap().definition.metadata.updated_at;

        let updated = registry
            .update(
                "a",
                json!({"metadata": {"version": "2.0.0"}, "type": "analyzer"}),
            )
            .unwrap();
        assert_eq!(updated.metadata.version, "2.0.0");
        assert_eq!(updated.metadata.name, "Agent a");
        assert_eq!(updated.agent_type, AgentType::Analyzer);
        assert!(updated.metadata.updated_at >= before);
    }

    #[test]
    fn test_update_rejects_invalid_merge() {
        let registry = AgentRegistry::in_memory();
        registry.register(def("a")).unwrap();

        assert!(matches!(
            registry.update("a", json!({"capabilities": []})),
            Err(OrkestraError::Registration(_))
        ));
        assert!(matches!(
            registry.update("a", json!({"metadata": {"id": "b"}})),
            Err(OrkestraError::Registration(_))
        ));
        assert!(matches!(
            registry.update("missing", json!({})),
            Err(OrkestraError::NotFound(_))
        ));
        assert_eq!(registry.get("a").unwrap().definition.capabilities.len(), 1);
    }

    #[test]
    fn test_health_check() {
        let registry = AgentRegistry::in_memory();
        registry.register(def("a")).unwrap();
        assert!(registry.health_check("a"));
        assert_eq!(
            registry.get("a").unwrap().health.status,
            HealthStatus::Healthy
        );

        registry.update_agent_state("a", AgentState::Offline).unwrap();
        assert!(!registry.health_check("a"));
        assert_eq!(
            registry.get("a").unwrap().health.status,
            HealthStatus::Unhealthy
        );
        assert!(!registry.health_check("ghost"));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let registry = AgentRegistry::in_memory();
        let mut rx = registry.subscribe();
        registry.register(def("a")).unwrap();
        registry.record_execution("a", true, 5).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "agent:registered");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.name(), "agent:execution-recorded");
    }

    #[test]
    fn test_deep_merge_nested() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": 3});
        deep_merge(&mut target, json!({"a": {"c": 20, "e": 5}}));
        assert_eq!(target, json!({"a": {"b": 1, "c": 20, "e": 5}, "d": 3}));
    }
}
