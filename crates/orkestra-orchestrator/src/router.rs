use crate::types::RoutingDecision;
use orkestra_core::{
    AgentInstance, AgentState, AgentStatus, JobRequest, OrkestraError, OrkestraResult,
};
use orkestra_registry::{AgentFilter, AgentRegistry};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the built-in default strategy.
pub const DEFAULT_STRATEGY: &str = "best-performance";

/// An idle agent able to serve a request, with the capability that matched.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Snapshot of the agent at routing time.
    pub instance: AgentInstance,
    /// Capability name on the agent that satisfied the request.
    pub matched_capability: String,
    /// True when the match was by capability category rather than exact name.
    pub by_category: bool,
}

/// Picks one agent among the idle candidates for a request.
pub trait RoutingStrategy: Send + Sync {
    /// Name used to request this strategy in a job's context.
    fn name(&self) -> &str;

    /// Choose a candidate, or `None` if none is acceptable.
    fn select<'a>(&self, request: &JobRequest, candidates: &'a [Candidate])
        -> Option<&'a Candidate>;
}

/// Highest success rate, then lowest average execution time, then earliest
/// registration.
pub struct BestPerformanceStrategy;

impl RoutingStrategy for BestPerformanceStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY
    }

    fn select<'a>(
        &self,
        _request: &JobRequest,
        candidates: &'a [Candidate],
    ) -> Option<&'a Candidate> {
        candidates.iter().min_by(|a, b| rank(a, b))
    }
}

/// Like [`BestPerformanceStrategy`], restricted to agents that expose a
/// security-related capability.
pub struct SecurityFirstStrategy;

impl SecurityFirstStrategy {
    /// Name used to request this strategy.
    pub const NAME: &'static str = "security-first";
}

impl RoutingStrategy for SecurityFirstStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn select<'a>(
        &self,
        _request: &JobRequest,
        candidates: &'a [Candidate],
    ) -> Option<&'a Candidate> {
        candidates
            .iter()
            .filter(|c| {
                c.instance.definition.capabilities.iter().any(|cap| {
                    cap.category().eq_ignore_ascii_case("security")
                        || cap.name.to_ascii_lowercase().contains("security")
                })
            })
            .min_by(|a, b| rank(a, b))
    }
}

/// Total order used by the built-in strategies: better candidates sort first.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    let (ma, mb) = (&a.instance.metrics, &b.instance.metrics);
    mb.success_rate
        .total_cmp(&ma.success_rate)
        .then_with(|| {
            ma.average_execution_time_ms
                .total_cmp(&mb.average_execution_time_ms)
        })
        .then_with(|| {
            a.instance
                .registration_order
                .cmp(&b.instance.registration_order)
        })
}

/// Matches requests to idle registered agents.
pub struct Router {
    registry: Arc<AgentRegistry>,
    strategies: HashMap<String, Arc<dyn RoutingStrategy>>,
    default_strategy: Arc<dyn RoutingStrategy>,
}

impl Router {
    /// A router with the built-in strategies registered.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        let default_strategy: Arc<dyn RoutingStrategy> = Arc::new(BestPerformanceStrategy);
        let mut router = Self {
            registry,
            strategies: HashMap::new(),
            default_strategy: default_strategy.clone(),
        };
        router.register_strategy(default_strategy);
        router.register_strategy(Arc::new(SecurityFirstStrategy));
        router
    }

    /// Make a strategy selectable by name. Replaces one with the same name.
    pub fn register_strategy(&mut self, strategy: Arc<dyn RoutingStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    /// Builder form of [`register_strategy`](Self::register_strategy).
    pub fn with_strategy(mut self, strategy: Arc<dyn RoutingStrategy>) -> Self {
        self.register_strategy(strategy);
        self
    }

    /// Names of all selectable strategies, sorted.
    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Idle, active agents able to serve `capability`.
    ///
    /// Agents marked inactive in their metadata are never candidates. Exact capability-name matches win; only when there are none are agents
    /// matched by capability category.
    pub fn candidates(&self, capability: &str) -> Vec<Candidate> {
        let idle = self.registry.list(&AgentFilter {
            state: Some(AgentState::Idle),
            status: Some(AgentStatus::Active),
            ..Default::default()
        });

        let exact: Vec<Candidate> = idle
            .iter()
            .filter(|a| a.definition.capability(capability).is_some())
            .map(|a| Candidate {
                instance: a.clone(),
                matched_capability: capability.to_string(),
                by_category: false,
            })
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        let category = category_of(capability);
        idle.into_iter()
            .filter_map(|a| {
                let matched = a
                    .definition
                    .capabilities
                    .iter()
                    .find(|c| c.category() == category)?
                    .name
                    .clone();
                Some(Candidate {
                    instance: a,
                    matched_capability: matched,
                    by_category: true,
                })
            })
            .collect()
    }

    /// Select an agent for `request`.
    ///
    /// Uses the strategy named in the request context, falling back to the
    /// default strategy when the name is unknown.
    pub fn route(&self, request: &JobRequest) -> OrkestraResult<RoutingDecision> {
        let capability = request.capability_name();
        let strategy = match request.strategy() {
            Some(name) => match self.strategies.get(name) {
                Some(s) => s.clone(),
                None => {
                    warn!(strategy = %name, "Unknown routing strategy, using default");
                    self.default_strategy.clone()
                }
            },
            None => self.default_strategy.clone(),
        };

        let candidates = self.candidates(capability);
        let chosen = strategy.select(request, &candidates).ok_or_else(|| {
            OrkestraError::Routing(format!("no agent available for capability {capability}"))
        })?;

        let metrics = &chosen.instance.metrics;
        let reason = format!(
            "{} match on '{}' among {} candidate(s); success rate {:.1}%, avg {:.1}ms",
            if chosen.by_category { "category" } else { "exact" },
            chosen.matched_capability,
            candidates.len(),
            metrics.success_rate,
            metrics.average_execution_time_ms,
        );
        let decision = RoutingDecision {
            agent_id: chosen.instance.id().to_string(),
            matched_capability: chosen.matched_capability.clone(),
            score: metrics.success_rate,
            reason,
            strategy: strategy.name().to_string(),
        };

        debug!(
            capability = %capability,
            agent_id = %decision.agent_id,
            strategy = %decision.strategy,
            "Routed request"
        );
        Ok(decision)
    }
}

fn category_of(capability: &str) -> &str {
    capability
        .split([':', '.', '/'])
        .next()
        .unwrap_or(capability)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orkestra_core::{AgentCapability, AgentDefinition, AgentMetadata, AgentType, RuntimeKind};

    fn agent(id: &str, caps: &[&str]) -> AgentDefinition {
        let mut def = AgentDefinition::new(
            AgentMetadata::new(id, id, "1.0.0"),
            AgentType::Executor,
            RuntimeKind::Node,
        );
        for cap in caps {
            def = def.with_capability(AgentCapability::new(*cap));
        }
        def
    }

    fn setup() -> (Arc<AgentRegistry>, Router) {
        let registry = Arc::new(AgentRegistry::in_memory());
        let router = Router::new(registry.clone());
        (registry, router)
    }

    #[test]
    fn test_no_candidates_is_routing_error() {
        let (_, router) = setup();
        let err = router.route(&JobRequest::new("nonexistent")).unwrap_err();
        assert!(matches!(err, OrkestraError::Routing(_)));
        assert!(err
            .to_string()
            .contains("no agent available for capability nonexistent"));
    }

    #[test]
    fn test_highest_success_rate_wins() {
        let (registry, router) = setup();
        for id in ["low", "high", "mid"] {
            registry.register(agent(id, &["translate"])).unwrap();
        }
        registry.record_execution("low", false, 10).unwrap();
        registry.record_execution("high", true, 500).unwrap();
        registry.record_execution("mid", true, 10).unwrap();
        registry.record_execution("mid", false, 10).unwrap();

        let decision = router.route(&JobRequest::new("translate")).unwrap();
        assert_eq!(decision.agent_id, "high");
        assert_eq!(decision.strategy, DEFAULT_STRATEGY);
        assert!((decision.score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_tie_breaks_on_time_then_registration_order() {
        let (registry, router) = setup();
        for id in ["first", "second", "third"] {
            registry.register(agent(id, &["translate"])).unwrap();
        }
        registry.record_execution("first", true, 300).unwrap();
        registry.record_execution("second", true, 100).unwrap();
        registry.record_execution("third", true, 100).unwrap();

        assert_eq!(
            router.route(&JobRequest::new("translate")).unwrap().agent_id,
            "second"
        );

        let (registry, router) = setup();
        registry.register(agent("b", &["translate"])).unwrap();
        registry.register(agent("a", &["translate"])).unwrap();
        assert_eq!(
            router.route(&JobRequest::new("translate")).unwrap().agent_id,
            "b"
        );
    }

    #[test]
    fn test_busy_agents_are_skipped() {
        let (registry, router) = setup();
        registry.register(agent("a", &["translate"])).unwrap();
        registry.register(agent("b", &["translate"])).unwrap();
        registry.claim("a").unwrap();

        assert_eq!(
            router.route(&JobRequest::new("translate")).unwrap().agent_id,
            "b"
        );
        registry.claim("b").unwrap();
        assert!(router.route(&JobRequest::new("translate")).is_err());
    }

    #[test]
    fn test_inactive_agents_are_not_routed() {
        let (registry, router) = setup();
        let mut retired = agent("retired", &["translate"]);
        retired.metadata.status = AgentStatus::Inactive;
        registry.register(retired).unwrap();

        let err = router.route(&JobRequest::new("translate")).unwrap_err();
        assert!(matches!(err, OrkestraError::Routing(_)));
        assert!(router.candidates("translate").is_empty());

        registry.register(agent("current", &["translate"])).unwrap();
        registry.record_execution("retired", true, 1).unwrap();
        assert_eq!(
            router.route(&JobRequest::new("translate")).unwrap().agent_id,
            "current"
        );
    }

    #[test]
    fn test_category_fallback() {
        let (registry, router) = setup();
        registry
            .register(agent("t", &["translate:text", "translate:html"]))
            .unwrap();

        let decision = router.route(&JobRequest::new("translate")).unwrap();
        assert_eq!(decision.agent_id, "t");
        assert_eq!(decision.matched_capability, "translate:text");
        assert!(decision.reason.starts_with("category"));

        let decision = router.route(&JobRequest::new("translate:pdf")).unwrap();
        assert_eq!(decision.agent_id, "t");
    }

    #[test]
    fn test_exact_match_preferred_over_category() {
        let (registry, router) = setup();
        registry.register(agent("category", &["translate:text"])).unwrap();
        registry.register(agent("exact", &["translate"])).unwrap();
        registry.record_execution("category", true, 1).unwrap();
        registry.record_execution("exact", false, 1).unwrap();

        let decision = router.route(&JobRequest::new("translate")).unwrap();
        assert_eq!(decision.agent_id, "exact");
        assert!(decision.reason.starts_with("exact"));
    }

    #[test]
    fn test_security_first_strategy() {
        let (registry, router) = setup();
        registry.register(agent("plain", &["scan"])).unwrap();
        registry
            .register(agent("guarded", &["scan", "security:audit"]))
            .unwrap();
        registry.record_execution("plain", true, 1).unwrap();
        registry.record_execution("guarded", false, 1).unwrap();

        let request = JobRequest::new("scan").with_strategy(SecurityFirstStrategy::NAME);
        let decision = router.route(&request).unwrap();
        assert_eq!(decision.agent_id, "guarded");
        assert_eq!(decision.strategy, SecurityFirstStrategy::NAME);

        assert_eq!(
            router.route(&JobRequest::new("scan")).unwrap().agent_id,
            "plain"
        );
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_default() {
        let (registry, router) = setup();
        registry.register(agent("a", &["translate"])).unwrap();
        let request = JobRequest::new("translate").with_strategy("round-robin");
        let decision = router.route(&request).unwrap();
        assert_eq!(decision.strategy, DEFAULT_STRATEGY);
    }

    struct LastRegistered;

    impl RoutingStrategy for LastRegistered {
        fn name(&self) -> &str {
            "last-registered"
        }

        fn select<'a>(
            &self,
            _request: &JobRequest,
            candidates: &'a [Candidate],
        ) -> Option<&'a Candidate> {
            candidates
                .iter()
                .max_by_key(|c| c.instance.registration_order)
        }
    }

    #[test]
    fn test_custom_strategy() {
        let (registry, router) = setup();
        let router = router.with_strategy(Arc::new(LastRegistered));
        registry.register(agent("a", &["translate"])).unwrap();
        registry.register(agent("b", &["translate"])).unwrap();

        let request = JobRequest::new("translate").with_strategy("last-registered");
        assert_eq!(router.route(&request).unwrap().agent_id, "b");
        assert_eq!(
            router.strategy_names(),
            vec!["best-performance", "last-registered", "security-first"]
        );
    }
}
