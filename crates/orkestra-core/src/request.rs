use serde::{Deserialize, Serialize};

/// Scheduling priority hint carried in a request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Accepted wire names, in ascending order.
    pub const NAMES: [&'static str; 4] = ["low", "medium", "high", "critical"];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::OrkestraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(crate::OrkestraError::Validation(format!(
                "priority must be one of {}, got '{other}'",
                Priority::NAMES.join("|")
            ))),
        }
    }
}

/// Execution context attached to a request.
///
/// Fields are kept loosely typed so that malformed values reach the
/// validator and are reported as validation errors instead of failing
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Caller's time budget in milliseconds; must be non-negative.
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
    /// One of `low|medium|high|critical`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Name of a router strategy to use instead of the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl RequestContext {
    /// Parsed priority, if present and valid.
    pub fn priority(&self) -> Option<Priority> {
        self.priority.as_deref().and_then(|p| p.parse().ok())
    }
}

/// A unit of work submitted to the job engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Target capability name (or category).
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Opaque input handed to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Caller identity, permissions and per-job options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

impl JobRequest {
    /// A request for `capability` with no payload or context.
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: Some(capability.into()),
            payload: None,
            context: None,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the caller's timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.context.get_or_insert_with(Default::default).timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.context.get_or_insert_with(Default::default).priority = Some(priority.to_string());
        self
    }

    /// Route with a named strategy.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.context.get_or_insert_with(Default::default).strategy = Some(strategy.into());
        self
    }

    /// The capability name, or `""` when absent.
    pub fn capability_name(&self) -> &str {
        self.capability.as_deref().unwrap_or_default()
    }

    /// The caller's timeout, if one was given and is non-negative.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.context
            .as_ref()
            .and_then(|c| c.timeout_ms)
            .and_then(|t| u64::try_from(t).ok())
    }

    /// The requested strategy name, if any.
    pub fn strategy(&self) -> Option<&str> {
        self.context.as_ref().and_then(|c| c.strategy.as_deref())
    }
}
