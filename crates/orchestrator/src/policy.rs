//! Execution and retry policies
//!
//! Both managers are plain objects owned by the engine, not process globals. Changes
//! take effect for the next dequeued request; an in-flight request keeps the policy
//! it was dequeued with.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::classifier::ErrorType;
use crate::events::{EngineEvents, ExecutionEvent, PolicyChangedEvent};

pub const DEFAULT_POLICY: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown execution policy: {0}")]
    UnknownPolicy(String),

    #[error("unknown retry policy: {0}")]
    UnknownRetryPolicy(String),

    #[error("invalid policy {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Which strategy runs a request and how generously it may retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    pub strategy_name: String,
    /// Unset means the runner default applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub enable_retry: bool,
    pub max_retries: u32,
    pub clean_context_on_retry: bool,
    pub log_all_attempts: bool,
    /// Error types that may be retried at all; `None` allows every type
    pub retryable_error_types: Option<Vec<ErrorType>>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            strategy_name: "retry".to_string(),
            timeout_ms: None,
            enable_retry: true,
            max_retries: 3,
            clean_context_on_retry: true,
            log_all_attempts: false,
            retryable_error_types: None,
        }
    }
}

impl ExecutionPolicy {
    pub fn allows(&self, error_type: &ErrorType) -> bool {
        self.retryable_error_types
            .as_ref()
            .map_or(true, |allowed| allowed.contains(error_type))
    }

    pub fn validate(&self, name: &str) -> Result<(), PolicyError> {
        let invalid = |reason: &str| PolicyError::Invalid {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.timeout_ms == Some(0) {
            return Err(invalid("timeout_ms must be greater than zero"));
        }
        if self.strategy_name.trim().is_empty() {
            return Err(invalid("strategy_name must not be empty"));
        }
        Ok(())
    }

    fn conservative() -> Self {
        Self {
            strategy_name: "direct".to_string(),
            enable_retry: false,
            max_retries: 0,
            clean_context_on_retry: false,
            ..Self::default()
        }
    }

    fn aggressive() -> Self {
        Self {
            timeout_ms: Some(30_000),
            max_retries: 5,
            log_all_attempts: true,
            ..Self::default()
        }
    }
}

/// Backoff parameters for one family of errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub clean_context: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
            clean_context: true,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self, name: &str) -> Result<(), PolicyError> {
        let invalid = |reason: String| PolicyError::Invalid {
            name: name.to_string(),
            reason,
        };
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1".into()));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(invalid(format!(
                "backoff_multiplier {} is below 1.0",
                self.backoff_multiplier
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(format!(
                "base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            jitter: false,
            clean_context: false,
            ..Self::default()
        }
    }
}

/// Built-in execution policies.
pub fn default_execution_policies() -> BTreeMap<String, ExecutionPolicy> {
    BTreeMap::from([
        (DEFAULT_POLICY.to_string(), ExecutionPolicy::default()),
        ("conservative".to_string(), ExecutionPolicy::conservative()),
        ("aggressive".to_string(), ExecutionPolicy::aggressive()),
    ])
}

/// Built-in retry policies.
pub fn default_retry_policies() -> BTreeMap<String, RetryPolicy> {
    BTreeMap::from([
        (DEFAULT_POLICY.to_string(), RetryPolicy::default()),
        (
            "reference".to_string(),
            RetryPolicy {
                base_delay_ms: 500,
                max_delay_ms: 5_000,
                jitter: false,
                ..RetryPolicy::default()
            },
        ),
        (
            "timeout".to_string(),
            RetryPolicy {
                base_delay_ms: 2_000,
                jitter: false,
                ..RetryPolicy::default()
            },
        ),
        (
            "network".to_string(),
            RetryPolicy {
                max_attempts: 5,
                max_delay_ms: 30_000,
                clean_context: false,
                ..RetryPolicy::default()
            },
        ),
        ("none".to_string(), RetryPolicy::no_retry()),
    ])
}

/// Built-in error type to retry policy mapping.
pub fn default_error_retry_map() -> BTreeMap<ErrorType, String> {
    BTreeMap::from([
        (ErrorType::UNDEFINED_REFERENCE, "reference".to_string()),
        (ErrorType::ENTITY_NOT_FOUND, "reference".to_string()),
        (ErrorType::TIMEOUT, "timeout".to_string()),
        (ErrorType::NETWORK, "network".to_string()),
        (ErrorType::SYNTAX, "none".to_string()),
        (ErrorType::TYPE_ERROR, "none".to_string()),
        (ErrorType::UNKNOWN, "none".to_string()),
    ])
}

/// Built-in per-error-type ceilings on total attempts.
pub fn default_attempt_ceilings() -> BTreeMap<ErrorType, u32> {
    BTreeMap::from([
        (ErrorType::SYNTAX, 1),
        (ErrorType::TYPE_ERROR, 1),
        (ErrorType::UNKNOWN, 1),
        (ErrorType::TIMEOUT, 2),
        (ErrorType::UNDEFINED_REFERENCE, 2),
        (ErrorType::ENTITY_NOT_FOUND, 2),
    ])
}

struct ExecutionPolicies {
    policies: BTreeMap<String, ExecutionPolicy>,
    current: String,
}

/// Named execution policies with exactly one current.
pub struct ExecutionPolicyManager {
    state: RwLock<ExecutionPolicies>,
    events: EngineEvents,
}

impl ExecutionPolicyManager {
    pub fn new(events: EngineEvents) -> Self {
        Self {
            state: RwLock::new(ExecutionPolicies {
                policies: default_execution_policies(),
                current: DEFAULT_POLICY.to_string(),
            }),
            events,
        }
    }

    /// Add or replace a named policy.
    pub fn register_policy(
        &self,
        name: impl Into<String>,
        policy: ExecutionPolicy,
    ) -> Result<(), PolicyError> {
        let name = name.into();
        policy.validate(&name)?;
        debug!(policy = %name, strategy = %policy.strategy_name, "registered execution policy");
        self.state.write().policies.insert(name, policy);
        Ok(())
    }

    /// Switch the current policy and announce the change.
    pub fn set_current_policy(&self, name: &str) -> Result<(), PolicyError> {
        let mut state = self.state.write();
        if !state.policies.contains_key(name) {
            return Err(PolicyError::UnknownPolicy(name.to_string()));
        }
        let previous = std::mem::replace(&mut state.current, name.to_string());
        info!(%previous, current = %name, "execution policy changed");
        self.events
            .emit(ExecutionEvent::PolicyChanged(PolicyChangedEvent {
                previous,
                current: name.to_string(),
            }));
        Ok(())
    }

    pub fn current_name(&self) -> String {
        self.state.read().current.clone()
    }

    /// Snapshot of the current policy with its name.
    pub fn current(&self) -> (String, ExecutionPolicy) {
        let state = self.state.read();
        let policy = state
            .policies
            .get(&state.current)
            .cloned()
            .unwrap_or_default();
        (state.current.clone(), policy)
    }

    pub fn get(&self, name: &str) -> Option<ExecutionPolicy> {
        self.state.read().policies.get(name).cloned()
    }

    pub fn policies(&self) -> BTreeMap<String, ExecutionPolicy> {
        self.state.read().policies.clone()
    }
}

struct RetryPolicies {
    policies: BTreeMap<String, RetryPolicy>,
    error_map: BTreeMap<ErrorType, String>,
    ceilings: BTreeMap<ErrorType, u32>,
}

/// Retry policies keyed by name, plus the error type mapping and attempt ceilings.
pub struct RetryPolicyManager {
    state: RwLock<RetryPolicies>,
}

impl Default for RetryPolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RetryPolicies {
                policies: default_retry_policies(),
                error_map: default_error_retry_map(),
                ceilings: default_attempt_ceilings(),
            }),
        }
    }

    pub fn define_policy(
        &self,
        name: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<(), PolicyError> {
        let name = name.into();
        policy.validate(&name)?;
        debug!(policy = %name, max_attempts = policy.max_attempts, "defined retry policy");
        self.state.write().policies.insert(name, policy);
        Ok(())
    }

    /// Route `error_type` to the named retry policy.
    pub fn register_retry_policy(
        &self,
        error_type: ErrorType,
        policy_name: &str,
    ) -> Result<(), PolicyError> {
        let mut state = self.state.write();
        if !state.policies.contains_key(policy_name) {
            return Err(PolicyError::UnknownRetryPolicy(policy_name.to_string()));
        }
        debug!(%error_type, policy = %policy_name, "mapped error type to retry policy");
        state.error_map.insert(error_type, policy_name.to_string());
        Ok(())
    }

    pub fn set_attempt_ceiling(&self, error_type: ErrorType, max_attempts: u32) {
        self.state.write().ceilings.insert(error_type, max_attempts.max(1));
    }

    /// The policy mapped to `error_type`, else the `default` policy.
    pub fn policy_for(&self, error_type: &ErrorType) -> RetryPolicy {
        let state = self.state.read();
        state
            .error_map
            .get(error_type)
            .and_then(|name| state.policies.get(name))
            .or_else(|| state.policies.get(DEFAULT_POLICY))
            .cloned()
            .unwrap_or_default()
    }

    pub fn ceiling_for(&self, error_type: &ErrorType) -> Option<u32> {
        self.state.read().ceilings.get(error_type).copied()
    }

    /// Total attempts a request failing with `error_type` may use under `policy`.
    pub fn effective_max_attempts(&self, policy: &ExecutionPolicy, error_type: &ErrorType) -> u32 {
        if !policy.enable_retry {
            return 1;
        }
        let by_policy = policy.max_retries.saturating_add(1);
        let by_retry_policy = self.policy_for(error_type).max_attempts;
        let by_ceiling = self.ceiling_for(error_type).unwrap_or(u32::MAX);
        by_policy.min(by_retry_policy).min(by_ceiling).max(1)
    }

    pub fn policies(&self) -> BTreeMap<String, RetryPolicy> {
        self.state.read().policies.clone()
    }

    pub fn error_map(&self) -> BTreeMap<ErrorType, String> {
        self.state.read().error_map.clone()
    }

    pub fn ceilings(&self) -> BTreeMap<ErrorType, u32> {
        self.state.read().ceilings.clone()
    }
}
