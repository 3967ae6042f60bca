//! Execution strategies
//!
//! A strategy turns one dequeued request into one final outcome. Strategies are
//! looked up by the name carried in the current execution policy.

mod direct;
mod retry;

use async_trait::async_trait;
use entities::{JournalMark, StoreSet, StoreSnapshot};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::classifier::{ErrorClassification, ErrorClassifier};
use crate::cleaner::{CleaningContext, ContextCleaner};
use crate::config::SnapshotConfig;
use crate::error::EngineError;
use crate::events::{EngineEvents, ExecutionEvent, StateChangedEvent};
use crate::policy::{ExecutionPolicy, RetryPolicyManager};
use crate::request::{AttemptSummary, ExecutionOutcome, ExecutionRequest, RecoveryHints};
use crate::results::ResultHandler;
use crate::runner::ExecutionRunner;
use crate::state_machine::{ExecutionState, ExecutionStateMachine};

pub use direct::DirectStrategy;
pub use retry::RetryStrategy;

/// Name of the strategy used when a policy names one that is not registered.
pub const DEFAULT_STRATEGY: &str = "retry";

/// Collaborators a strategy needs. Cloning is cheap; everything is shared.
#[derive(Clone)]
pub struct ExecutionEnv {
    pub runner: Arc<ExecutionRunner>,
    pub classifier: Arc<ErrorClassifier>,
    pub cleaner: Arc<ContextCleaner>,
    pub retry_policies: Arc<RetryPolicyManager>,
    pub results: Arc<ResultHandler>,
    pub stores: StoreSet,
    pub events: EngineEvents,
    pub snapshot: SnapshotConfig,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Run `request` to its final outcome under `policy`.
    ///
    /// An `Err` means the engine itself misbehaved; failures of the payload are
    /// reported inside the returned outcome.
    async fn execute(
        &self,
        request: &ExecutionRequest,
        policy: &ExecutionPolicy,
        env: &ExecutionEnv,
    ) -> Result<ExecutionOutcome, EngineError>;
}

/// Strategy name to implementation, with `retry` always available.
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn ExecutionStrategy>>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    pub fn with_defaults() -> Self {
        let registry = Self {
            strategies: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(RetryStrategy));
        registry.register(Arc::new(DirectStrategy));
        registry
    }

    /// Register under the strategy's own name, replacing any previous entry.
    pub fn register(&self, strategy: Arc<dyn ExecutionStrategy>) {
        let name = strategy.name().to_string();
        debug!(strategy = %name, "registering execution strategy");
        self.strategies.write().insert(name, strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutionStrategy>> {
        self.strategies.read().get(name).cloned()
    }

    /// The named strategy, or the retry strategy with a warning.
    pub fn resolve(&self, name: &str) -> Arc<dyn ExecutionStrategy> {
        if let Some(strategy) = self.get(name) {
            return strategy;
        }
        warn!(strategy = %name, fallback = DEFAULT_STRATEGY, "unknown execution strategy");
        self.get(DEFAULT_STRATEGY)
            .unwrap_or_else(|| Arc::new(RetryStrategy))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Everything one attempt leaves behind.
pub(crate) struct AttemptRun {
    pub outcome: ExecutionOutcome,
    pub classification: Option<ErrorClassification>,
    pub mark: JournalMark,
    pub snapshot: Option<StoreSnapshot>,
}

/// State machine for the first attempt, with transitions forwarded as events.
pub(crate) fn observed_machine(request_id: &str, events: &EngineEvents) -> ExecutionStateMachine {
    let mut machine = ExecutionStateMachine::new(request_id, 1);
    let events = events.clone();
    machine.on_any(move |transition| {
        events.emit(ExecutionEvent::StateChanged(StateChangedEvent {
            request_id: transition.request_id.clone(),
            attempt: transition.attempt,
            from: transition.from,
            to: transition.to,
        }));
    });
    machine
}

/// PREPARING (optional snapshot, journal mark), EXECUTING, then COMPLETED, FAILED
/// or TIMEOUT. Failures are classified before the final transition.
pub(crate) async fn run_attempt(
    env: &ExecutionEnv,
    request: &ExecutionRequest,
    machine: &mut ExecutionStateMachine,
    timeout: Option<Duration>,
    take_snapshot: bool,
) -> Result<AttemptRun, EngineError> {
    machine.transition(ExecutionState::Preparing)?;

    let snapshot = if take_snapshot {
        let kinds = env.cleaner.snapshot_kinds();
        Some(
            env.stores
                .snapshot(&kinds, env.snapshot.max_records_per_store)
                .await,
        )
    } else {
        None
    };
    let mark = env.stores.mark();

    let executing = BTreeMap::from([(
        "timeout_ms".to_string(),
        Value::from(env.runner.resolve_timeout(request, timeout).as_millis() as u64),
    )]);
    machine.transition_with(ExecutionState::Executing, executing)?;

    let mut outcome = env.runner.run(request, timeout).await;
    if outcome.success {
        machine.transition(ExecutionState::Completed)?;
        return Ok(AttemptRun {
            outcome,
            classification: None,
            mark,
            snapshot,
        });
    }

    let classification = match &outcome.error {
        Some(error) => env.classifier.classify(error),
        None => ErrorClassification::fallback(),
    };
    outcome.classification = Some(classification.clone());

    let failed = if outcome.timed_out {
        ExecutionState::Timeout
    } else {
        ExecutionState::Failed
    };
    let details = BTreeMap::from([(
        "error_type".to_string(),
        Value::from(classification.error_type.as_str()),
    )]);
    machine.transition_with(failed, details)?;

    Ok(AttemptRun {
        outcome,
        classification: Some(classification),
        mark,
        snapshot,
    })
}

/// Hints for a failure that leaves the engine. Only failures that call for
/// cleaning or outside reasoning get them; earlier hints are folded in.
pub(crate) async fn final_hints(
    env: &ExecutionEnv,
    request_id: &str,
    classification: &ErrorClassification,
    run: &AttemptRun,
    accumulated: Option<RecoveryHints>,
) -> Option<RecoveryHints> {
    if !(classification.requires_reasoning || classification.clean_context) {
        return accumulated;
    }
    let ctx = CleaningContext {
        request_id,
        stores: &env.stores,
        attempt_mark: &run.mark,
        snapshot: run.snapshot.as_ref(),
    };
    let fresh = env.cleaner.describe(classification, &ctx).await;

    let mut hints = accumulated.unwrap_or_default();
    hints.merge(fresh);
    (!hints.is_empty()).then_some(hints)
}

/// Stamp attempt metadata on the outcome that leaves the strategy.
pub(crate) fn finalize(
    mut outcome: ExecutionOutcome,
    attempts: Vec<AttemptSummary>,
    machine: &ExecutionStateMachine,
    recovery: Option<RecoveryHints>,
) -> ExecutionOutcome {
    let attempt_count = attempts.len() as u32;
    outcome.attempt_count = attempt_count;
    outcome.retried = attempt_count > 1;
    outcome.attempts = attempts;
    outcome.recovery = recovery;
    outcome.final_state = Some(machine.current());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ExecutionRequest;

    struct Named(&'static str);

    #[async_trait]
    impl ExecutionStrategy for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(
            &self,
            request: &ExecutionRequest,
            _policy: &ExecutionPolicy,
            _env: &ExecutionEnv,
        ) -> Result<ExecutionOutcome, EngineError> {
            Err(EngineError::Strategy {
                name: self.0.to_string(),
                reason: format!("not runnable: {}", request.id),
            })
        }
    }

    #[test]
    fn defaults_are_registered() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["direct", "retry"]);
    }

    #[test]
    fn unknown_names_fall_back_to_retry() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.resolve("missing").name(), DEFAULT_STRATEGY);
        assert_eq!(registry.resolve("direct").name(), "direct");
    }

    #[test]
    fn registration_replaces_by_name() {
        let registry = StrategyRegistry::with_defaults();
        registry.register(Arc::new(Named("custom")));
        registry.register(Arc::new(Named("custom")));
        assert_eq!(registry.names(), vec!["custom", "direct", "retry"]);
        assert_eq!(registry.resolve("custom").name(), "custom");
    }
}
