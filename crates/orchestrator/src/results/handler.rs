use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::aggregator::{AggregateSummary, ResultAggregator};
use crate::classifier::{ErrorClassification, ErrorClassifier};
use crate::request::ExecutionOutcome;

pub type TransformFn =
    Arc<dyn Fn(ExecutionOutcome) -> anyhow::Result<ExecutionOutcome> + Send + Sync>;

/// One step of the post-processing chain. Lower priority runs first.
#[derive(Clone)]
pub struct OutcomeTransformer {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    transform: TransformFn,
}

impl OutcomeTransformer {
    pub fn new<F>(name: impl Into<String>, priority: i32, transform: F) -> Self
    where
        F: Fn(ExecutionOutcome) -> anyhow::Result<ExecutionOutcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            transform: Arc::new(transform),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// The outcome leaves the engine; only these are aggregated
    pub final_attempt: bool,
    pub log_all_attempts: bool,
}

impl ProcessOptions {
    pub fn final_outcome(log_all_attempts: bool) -> Self {
        Self {
            final_attempt: true,
            log_all_attempts,
        }
    }

    pub fn intermediate(log_all_attempts: bool) -> Self {
        Self {
            final_attempt: false,
            log_all_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedOutcome {
    pub outcome: ExecutionOutcome,
    pub classification: Option<ErrorClassification>,
    pub should_log: bool,
    /// The failure is of a retryable kind, regardless of remaining budget
    pub should_retry: bool,
}

/// Transformer chain, classification, logging decision and aggregation.
pub struct ResultHandler {
    transformers: RwLock<Vec<OutcomeTransformer>>,
    classifier: Arc<ErrorClassifier>,
    aggregator: ResultAggregator,
    log_intermediate_attempts: bool,
}

impl ResultHandler {
    pub fn new(
        classifier: Arc<ErrorClassifier>,
        window_size: usize,
        log_intermediate_attempts: bool,
    ) -> Self {
        Self {
            transformers: RwLock::new(Vec::new()),
            classifier,
            aggregator: ResultAggregator::new(window_size),
            log_intermediate_attempts,
        }
    }

    /// Add a transformer, replacing one with the same name.
    pub fn add_transformer(&self, transformer: OutcomeTransformer) {
        let mut transformers = self.transformers.write();
        transformers.retain(|t| t.name != transformer.name);
        let pos = transformers.partition_point(|t| t.priority <= transformer.priority);
        transformers.insert(pos, transformer);
    }

    pub fn remove_transformer(&self, name: &str) -> bool {
        let mut transformers = self.transformers.write();
        let before = transformers.len();
        transformers.retain(|t| t.name != name);
        before != transformers.len()
    }

    pub fn set_transformer_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.transformers.write().iter_mut().find(|t| t.name == name) {
            Some(t) => {
                t.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn transformer_names(&self) -> Vec<String> {
        self.transformers.read().iter().map(|t| t.name.clone()).collect()
    }

    pub fn process(&self, outcome: ExecutionOutcome, options: ProcessOptions) -> ProcessedOutcome {
        let chain: Vec<OutcomeTransformer> = self
            .transformers
            .read()
            .iter()
            .filter(|t| t.enabled)
            .cloned()
            .collect();

        let mut current = outcome;
        for transformer in chain {
            let input = current.clone();
            match catch_unwind(AssertUnwindSafe(|| (transformer.transform)(input))) {
                Ok(Ok(next)) => current = next,
                Ok(Err(e)) => warn!(
                    transformer = %transformer.name,
                    request_id = %current.request_id,
                    error = %e,
                    "outcome transformer failed, skipping"
                ),
                Err(_) => warn!(
                    transformer = %transformer.name,
                    request_id = %current.request_id,
                    "outcome transformer panicked, skipping"
                ),
            }
        }

        if !current.success && current.classification.is_none() {
            current.classification = Some(match &current.error {
                Some(error) => self.classifier.classify(error),
                None => ErrorClassification::fallback(),
            });
        }
        let classification = current.classification.clone();

        let should_log =
            options.final_attempt || options.log_all_attempts || self.log_intermediate_attempts;
        let should_retry = !current.success && classification.as_ref().is_some_and(|c| c.retryable);

        if should_log {
            log_outcome(&current, options.final_attempt);
        } else {
            debug!(request_id = %current.request_id, "intermediate attempt not logged");
        }
        if options.final_attempt {
            self.aggregator.record(&current);
        }

        ProcessedOutcome {
            outcome: current,
            classification,
            should_log,
            should_retry,
        }
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    pub fn summary(&self) -> AggregateSummary {
        self.aggregator.summary()
    }
}

fn log_outcome(outcome: &ExecutionOutcome, final_attempt: bool) {
    let error_type = outcome
        .error_type()
        .map(|t| t.to_string())
        .unwrap_or_default();
    match (outcome.success, final_attempt) {
        (true, _) => info!(
            request_id = %outcome.request_id,
            attempt_count = outcome.attempt_count,
            duration_ms = outcome.duration_ms,
            "execution succeeded"
        ),
        (false, true) => warn!(
            request_id = %outcome.request_id,
            attempt_count = outcome.attempt_count,
            duration_ms = outcome.duration_ms,
            error_type = %error_type,
            error = ?outcome.error,
            "execution failed"
        ),
        (false, false) => info!(
            request_id = %outcome.request_id,
            duration_ms = outcome.duration_ms,
            error_type = %error_type,
            "attempt failed"
        ),
    }
}
