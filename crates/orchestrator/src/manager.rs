//! Execution Manager
//!
//! The only entry point for callers. Requests are queued FIFO and drained by a
//! single task, one request at a time, each run to its final outcome (retries
//! included) before the next one is dequeued.

use common::{OperationTimer, Topic};
use entities::StoreSet;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::classifier::{ErrorClassifier, ErrorType};
use crate::cleaner::ContextCleaner;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{
    CurrentChangedEvent, EngineEvents, EventReceiver, ExecutionCompletedEvent, ExecutionEvent,
    ExecutionStartedEvent, PipelinePausedEvent, QueueChangedEvent,
};
use crate::policy::{ExecutionPolicy, ExecutionPolicyManager, RetryPolicy, RetryPolicyManager};
use crate::primitive::ExecutionPrimitive;
use crate::request::{ExecutionErrorInfo, ExecutionOutcome, ExecutionRequest};
use crate::results::{AggregateSummary, ProcessOptions, ResultHandler};
use crate::runner::ExecutionRunner;
use crate::strategy::{ExecutionEnv, ExecutionStrategy, StrategyRegistry};

/// Error name of the outcome returned when a strategy reports an engine error.
pub const ENGINE_ERROR_NAME: &str = "EngineError";
/// Error name of the outcome returned when a strategy panics.
pub const ENGINE_PANIC_NAME: &str = "EnginePanic";
/// Error name of the outcome returned while the pipeline is paused.
pub const PIPELINE_PAUSED_NAME: &str = "PipelinePaused";

struct PendingRequest {
    request: ExecutionRequest,
    reply: oneshot::Sender<ExecutionOutcome>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingRequest>,
    current: Option<String>,
    draining: bool,
    paused: bool,
    /// Signature of the last final failure no rule matched, and how many times in a row
    unclassified: Option<(String, u32)>,
}

struct ManagerInner {
    queue: Mutex<QueueState>,
    policies: ExecutionPolicyManager,
    strategies: StrategyRegistry,
    env: ExecutionEnv,
    pause_threshold: u32,
}

/// Resolves to the final outcome of a submitted request.
///
/// If the engine drops the request without answering, the handle still resolves,
/// with a synthesized failure.
pub struct ExecutionHandle {
    request: ExecutionRequest,
    receiver: oneshot::Receiver<ExecutionOutcome>,
}

impl ExecutionHandle {
    pub fn request_id(&self) -> &str {
        &self.request.id
    }
}

impl Future for ExecutionHandle {
    type Output = ExecutionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(ExecutionOutcome::synthesized_failure(
                &self.request,
                ExecutionErrorInfo::new(ENGINE_ERROR_NAME, "request was dropped before completion"),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Single-flight FIFO execution engine.
#[derive(Clone)]
pub struct ExecutionManager {
    inner: Arc<ManagerInner>,
}

impl ExecutionManager {
    pub fn builder(primitive: Arc<dyn ExecutionPrimitive>) -> ExecutionManagerBuilder {
        ExecutionManagerBuilder::new(primitive)
    }

    /// Queue `request`. Must be called inside a tokio runtime; the first submission
    /// into an idle queue spawns the drain task.
    pub fn submit(&self, request: ExecutionRequest) -> ExecutionHandle {
        let (reply, receiver) = oneshot::channel();
        let handle = ExecutionHandle {
            request: request.clone(),
            receiver,
        };

        let start_drain = {
            let mut queue = self.inner.queue.lock();
            debug!(request_id = %request.id, source = ?request.source, "request queued");
            queue.pending.push_back(PendingRequest { request, reply });
            self.inner.emit_queue_changed(&queue);
            !std::mem::replace(&mut queue.draining, true)
        };

        if start_drain {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.drain().await });
        }
        handle
    }

    /// Submit and wait for the outcome.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        self.submit(request).await
    }

    pub fn set_current_policy(&self, name: &str) -> Result<(), EngineError> {
        Ok(self.inner.policies.set_current_policy(name)?)
    }

    pub fn register_policy(
        &self,
        name: impl Into<String>,
        policy: ExecutionPolicy,
    ) -> Result<(), EngineError> {
        Ok(self.inner.policies.register_policy(name, policy)?)
    }

    pub fn current_policy(&self) -> (String, ExecutionPolicy) {
        self.inner.policies.current()
    }

    pub fn policies(&self) -> &ExecutionPolicyManager {
        &self.inner.policies
    }

    pub fn define_retry_policy(
        &self,
        name: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<(), EngineError> {
        Ok(self.inner.env.retry_policies.define_policy(name, policy)?)
    }

    /// Route failures of `error_type` to the named retry policy.
    pub fn register_retry_policy(
        &self,
        error_type: ErrorType,
        policy_name: &str,
    ) -> Result<(), EngineError> {
        Ok(self
            .inner
            .env
            .retry_policies
            .register_retry_policy(error_type, policy_name)?)
    }

    pub fn retry_policies(&self) -> &RetryPolicyManager {
        &self.inner.env.retry_policies
    }

    pub fn register_strategy(&self, strategy: Arc<dyn ExecutionStrategy>) {
        self.inner.strategies.register(strategy);
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.inner.strategies
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.inner.env.classifier
    }

    pub fn cleaner(&self) -> &ContextCleaner {
        &self.inner.env.cleaner
    }

    pub fn results(&self) -> &ResultHandler {
        &self.inner.env.results
    }

    pub fn stores(&self) -> &StoreSet {
        &self.inner.env.stores
    }

    pub fn summary(&self) -> AggregateSummary {
        self.inner.env.results.summary()
    }

    /// Requests waiting, not counting the one executing.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    pub fn current_request(&self) -> Option<String> {
        self.inner.queue.lock().current.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.queue.lock().paused
    }

    /// Let dequeued requests run again. Returns whether the pipeline was paused.
    pub fn resume(&self) -> bool {
        let mut queue = self.inner.queue.lock();
        let was_paused = std::mem::replace(&mut queue.paused, false);
        queue.unclassified = None;
        if was_paused {
            info!("execution pipeline resumed");
            self.inner.env.events.emit(ExecutionEvent::PipelineResumed);
        }
        was_paused
    }

    pub fn events(&self) -> &EngineEvents {
        &self.inner.env.events
    }

    pub fn subscribe(&self, topic: Topic) -> EventReceiver {
        self.inner.env.events.subscribe(topic)
    }

    pub fn subscribe_all(&self) -> EventReceiver {
        self.inner.env.events.subscribe_all()
    }
}

impl ManagerInner {
    fn emit_queue_changed(&self, queue: &QueueState) {
        self.env
            .events
            .emit(ExecutionEvent::QueueChanged(QueueChangedEvent {
                length: queue.pending.len(),
                current: queue.current.clone(),
            }));
    }

    fn set_current(&self, queue: &mut QueueState, current: Option<String>) {
        queue.current = current.clone();
        self.env
            .events
            .emit(ExecutionEvent::CurrentChanged(CurrentChangedEvent { current }));
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let (next, paused) = {
                let mut queue = self.queue.lock();
                let Some(next) = queue.pending.pop_front() else {
                    queue.draining = false;
                    debug!("execution queue drained");
                    return;
                };
                self.set_current(&mut queue, Some(next.request.id.clone()));
                self.emit_queue_changed(&queue);
                (next, queue.paused)
            };

            let PendingRequest { request, reply } = next;
            let outcome = if paused {
                self.refuse_paused(&request)
            } else {
                self.run(&request).await
            };

            self.env
                .events
                .emit(ExecutionEvent::ExecutionCompleted(ExecutionCompletedEvent {
                    request_id: request.id.clone(),
                    success: outcome.success,
                    attempt_count: outcome.attempt_count,
                    duration_ms: outcome.duration_ms,
                    error_type: outcome.error_type().cloned(),
                }));
            {
                let mut queue = self.queue.lock();
                self.set_current(&mut queue, None);
            }
            if reply.send(outcome).is_err() {
                debug!(request_id = %request.id, "submitter went away before the outcome");
            }
        }
    }

    /// One request under a snapshot of the current policy. Never fails: engine
    /// errors and panics become failure outcomes.
    async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let (policy_name, policy) = self.policies.current();
        let strategy = self.strategies.resolve(&policy.strategy_name);
        info!(
            request_id = %request.id,
            policy = %policy_name,
            strategy = strategy.name(),
            "execution started"
        );
        self.env
            .events
            .emit(ExecutionEvent::ExecutionStarted(ExecutionStartedEvent {
                request_id: request.id.clone(),
                source: request.source,
                policy: policy_name.clone(),
                strategy: strategy.name().to_string(),
            }));

        let mut timer = OperationTimer::new("execute_request");
        timer.add_field("request_id", &request.id);
        timer.add_field("policy", &policy_name);

        let result = AssertUnwindSafe(strategy.execute(request, &policy, &self.env))
            .catch_unwind()
            .await;
        let outcome = match result {
            Ok(Ok(outcome)) => {
                timer.finish();
                outcome
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                timer.finish_with_result(Err::<(), _>(&message));
                ExecutionOutcome::synthesized_failure(
                    request,
                    ExecutionErrorInfo::new(ENGINE_ERROR_NAME, message),
                )
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(request_id = %request.id, panic = %message, "execution strategy panicked");
                ExecutionOutcome::synthesized_failure(
                    request,
                    ExecutionErrorInfo::new(ENGINE_PANIC_NAME, message),
                )
            }
        };

        let processed = self
            .env
            .results
            .process(outcome, ProcessOptions::final_outcome(policy.log_all_attempts));
        self.track_unclassified(&processed.outcome);
        processed.outcome
    }

    fn refuse_paused(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        warn!(request_id = %request.id, "pipeline paused, request not executed");
        let outcome = ExecutionOutcome::synthesized_failure(
            request,
            ExecutionErrorInfo::new(
                PIPELINE_PAUSED_NAME,
                "the pipeline is paused after repeated unclassified failures",
            ),
        );
        self.env
            .results
            .process(outcome, ProcessOptions::final_outcome(false))
            .outcome
    }

    /// Pause once the same unclassified failure ends `pause_threshold` requests in a row.
    fn track_unclassified(&self, outcome: &ExecutionOutcome) {
        if self.pause_threshold == 0 {
            return;
        }
        let signature = match (&outcome.error, &outcome.classification) {
            (Some(error), Some(classification)) if !outcome.success && classification.is_fallback() => {
                Some(error.signature())
            }
            _ => None,
        };

        let mut queue = self.queue.lock();
        let Some(signature) = signature else {
            queue.unclassified = None;
            return;
        };
        let occurrences = match &queue.unclassified {
            Some((previous, count)) if *previous == signature => count + 1,
            _ => 1,
        };
        queue.unclassified = Some((signature.clone(), occurrences));

        if occurrences >= self.pause_threshold && !queue.paused {
            queue.paused = true;
            warn!(%signature, occurrences, "pausing execution pipeline on repeated unclassified failure");
            self.env
                .events
                .emit(ExecutionEvent::PipelinePaused(PipelinePausedEvent {
                    signature,
                    occurrences,
                }));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Assembles an [`ExecutionManager`] from a primitive, stores and [`EngineConfig`].
pub struct ExecutionManagerBuilder {
    primitive: Arc<dyn ExecutionPrimitive>,
    config: EngineConfig,
    stores: Option<StoreSet>,
    classifier: Option<ErrorClassifier>,
    cleaner: Option<ContextCleaner>,
}

impl ExecutionManagerBuilder {
    pub fn new(primitive: Arc<dyn ExecutionPrimitive>) -> Self {
        Self {
            primitive,
            config: EngineConfig::default(),
            stores: None,
            classifier: None,
            cleaner: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to empty in-memory stores.
    pub fn stores(mut self, stores: StoreSet) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Defaults to the built-in rule set.
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Defaults to the built-in cleaning strategies.
    pub fn cleaner(mut self, cleaner: ContextCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn build(self) -> Result<ExecutionManager, EngineError> {
        let config = self.config;
        let events = EngineEvents::new(config.event_buffer);
        let stores = self.stores.unwrap_or_else(StoreSet::in_memory);

        let classifier = Arc::new(match self.classifier {
            Some(classifier) => classifier,
            None => ErrorClassifier::with_default_rules()?,
        });
        let cleaner = Arc::new(
            self.cleaner
                .unwrap_or_else(ContextCleaner::with_default_strategies),
        );

        let retry_policies = Arc::new(RetryPolicyManager::new());
        for (name, policy) in config.retry_policies {
            retry_policies.define_policy(name, policy)?;
        }
        for (error_type, name) in config.error_retry_map {
            retry_policies.register_retry_policy(error_type, &name)?;
        }
        for (error_type, ceiling) in config.attempt_ceilings {
            retry_policies.set_attempt_ceiling(error_type, ceiling);
        }

        let policies = ExecutionPolicyManager::new(events.clone());
        for (name, policy) in config.policies {
            policies.register_policy(name, policy)?;
        }
        if policies.current_name() != config.current_policy {
            policies.set_current_policy(&config.current_policy)?;
        }

        let runner = ExecutionRunner::new(
            self.primitive,
            stores.clone(),
            Duration::from_millis(config.runner.default_timeout_ms),
        )?;
        let results = Arc::new(ResultHandler::new(
            classifier.clone(),
            config.results.window_size,
            config.results.log_intermediate_attempts,
        ));

        info!(
            policy = %policies.current_name(),
            kinds = stores.kinds().len(),
            pause_threshold = config.unclassified_pause_threshold,
            "execution manager ready"
        );

        Ok(ExecutionManager {
            inner: Arc::new(ManagerInner {
                queue: Mutex::new(QueueState::default()),
                policies,
                strategies: StrategyRegistry::with_defaults(),
                env: ExecutionEnv {
                    runner: Arc::new(runner),
                    classifier,
                    cleaner,
                    retry_policies,
                    results,
                    stores,
                    events,
                    snapshot: config.snapshot,
                },
                pause_threshold: config.unclassified_pause_threshold,
            }),
        })
    }
}
