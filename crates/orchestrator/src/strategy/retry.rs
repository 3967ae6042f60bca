use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{finalize, final_hints, observed_machine, run_attempt, ExecutionEnv, ExecutionStrategy};
use crate::backoff::BackoffCalculator;
use crate::cleaner::CleaningContext;
use crate::error::EngineError;
use crate::events::{ContextCleanedEvent, ExecutionEvent, RetryAttemptEvent};
use crate::policy::ExecutionPolicy;
use crate::request::{ExecutionOutcome, ExecutionRequest, RecoveryHints};
use crate::results::ProcessOptions;
use crate::state_machine::{ExecutionState, ExecutionStateMachine};

/// Bounded retries with classification, context cleaning and backoff between
/// attempts. Each attempt gets its own state machine.
pub struct RetryStrategy;

#[async_trait]
impl ExecutionStrategy for RetryStrategy {
    fn name(&self) -> &str {
        "retry"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        policy: &ExecutionPolicy,
        env: &ExecutionEnv,
    ) -> Result<ExecutionOutcome, EngineError> {
        let timeout = policy.timeout_ms.map(Duration::from_millis);
        let take_snapshot =
            policy.enable_retry && policy.clean_context_on_retry && env.snapshot.enabled;

        let mut machine = observed_machine(&request.id, &env.events);
        let mut attempts = Vec::new();
        let mut hints: Option<RecoveryHints> = None;
        let mut attempt = 1u32;

        loop {
            let attempt_request = request.for_attempt(attempt, hints.as_ref());
            let run = run_attempt(env, &attempt_request, &mut machine, timeout, take_snapshot).await?;
            attempts.push(run.outcome.summary(attempt));

            let Some(classification) = run.classification.clone() else {
                if attempt > 1 {
                    info!(request_id = %request.id, attempt, "succeeded after retry");
                }
                return Ok(finalize(run.outcome, attempts, &machine, hints));
            };

            let error_type = &classification.error_type;
            let max_attempts = env.retry_policies.effective_max_attempts(policy, error_type);
            let allowed = policy.allows(error_type);
            if !classification.retryable || attempt >= max_attempts || !allowed {
                debug!(
                    request_id = %request.id,
                    attempt,
                    max_attempts,
                    error_type = %error_type,
                    retryable = classification.retryable,
                    allowed,
                    "no further attempts"
                );
                let recovery = final_hints(env, &request.id, &classification, &run, hints).await;
                return Ok(finalize(run.outcome, attempts, &machine, recovery));
            }

            env.results.process(
                run.outcome.clone(),
                ProcessOptions::intermediate(policy.log_all_attempts),
            );
            machine.transition(ExecutionState::Retrying)?;

            let retry_policy = env.retry_policies.policy_for(error_type);
            if classification.clean_context
                && policy.clean_context_on_retry
                && retry_policy.clean_context
            {
                let restored = match &run.snapshot {
                    Some(snapshot) => match env.stores.restore(snapshot).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(request_id = %request.id, error = %e, "snapshot restore failed");
                            false
                        }
                    },
                    None => false,
                };

                let ctx = CleaningContext {
                    request_id: &request.id,
                    stores: &env.stores,
                    attempt_mark: &run.mark,
                    snapshot: run.snapshot.as_ref(),
                };
                let cleaned = env.cleaner.clean(&classification, &ctx).await;
                env.events
                    .emit(ExecutionEvent::ContextCleaned(ContextCleanedEvent {
                        request_id: request.id.clone(),
                        attempt,
                        strategy: cleaned.strategy.clone(),
                        error_type: error_type.clone(),
                        restored_snapshot: restored,
                        removed_traces: cleaned.removed_count(),
                    }));

                let mut merged = hints.take().unwrap_or_default();
                merged.merge(cleaned.into_hints());
                hints = Some(merged);
            }

            let next = attempt + 1;
            BackoffCalculator::from_policy(&retry_policy)
                .wait(attempt, |delay| {
                    let delay_ms = delay.as_millis() as u64;
                    info!(
                        request_id = %request.id,
                        attempt = next,
                        error_type = %error_type,
                        delay_ms,
                        "retrying execution"
                    );
                    env.events.emit(ExecutionEvent::RetryAttempt(RetryAttemptEvent {
                        request_id: request.id.clone(),
                        attempt: next,
                        error_type: error_type.clone(),
                        delay_ms,
                    }));
                })
                .await;

            machine = ExecutionStateMachine::after_retry(&machine)?;
            attempt = next;
        }
    }
}
