use async_trait::async_trait;
use std::time::Duration;

use super::{finalize, final_hints, observed_machine, run_attempt, ExecutionEnv, ExecutionStrategy};
use crate::error::EngineError;
use crate::policy::ExecutionPolicy;
use crate::request::{ExecutionOutcome, ExecutionRequest};

/// One attempt, classified like any other, never retried.
pub struct DirectStrategy;

#[async_trait]
impl ExecutionStrategy for DirectStrategy {
    fn name(&self) -> &str {
        "direct"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        policy: &ExecutionPolicy,
        env: &ExecutionEnv,
    ) -> Result<ExecutionOutcome, EngineError> {
        let timeout = policy.timeout_ms.map(Duration::from_millis);
        let mut machine = observed_machine(&request.id, &env.events);

        let run = run_attempt(env, &request.for_attempt(1, None), &mut machine, timeout, false).await?;
        let attempts = vec![run.outcome.summary(1)];
        let recovery = match &run.classification {
            Some(classification) => final_hints(env, &request.id, classification, &run, None).await,
            None => None,
        };
        Ok(finalize(run.outcome, attempts, &machine, recovery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorClassifier, ErrorType};
    use crate::cleaner::ContextCleaner;
    use crate::config::SnapshotConfig;
    use crate::events::{EngineEvents, ExecutionEvent};
    use crate::policy::RetryPolicyManager;
    use crate::primitive::MockExecutionPrimitive;
    use crate::primitive::PrimitiveOutput;
    use crate::results::ResultHandler;
    use crate::runner::ExecutionRunner;
    use crate::state_machine::ExecutionState;
    use entities::StoreSet;
    use std::sync::Arc;

    fn env(primitive: MockExecutionPrimitive) -> ExecutionEnv {
        let classifier = Arc::new(ErrorClassifier::with_default_rules().unwrap());
        let stores = StoreSet::in_memory();
        ExecutionEnv {
            runner: Arc::new(
                ExecutionRunner::new(Arc::new(primitive), stores.clone(), Duration::from_secs(1))
                    .unwrap(),
            ),
            classifier: classifier.clone(),
            cleaner: Arc::new(ContextCleaner::with_default_strategies()),
            retry_policies: Arc::new(RetryPolicyManager::new()),
            results: Arc::new(ResultHandler::new(classifier, 10, false)),
            stores,
            events: EngineEvents::new(64),
            snapshot: SnapshotConfig::default(),
        }
    }

    #[tokio::test]
    async fn retryable_failures_are_not_retried() {
        let mut primitive = MockExecutionPrimitive::new();
        primitive
            .expect_execute()
            .times(1)
            .returning(|_, _, _| PrimitiveOutput::error("NetworkError", "ECONNRESET"));
        let env = env(primitive);
        let mut events = env.events.subscribe_all();

        let outcome = DirectStrategy
            .execute(&ExecutionRequest::new("fetch()"), &ExecutionPolicy::default(), &env)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.attempt_count, 1);
        assert!(!outcome.retried);
        assert_eq!(outcome.error_type(), Some(&ErrorType::NETWORK));
        assert_eq!(outcome.final_state, Some(ExecutionState::Failed));
        assert!(outcome.recovery.is_none());

        let mut states = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            if let ExecutionEvent::StateChanged(change) = envelope.payload {
                states.push(change.to);
            }
        }
        assert_eq!(
            states,
            vec![
                ExecutionState::Preparing,
                ExecutionState::Executing,
                ExecutionState::Failed
            ]
        );
    }

    #[tokio::test]
    async fn success_completes() {
        let mut primitive = MockExecutionPrimitive::new();
        primitive
            .expect_execute()
            .returning(|_, _, _| PrimitiveOutput::value(42));

        let outcome = DirectStrategy
            .execute(&ExecutionRequest::new("42"), &ExecutionPolicy::default(), &env(primitive))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.value, Some(serde_json::json!(42)));
        assert_eq!(outcome.final_state, Some(ExecutionState::Completed));
    }
}
