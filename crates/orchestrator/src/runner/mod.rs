//! Execution Runner
//!
//! One invocation of the primitive: analyse, expand references, race the primitive
//! against the timeout, wrap everything into an [`ExecutionOutcome`].

mod references;

use chrono::Utc;
use entities::StoreSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::primitive::ExecutionPrimitive;
use crate::request::{ExecutionErrorInfo, ExecutionOutcome, ExecutionRequest};

pub use references::{analyze, ReferenceExpander, UNRESOLVED_SENTINEL};

/// Error name of a synthesized timeout.
pub const TIMEOUT_ERROR_NAME: &str = "TimeoutError";

pub struct ExecutionRunner {
    primitive: Arc<dyn ExecutionPrimitive>,
    stores: StoreSet,
    expander: ReferenceExpander,
    default_timeout: Duration,
}

impl ExecutionRunner {
    pub fn new(
        primitive: Arc<dyn ExecutionPrimitive>,
        stores: StoreSet,
        default_timeout: Duration,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            primitive,
            stores,
            expander: ReferenceExpander::new()?,
            default_timeout,
        })
    }

    /// Request override, then the policy timeout, then the runner default.
    pub fn resolve_timeout(
        &self,
        request: &ExecutionRequest,
        policy_timeout: Option<Duration>,
    ) -> Duration {
        request
            .timeout_ms
            .map(Duration::from_millis)
            .or(policy_timeout)
            .unwrap_or(self.default_timeout)
    }

    pub async fn run(
        &self,
        request: &ExecutionRequest,
        policy_timeout: Option<Duration>,
    ) -> ExecutionOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut analysis = analyze(&request.code);
        let (resolved_code, referenced) = self.expander.expand(&request.code, &self.stores).await;
        analysis.referenced_ids = referenced;

        let limit = self.resolve_timeout(request, policy_timeout);
        debug!(
            request_id = %request.id,
            attempt = request.attempt(),
            timeout_ms = limit.as_millis() as u64,
            chars = analysis.char_count,
            "invoking execution primitive"
        );

        let mut logs = Vec::new();
        let mut timed_out = false;
        let result = match timeout(
            limit,
            self.primitive
                .execute(&resolved_code, &request.context, limit),
        )
        .await
        {
            Ok(output) => {
                logs = output.captured_output;
                output.result
            }
            Err(_) => {
                // The primitive future is dropped here; a late result is never observed.
                timed_out = true;
                warn!(request_id = %request.id, timeout_ms = limit.as_millis() as u64, "execution timed out");
                Err(ExecutionErrorInfo::new(
                    TIMEOUT_ERROR_NAME,
                    format!("Execution timed out after {}ms", limit.as_millis()),
                ))
            }
        };

        let (success, value, error) = match result {
            Ok(value) => (true, Some(value), None),
            Err(error) => (false, None, Some(error)),
        };

        ExecutionOutcome {
            request_id: request.id.clone(),
            success,
            value,
            error,
            logs,
            resolved_code,
            analysis,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
            finished_at: Utc::now(),
            timed_out,
            classification: None,
            attempt_count: 1,
            retried: false,
            attempts: Vec::new(),
            recovery: None,
            final_state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{MockExecutionPrimitive, PrimitiveOutput};
    use crate::request::{Context, LogEntry};
    use async_trait::async_trait;
    use entities::{EntityKind, EntityRecord, EntityStore};
    use serde_json::json;

    fn runner(mock: MockExecutionPrimitive, stores: StoreSet) -> ExecutionRunner {
        ExecutionRunner::new(Arc::new(mock), stores, Duration::from_secs(10)).unwrap()
    }

    #[tokio::test]
    async fn successful_run_carries_value_and_logs() {
        let mut mock = MockExecutionPrimitive::new();
        mock.expect_execute()
            .times(1)
            .returning(|_, _, _| {
                PrimitiveOutput::value(json!({"ok": true}))
                    .with_logs(vec![LogEntry::info("working")])
            });

        let outcome = runner(mock, StoreSet::new())
            .run(&ExecutionRequest::new("return ok"), None)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.value, Some(json!({"ok": true})));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.logs.len(), 1);
        assert_eq!(outcome.analysis.char_count, 9);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn primitive_receives_expanded_code_and_context() {
        let stores = StoreSet::in_memory();
        stores
            .require(EntityKind::Memory)
            .unwrap()
            .upsert(EntityRecord::new("m-1").with_field("text", "hi"))
            .await
            .unwrap();

        let mut mock = MockExecutionPrimitive::new();
        mock.expect_execute()
            .withf(|code, context, timeout| {
                code.contains("\"text\":\"hi\"")
                    && context.get("user") == Some(&json!("ada"))
                    && *timeout == Duration::from_millis(250)
            })
            .times(1)
            .returning(|_, _, _| PrimitiveOutput::value(1));

        let request = ExecutionRequest::new("print({{memory:m-1}})")
            .with_context("user", "ada")
            .with_timeout_ms(250);
        let outcome = runner(mock, stores)
            .run(&request, Some(Duration::from_secs(5)))
            .await;

        assert!(outcome.success);
        assert!(outcome.analysis.referenced_ids[0].resolved);
    }

    #[tokio::test]
    async fn primitive_errors_are_outcomes() {
        let mut mock = MockExecutionPrimitive::new();
        mock.expect_execute()
            .returning(|_, _, _| PrimitiveOutput::error("SyntaxError", "Unexpected token"));

        let outcome = runner(mock, StoreSet::new())
            .run(&ExecutionRequest::new("{"), None)
            .await;
        assert!(!outcome.success);
        assert!(outcome.value.is_none());
        assert_eq!(outcome.error.unwrap().name, "SyntaxError");
    }

    struct Sleeper(Duration);

    #[async_trait]
    impl ExecutionPrimitive for Sleeper {
        async fn execute(&self, _: &str, _: &Context, _: Duration) -> PrimitiveOutput {
            tokio::time::sleep(self.0).await;
            PrimitiveOutput::value("late")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primitive_loses_the_race() {
        let runner = ExecutionRunner::new(
            Arc::new(Sleeper(Duration::from_secs(60))),
            StoreSet::new(),
            Duration::from_secs(10),
        )
        .unwrap();

        let outcome = runner
            .run(&ExecutionRequest::new("loop {}").with_timeout_ms(1500), None)
            .await;

        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert!(outcome.value.is_none());
        let error = outcome.error.unwrap();
        assert_eq!(error.name, TIMEOUT_ERROR_NAME);
        assert_eq!(error.message, "Execution timed out after 1500ms");
        assert_eq!(outcome.duration_ms, 1500);
    }

    #[test]
    fn timeout_resolution_order() {
        let runner = runner(MockExecutionPrimitive::new(), StoreSet::new());
        let plain = ExecutionRequest::new("x");
        assert_eq!(runner.resolve_timeout(&plain, None), Duration::from_secs(10));
        assert_eq!(
            runner.resolve_timeout(&plain, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            runner.resolve_timeout(&plain.with_timeout_ms(40), Some(Duration::from_secs(3))),
            Duration::from_millis(40)
        );
    }
}
