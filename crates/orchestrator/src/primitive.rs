use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::request::{Context, ExecutionErrorInfo, LogEntry};

/// What the primitive hands back: a value or a structured error, plus whatever it
/// captured on its side channels.
#[derive(Debug, Clone)]
pub struct PrimitiveOutput {
    pub result: Result<Value, ExecutionErrorInfo>,
    pub captured_output: Vec<LogEntry>,
}

impl PrimitiveOutput {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            result: Ok(value.into()),
            captured_output: Vec::new(),
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: Err(ExecutionErrorInfo::new(name, message)),
            captured_output: Vec::new(),
        }
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.captured_output = logs;
        self
    }
}

/// The opaque sandbox that actually runs a snippet.
///
/// `timeout` is advisory: the runner races the returned future against its own
/// timer and drops it on expiry, so implementations must release their resources
/// when dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionPrimitive: Send + Sync {
    async fn execute(&self, code: &str, context: &Context, timeout: Duration) -> PrimitiveOutput;
}
