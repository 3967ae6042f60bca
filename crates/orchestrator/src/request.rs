//! Requests entering the engine and the outcomes leaving it.

use chrono::{DateTime, Utc};
use entities::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::classifier::{ErrorClassification, ErrorType};
use crate::state_machine::ExecutionState;

/// Key/value objects injected into the execution primitive.
pub type Context = BTreeMap<String, Value>;

/// Context key under which recovery hints are injected into retried attempts.
pub const RECOVERY_CONTEXT_KEY: &str = "recovery";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    #[default]
    Manual,
    Automatic,
    Other,
}

/// A code payload awaiting execution. Never mutated once submitted; retries work on
/// enriched copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: String,
    pub code: String,
    pub source: RequestSource,
    pub submitted_at: DateTime<Utc>,
    /// Per-request override of the policy timeout
    pub timeout_ms: Option<u64>,
    pub context: Context,
    pub metadata: BTreeMap<String, Value>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            source: RequestSource::default(),
            submitted_at: Utc::now(),
            timeout_ms: None,
            context: Context::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source(mut self, source: RequestSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attempt number recorded by the strategy, 1 for a fresh request.
    pub fn attempt(&self) -> u32 {
        self.metadata
            .get("attempt")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(1)
    }

    /// Copy used for attempt `attempt`, carrying recovery hints from earlier cleaning.
    pub fn for_attempt(&self, attempt: u32, recovery: Option<&RecoveryHints>) -> Self {
        let mut enriched = self.clone();
        enriched
            .metadata
            .insert("attempt".to_string(), Value::from(attempt));
        if let Some(hints) = recovery {
            if let Ok(value) = serde_json::to_value(hints) {
                enriched
                    .context
                    .insert(RECOVERY_CONTEXT_KEY.to_string(), value);
            }
        }
        enriched
    }
}

/// A failure raised by executed code, or synthesized by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ExecutionErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// `name: message`, the identity used to spot the same failure recurring.
    pub fn signature(&self) -> String {
        format!("{}: {}", self.name, self.message)
    }
}

impl fmt::Display for ExecutionErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of captured side-channel output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedId {
    pub kind: EntityKind,
    pub id: String,
    pub resolved: bool,
}

/// Static metrics of a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    pub char_count: usize,
    pub line_count: usize,
    /// Every reference token, in order of appearance
    pub referenced_ids: Vec<ReferencedId>,
}

impl CodeAnalysis {
    pub fn unresolved(&self) -> impl Iterator<Item = &ReferencedId> {
        self.referenced_ids.iter().filter(|r| !r.resolved)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

/// Corrective information attached to failed outcomes and to retried requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryHints {
    /// Identifiers currently present in each store
    pub valid_entities: BTreeMap<EntityKind, Vec<String>>,
    /// Records written by failed attempts and removed again
    pub removed_traces: BTreeMap<EntityKind, Vec<String>>,
    pub suggestions: Vec<String>,
}

impl RecoveryHints {
    pub fn is_empty(&self) -> bool {
        self.valid_entities.is_empty() && self.removed_traces.is_empty() && self.suggestions.is_empty()
    }

    /// Fold `other` in: newer identifier listings win, traces and suggestions accumulate.
    pub fn merge(&mut self, other: RecoveryHints) {
        if !other.valid_entities.is_empty() {
            self.valid_entities = other.valid_entities;
        }
        for (kind, ids) in other.removed_traces {
            let entry = self.removed_traces.entry(kind).or_default();
            for id in ids {
                if !entry.contains(&id) {
                    entry.push(id);
                }
            }
        }
        for suggestion in other.suggestions {
            if !self.suggestions.contains(&suggestion) {
                self.suggestions.push(suggestion);
            }
        }
    }
}

/// Result of one runner invocation; the final one also carries attempt metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorInfo>,
    pub logs: Vec<LogEntry>,
    pub resolved_code: String,
    pub analysis: CodeAnalysis,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ErrorClassification>,
    pub attempt_count: u32,
    pub retried: bool,
    pub attempts: Vec<AttemptSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryHints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_state: Option<ExecutionState>,
}

impl ExecutionOutcome {
    /// A failure produced without running the payload (engine defect, paused pipeline).
    pub fn synthesized_failure(request: &ExecutionRequest, error: ExecutionErrorInfo) -> Self {
        let now = Utc::now();
        Self {
            request_id: request.id.clone(),
            success: false,
            value: None,
            error: Some(error),
            logs: Vec::new(),
            resolved_code: request.code.clone(),
            analysis: crate::runner::analyze(&request.code),
            duration_ms: 0,
            started_at: now,
            finished_at: now,
            timed_out: false,
            classification: None,
            attempt_count: 0,
            retried: false,
            attempts: Vec::new(),
            recovery: None,
            final_state: None,
        }
    }

    pub fn error_type(&self) -> Option<&ErrorType> {
        self.classification.as_ref().map(|c| &c.error_type)
    }

    /// Serialized size of the value or error, used for payload statistics.
    pub fn payload_size(&self) -> usize {
        let payload = if self.success {
            self.value.as_ref().map(|v| v.to_string().len())
        } else {
            self.error.as_ref().map(|e| e.name.len() + e.message.len())
        };
        payload.unwrap_or(0)
    }

    pub(crate) fn summary(&self, attempt: u32) -> AttemptSummary {
        AttemptSummary {
            attempt,
            success: self.success,
            duration_ms: self.duration_ms,
            timed_out: self.timed_out,
            error_type: self.error_type().cloned(),
        }
    }
}
