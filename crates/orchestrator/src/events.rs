//! Engine notifications
//!
//! Typed events fanned out over the shared [`EventBus`]. Observers are never
//! participants: publishing does not wait and a missing subscriber is not an error.

use common::{EventBus, EventEnvelope, Topic};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::classifier::ErrorType;
use crate::request::RequestSource;
use crate::state_machine::ExecutionState;

/// Topic names, one per event variant.
pub struct ExecutionTopics;

impl ExecutionTopics {
    pub const QUEUE_CHANGED: Topic = Topic("execution.queue_changed");
    pub const CURRENT_CHANGED: Topic = Topic("execution.current_changed");
    pub const STARTED: Topic = Topic("execution.started");
    pub const COMPLETED: Topic = Topic("execution.completed");
    pub const RETRY_ATTEMPT: Topic = Topic("execution.retry_attempt");
    pub const CONTEXT_CLEANED: Topic = Topic("execution.context_cleaned");
    pub const STATE_CHANGED: Topic = Topic("execution.state_changed");
    pub const POLICY_CHANGED: Topic = Topic("policy.changed");
    pub const PIPELINE_PAUSED: Topic = Topic("pipeline.paused");
    pub const PIPELINE_RESUMED: Topic = Topic("pipeline.resumed");
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueChangedEvent {
    /// Requests waiting, not counting the one executing
    pub length: usize,
    pub current: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentChangedEvent {
    pub current: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStartedEvent {
    pub request_id: String,
    pub source: RequestSource,
    pub policy: String,
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionCompletedEvent {
    pub request_id: String,
    pub success: bool,
    pub attempt_count: u32,
    pub duration_ms: u64,
    pub error_type: Option<ErrorType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttemptEvent {
    pub request_id: String,
    /// The attempt about to start
    pub attempt: u32,
    pub error_type: ErrorType,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextCleanedEvent {
    pub request_id: String,
    pub attempt: u32,
    pub strategy: String,
    pub error_type: ErrorType,
    pub restored_snapshot: bool,
    pub removed_traces: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChangedEvent {
    pub request_id: String,
    pub attempt: u32,
    pub from: ExecutionState,
    pub to: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyChangedEvent {
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelinePausedEvent {
    pub signature: String,
    pub occurrences: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ExecutionEvent {
    QueueChanged(QueueChangedEvent),
    CurrentChanged(CurrentChangedEvent),
    ExecutionStarted(ExecutionStartedEvent),
    ExecutionCompleted(ExecutionCompletedEvent),
    RetryAttempt(RetryAttemptEvent),
    ContextCleaned(ContextCleanedEvent),
    StateChanged(StateChangedEvent),
    PolicyChanged(PolicyChangedEvent),
    PipelinePaused(PipelinePausedEvent),
    PipelineResumed,
}

impl ExecutionEvent {
    pub fn topic(&self) -> Topic {
        match self {
            ExecutionEvent::QueueChanged(_) => ExecutionTopics::QUEUE_CHANGED,
            ExecutionEvent::CurrentChanged(_) => ExecutionTopics::CURRENT_CHANGED,
            ExecutionEvent::ExecutionStarted(_) => ExecutionTopics::STARTED,
            ExecutionEvent::ExecutionCompleted(_) => ExecutionTopics::COMPLETED,
            ExecutionEvent::RetryAttempt(_) => ExecutionTopics::RETRY_ATTEMPT,
            ExecutionEvent::ContextCleaned(_) => ExecutionTopics::CONTEXT_CLEANED,
            ExecutionEvent::StateChanged(_) => ExecutionTopics::STATE_CHANGED,
            ExecutionEvent::PolicyChanged(_) => ExecutionTopics::POLICY_CHANGED,
            ExecutionEvent::PipelinePaused(_) => ExecutionTopics::PIPELINE_PAUSED,
            ExecutionEvent::PipelineResumed => ExecutionTopics::PIPELINE_RESUMED,
        }
    }
}

pub type EventReceiver = broadcast::Receiver<EventEnvelope<ExecutionEvent>>;

/// Cheap-to-clone publisher shared by every engine component.
#[derive(Clone, Default)]
pub struct EngineEvents {
    bus: EventBus<ExecutionEvent>,
}

impl EngineEvents {
    pub fn new(buffer: usize) -> Self {
        Self {
            bus: EventBus::new(buffer),
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        self.bus.publish(event.topic(), event);
    }

    pub fn subscribe(&self, topic: Topic) -> EventReceiver {
        self.bus.subscribe(topic)
    }

    pub fn subscribe_all(&self) -> EventReceiver {
        self.bus.subscribe_all()
    }
}
