//! Per-attempt execution lifecycle.
//!
//! Every attempt gets its own machine. A retry does not continue the failed machine;
//! it starts a new one in `RETRYING` (see [`ExecutionStateMachine::after_retry`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Pending,
    Preparing,
    Executing,
    Completed,
    Failed,
    Timeout,
    Retrying,
    Cancelled,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 8] = [
        ExecutionState::Pending,
        ExecutionState::Preparing,
        ExecutionState::Executing,
        ExecutionState::Completed,
        ExecutionState::Failed,
        ExecutionState::Timeout,
        ExecutionState::Retrying,
        ExecutionState::Cancelled,
    ];

    /// The only legal successors of this state.
    pub fn allowed_targets(&self) -> &'static [ExecutionState] {
        use ExecutionState::*;

        match self {
            Pending => &[Preparing, Cancelled],
            Preparing => &[Executing, Failed, Cancelled],
            Executing => &[Completed, Failed, Timeout, Cancelled],
            Failed => &[Retrying, Cancelled],
            Timeout => &[Retrying, Cancelled],
            Retrying => &[Preparing, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "PENDING",
            ExecutionState::Preparing => "PREPARING",
            ExecutionState::Executing => "EXECUTING",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Timeout => "TIMEOUT",
            ExecutionState::Retrying => "RETRYING",
            ExecutionState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("a retry can only follow a machine in RETRYING, found {0}")]
    NotRetrying(ExecutionState),
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub state: ExecutionState,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    entered: Instant,
}

/// Passed to listeners after the state has changed.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub request_id: String,
    pub attempt: u32,
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

pub type StateListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

pub struct ExecutionStateMachine {
    request_id: String,
    attempt: u32,
    current: ExecutionState,
    history: Vec<HistoryEntry>,
    metadata: BTreeMap<String, Value>,
    state_listeners: Vec<(ExecutionState, StateListener)>,
    any_listeners: Vec<StateListener>,
}

impl fmt::Debug for ExecutionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionStateMachine")
            .field("request_id", &self.request_id)
            .field("attempt", &self.attempt)
            .field("current", &self.current)
            .field("history", &self.history.len())
            .finish()
    }
}

impl ExecutionStateMachine {
    pub fn new(request_id: impl Into<String>, attempt: u32) -> Self {
        Self::starting_in(request_id.into(), attempt, ExecutionState::Pending, BTreeMap::new())
    }

    fn starting_in(
        request_id: String,
        attempt: u32,
        state: ExecutionState,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            request_id,
            attempt,
            current: state,
            history: vec![HistoryEntry {
                state,
                metadata,
                timestamp: Utc::now(),
                entered: Instant::now(),
            }],
            metadata: BTreeMap::new(),
            state_listeners: Vec::new(),
            any_listeners: Vec::new(),
        }
    }

    /// Fresh machine for the next attempt, starting in `RETRYING`.
    ///
    /// Listeners carry over; history and metadata do not.
    pub fn after_retry(previous: &ExecutionStateMachine) -> Result<Self, StateMachineError> {
        if previous.current != ExecutionState::Retrying {
            return Err(StateMachineError::NotRetrying(previous.current));
        }
        let origin = BTreeMap::from([(
            "previous_attempt".to_string(),
            Value::from(previous.attempt),
        )]);
        let mut next = Self::starting_in(
            previous.request_id.clone(),
            previous.attempt + 1,
            ExecutionState::Retrying,
            origin,
        );
        next.state_listeners = previous.state_listeners.clone();
        next.any_listeners = previous.any_listeners.clone();
        Ok(next)
    }

    pub fn current(&self) -> ExecutionState {
        self.current
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn on_state<F>(&mut self, state: ExecutionState, listener: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.state_listeners.push((state, Arc::new(listener)));
    }

    /// Called for every transition.
    pub fn on_any<F>(&mut self, listener: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.any_listeners.push(Arc::new(listener));
    }

    pub fn transition(&mut self, to: ExecutionState) -> Result<(), StateMachineError> {
        self.transition_with(to, BTreeMap::new())
    }

    /// Move to `to`, recording `metadata` on the history entry and in the accumulated
    /// metadata. An edge outside the table is rejected and nothing changes.
    pub fn transition_with(
        &mut self,
        to: ExecutionState,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), StateMachineError> {
        let from = self.current;
        if !from.can_transition_to(to) {
            debug!(request_id = %self.request_id, %from, %to, "rejected state transition");
            return Err(StateMachineError::InvalidTransition { from, to });
        }

        let timestamp = Utc::now();
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.history.push(HistoryEntry {
            state: to,
            metadata: metadata.clone(),
            timestamp,
            entered: Instant::now(),
        });
        self.current = to;
        trace!(request_id = %self.request_id, attempt = self.attempt, %from, %to, "state transition");

        let transition = StateTransition {
            request_id: self.request_id.clone(),
            attempt: self.attempt,
            from,
            to,
            metadata,
            timestamp,
        };
        for (state, listener) in &self.state_listeners {
            if *state == to {
                listener(&transition);
            }
        }
        for listener in &self.any_listeners {
            listener(&transition);
        }
        Ok(())
    }

    /// Time spent in each visited state; the current state counts up to now.
    pub fn state_durations(&self) -> BTreeMap<ExecutionState, Duration> {
        let now = Instant::now();
        let mut durations = BTreeMap::new();
        for (i, entry) in self.history.iter().enumerate() {
            let left = self
                .history
                .get(i + 1)
                .map(|next| next.entered)
                .unwrap_or(now);
            *durations.entry(entry.state).or_insert(Duration::ZERO) +=
                left.saturating_duration_since(entry.entered);
        }
        durations
    }

    pub fn total_duration(&self) -> Duration {
        self.history
            .first()
            .map(|first| first.entered.elapsed())
            .unwrap_or_default()
    }
}
