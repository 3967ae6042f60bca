use entities::StoreError;
use thiserror::Error;

use crate::policy::PolicyError;
use crate::state_machine::StateMachineError;

/// Defects of the engine itself. Failures of executed code are never reported
/// through this type; they travel inside the outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Strategy '{name}' failed: {reason}")]
    Strategy { name: String, reason: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
