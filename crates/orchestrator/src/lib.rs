//! Execution Orchestration & Recovery Engine
//!
//! Accepts code-execution requests, runs them strictly one at a time in FIFO
//! order through an opaque [`ExecutionPrimitive`], classifies failures, cleans
//! the entity stores between attempts and retries with backoff under named
//! policies.
//!
//! # Architecture
//!
//! - **ExecutionManager**: FIFO queue, single-flight drain task, policy surface
//! - **ExecutionStrategy**: `retry` (default) and `direct`, looked up by policy
//! - **ExecutionRunner**: reference expansion plus the primitive/timeout race
//! - **ExecutionStateMachine**: per-attempt lifecycle with a fixed transition table
//! - **ErrorClassifier**: ordered, runtime-registrable rules with a loud fallback
//! - **ContextCleaner**: per-error-type trace removal and recovery hints
//! - **ResultHandler**: transformer chain, logging decision, rolling aggregates
//! - **EngineEvents**: typed notifications over the shared event bus
//!
//! # Usage
//!
//! ```no_run
//! use orchestrator::{ExecutionManager, ExecutionPrimitive, ExecutionRequest, PrimitiveOutput, Context};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ExecutionPrimitive for Echo {
//!     async fn execute(&self, code: &str, _: &Context, _: Duration) -> PrimitiveOutput {
//!         PrimitiveOutput::value(code)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ExecutionManager::builder(Arc::new(Echo)).build()?;
//!     let outcome = manager.submit(ExecutionRequest::new("1 + 1")).await;
//!     println!("success: {}", outcome.success);
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod classifier;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod policy;
pub mod primitive;
pub mod request;
pub mod results;
pub mod runner;
pub mod state_machine;
pub mod strategy;

pub use backoff::BackoffCalculator;
pub use classifier::{
    ClassificationRule, ErrorCategory, ErrorClassification, ErrorClassifier, ErrorType, Severity,
};
pub use cleaner::{
    CleanedContext, CleanerError, CleaningContext, CleaningStrategy, ContextCleaner, NoopCleaning,
    ReferenceRecovery, TraceRemoval,
};
pub use config::{EngineConfig, ResultsConfig, RunnerConfig, SnapshotConfig};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvents, EventReceiver, ExecutionEvent, ExecutionTopics};
pub use manager::{ExecutionHandle, ExecutionManager, ExecutionManagerBuilder};
pub use policy::{
    ExecutionPolicy, ExecutionPolicyManager, PolicyError, RetryPolicy, RetryPolicyManager,
    DEFAULT_POLICY,
};
pub use primitive::{ExecutionPrimitive, PrimitiveOutput};
pub use request::{
    AttemptSummary, CodeAnalysis, Context, ExecutionErrorInfo, ExecutionOutcome,
    ExecutionRequest, LogEntry, LogLevel, RecoveryHints, ReferencedId, RequestSource,
};
pub use results::{AggregateSummary, OutcomeTransformer, ProcessOptions, ResultHandler};
pub use runner::ExecutionRunner;
pub use state_machine::{ExecutionState, ExecutionStateMachine, StateMachineError};
pub use strategy::{
    DirectStrategy, ExecutionEnv, ExecutionStrategy, RetryStrategy, StrategyRegistry,
};
