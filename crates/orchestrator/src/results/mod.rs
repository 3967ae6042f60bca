//! Result Handler & Aggregator

mod aggregator;
mod handler;

pub use aggregator::{
    AggregateSummary, DistributionSummary, ResultAggregator, RollingWindow, DEFAULT_WINDOW_SIZE,
};
pub use handler::{
    OutcomeTransformer, ProcessOptions, ProcessedOutcome, ResultHandler, TransformFn,
};
