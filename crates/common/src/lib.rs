pub mod event_bus;
pub mod structured_logging;

pub use event_bus::{EventBus, EventEnvelope, Topic, WILDCARD};
pub use structured_logging::{
    init_structured_logging, LoggingConfig, OperationTimer, PerformanceMetrics, ProcessContext,
    StructuredLogEntry,
};
