pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging, JsonFormatter, LoggingConfig, OperationTimer, PerformanceMetrics,
    ProcessContext, StructuredLogEntry,
};
