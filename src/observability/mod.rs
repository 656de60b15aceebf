//! Observability for the relay
//!
//! Structured logging through `tracing` and a process-wide set of atomic
//! counters that is logged as a snapshot on shutdown.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{relay_span, retry_span, supervisor_span};
