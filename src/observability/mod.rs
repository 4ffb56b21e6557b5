//! Observability: structured logging and metrics collection.
//!
//! Logging is initialized once at startup from environment variables; the
//! metrics collector is a process-wide singleton served on `GET /metrics`.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{job_span, step_span};
