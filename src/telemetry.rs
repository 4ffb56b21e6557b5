//! Best-effort telemetry sessions around pipeline runs.
//!
//! Session handling is an optional capability behind [`TelemetrySink`].
//! The interface is infallible on purpose: implementations log their own
//! failures, and run logic never branches on whether a session opened.

use async_trait::async_trait;
use std::fmt;

use crate::registry::JobId;

/// Terminal outcome of one pipeline run, reported when a session closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Failure => write!(f, "failure"),
        }
    }
}

/// Correlated session lifecycle around a single run
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn open_session(&self, job_id: JobId);
    async fn close_session(&self, job_id: JobId, outcome: RunOutcome);
}

/// Telemetry sink that does nothing, installed when telemetry is disabled
#[derive(Debug, Default)]
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn open_session(&self, _job_id: JobId) {}

    async fn close_session(&self, _job_id: JobId, _outcome: RunOutcome) {}
}

/// Telemetry sink that records sessions in the service log
#[derive(Debug)]
pub struct LoggingTelemetry {
    service_name: String,
    tags: Vec<String>,
}

impl LoggingTelemetry {
    pub fn new(service_name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tags,
        }
    }
}

#[async_trait]
impl TelemetrySink for LoggingTelemetry {
    async fn open_session(&self, job_id: JobId) {
        tracing::info!(
            job_id = %job_id,
            service = %self.service_name,
            tags = ?self.tags,
            "telemetry session opened"
        );
    }

    async fn close_session(&self, job_id: JobId, outcome: RunOutcome) {
        tracing::info!(
            job_id = %job_id,
            service = %self.service_name,
            outcome = %outcome,
            "telemetry session closed"
        );
    }
}
