//! Task registry: single source of truth for asynchronous coding jobs.
//!
//! Jobs move through a small lifecycle (running, then completed or failed)
//! while pipeline steps append partial results as they finish. All mutation
//! happens under one registry-wide async mutex; critical sections are short
//! and never await, so the single lock is acceptable at current job volumes.
//! Jobs are never evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque job identifier, generated at submission time
pub type JobId = Uuid;

/// Lifecycle state of a coding job.
///
/// Terminal states are sticky: once a job is completed or failed it never
/// transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Output of one completed pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Identifier of the step that produced this result
    pub step_name: String,
    /// Primary textual output of the step
    pub output: String,
    /// Structured payload, absent when the step produced none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl PartialResult {
    pub fn new(
        step_name: impl Into<String>,
        output: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            output: output.into(),
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Internal mutable job state, only ever touched under the registry lock
#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    partials: Vec<PartialResult>,
    result: Option<String>,
    error: Option<String>,
    total_steps: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(total_steps: usize) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Running,
            partials: Vec::new(),
            result: None,
            error: None,
            total_steps,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time copy of a job's state.
///
/// Snapshots are taken under the registry lock, so a reader never observes
/// a half-applied append or a terminal status without its result/error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub partials: Vec<PartialResult>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub total_steps: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Progress string derived on read, e.g. "2/3 subtasks completed".
    ///
    /// The denominator is the statically declared step count, so skipped
    /// conditional steps make progress under-report.
    pub fn progress_summary(&self) -> String {
        format!(
            "{}/{} subtasks completed",
            self.partials.len(),
            self.total_steps
        )
    }
}

/// Thread-safe store of all coding jobs.
///
/// Mutations serialize through a single registry-scoped mutex rather than a
/// lock per job. Appends for the same job therefore preserve caller order
/// with no lost updates.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new running job with no partials, result, or error.
    ///
    /// Calling this twice with the same id replaces the first record;
    /// callers are responsible for id uniqueness.
    pub async fn create(&self, id: JobId, total_steps: usize) {
        let mut jobs = self.jobs.lock().await;
        if jobs.insert(id, JobRecord::new(total_steps)).is_some() {
            warn!(job_id = %id, "job id reused, previous record replaced");
        }
        debug!(job_id = %id, total_steps, "job created");
    }

    /// Atomically append a partial result to a job.
    ///
    /// An unknown id auto-creates a running job first so no data is lost
    /// when a caller appends before creating; the auto-created job has a
    /// declared step count of zero. Appends on a job that already reached a
    /// terminal status are ignored with a warn log, like `complete`/`fail`.
    pub async fn append_partial(&self, id: JobId, partial: PartialResult) {
        let mut jobs = self.jobs.lock().await;
        let record = jobs.entry(id).or_insert_with(|| {
            warn!(job_id = %id, "partial appended to unknown job, auto-creating");
            JobRecord::new(0)
        });
        if record.status != JobStatus::Running {
            warn!(
                job_id = %id,
                status = %record.status,
                step = %partial.step_name,
                "ignoring partial on terminal job"
            );
            return;
        }
        debug!(job_id = %id, step = %partial.step_name, "partial result recorded");
        record.partials.push(partial);
        record.updated_at = Utc::now();
    }

    /// Mark a job completed with its final result. Partials are untouched.
    ///
    /// Ignored when the job is unknown or already terminal.
    pub async fn complete(&self, id: JobId, result: impl Into<String>) {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(record) if record.status == JobStatus::Running => {
                record.status = JobStatus::Completed;
                record.result = Some(result.into());
                record.updated_at = Utc::now();
                debug!(job_id = %id, "job completed");
            }
            Some(record) => {
                warn!(job_id = %id, status = %record.status, "ignoring complete on terminal job");
            }
            None => {
                warn!(job_id = %id, "ignoring complete for unknown job");
            }
        }
    }

    /// Mark a job failed with an error message, keeping every partial
    /// recorded so far.
    ///
    /// Ignored when the job is unknown or already terminal, so the first
    /// recorded error wins.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(record) if record.status == JobStatus::Running => {
                record.status = JobStatus::Failed;
                record.error = Some(error.into());
                record.updated_at = Utc::now();
                debug!(job_id = %id, "job failed");
            }
            Some(record) => {
                warn!(job_id = %id, status = %record.status, "ignoring fail on terminal job");
            }
            None => {
                warn!(job_id = %id, "ignoring fail for unknown job");
            }
        }
    }

    /// Return a consistent snapshot of a job, or None when unknown
    pub async fn get(&self, id: JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        jobs.get(&id).map(|record| JobSnapshot {
            id,
            status: record.status,
            partials: record.partials.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            total_steps: record.total_steps,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Total number of jobs ever recorded (the registry never evicts)
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}
