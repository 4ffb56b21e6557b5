//! Pipeline step descriptors and the collaborator interfaces the runner
//! drives them through.
//!
//! A pipeline is an ordered list of [`StepSpec`]s assembled at startup.
//! Each spec names its step, references the executor that does the work,
//! and optionally carries a skip predicate and a parallel-eligibility
//! flag. Step completion flows through the [`StepSink`] interface rather
//! than closures over shared mutable state.

pub mod runner;

pub use runner::PipelineRunner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ServiceResult;
use crate::registry::{JobId, PartialResult, TaskRegistry};

/// Telemetry session handling for a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// No session wraps the run
    #[default]
    None,
    /// One correlated session per run, opened at start and closed at the end
    PerRun,
}

/// Successful output of one step execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Primary textual output
    pub output: String,
    /// Structured payload, absent when the step produced none
    pub details: Option<serde_json::Value>,
}

impl StepOutcome {
    pub fn new(output: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            output: output.into(),
            details,
        }
    }
}

/// A step that has already executed within the current run
#[derive(Debug, Clone)]
pub struct CompletedStep {
    pub step_name: String,
    pub outcome: StepOutcome,
}

/// Accumulated context handed to each step executor
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: JobId,
    /// Original free-text diagnosis input
    pub input: String,
    /// Previously executed steps in completion order
    pub completed: Vec<CompletedStep>,
}

impl StepContext {
    pub fn new(job_id: JobId, input: impl Into<String>) -> Self {
        Self {
            job_id,
            input: input.into(),
            completed: Vec::new(),
        }
    }

    /// Structured details of the most recently executed step
    pub fn prior_details(&self) -> Option<&serde_json::Value> {
        self.completed
            .last()
            .and_then(|step| step.outcome.details.as_ref())
    }

    /// Outcome of a completed step, looked up by name
    pub fn outcome_of(&self, step_name: &str) -> Option<&StepOutcome> {
        self.completed
            .iter()
            .find(|step| step.step_name == step_name)
            .map(|step| &step.outcome)
    }
}

/// Opaque step-execution collaborator, invoked once per step per run
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, context: &StepContext) -> ServiceResult<StepOutcome>;
}

/// Event sink receiving each completed step's partial result
#[async_trait]
pub trait StepSink: Send + Sync {
    async fn on_step_complete(&self, job_id: JobId, partial: PartialResult);
}

/// Step sink that records partials in the task registry
pub struct RegistrySink {
    registry: Arc<TaskRegistry>,
}

impl RegistrySink {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl StepSink for RegistrySink {
    async fn on_step_complete(&self, job_id: JobId, partial: PartialResult) {
        self.registry.append_partial(job_id, partial).await;
    }
}

/// Predicate deciding whether a conditional step runs, evaluated against
/// the prior executed step's structured details
pub type StepPredicate = Arc<dyn Fn(Option<&serde_json::Value>) -> bool + Send + Sync>;

/// Descriptor for one declared pipeline step
#[derive(Clone)]
pub struct StepSpec {
    pub name: String,
    pub executor: Arc<dyn StepExecutor>,
    pub predicate: Option<StepPredicate>,
    /// Eligible to run concurrently with adjacent eligible siblings
    pub parallel_eligible: bool,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
            predicate: None,
            parallel_eligible: false,
        }
    }

    /// Attach a skip predicate; the step runs only when it returns true
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(Option<&serde_json::Value>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Mark the step eligible for concurrent execution with its siblings
    pub fn parallel(mut self) -> Self {
        self.parallel_eligible = true;
        self
    }

    /// Whether the step should run given the prior step's details
    pub(crate) fn should_run(&self, prior_details: Option<&serde_json::Value>) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(prior_details),
            None => true,
        }
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("has_predicate", &self.predicate.is_some())
            .field("parallel_eligible", &self.parallel_eligible)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopExecutor;

    #[async_trait]
    impl StepExecutor for NoopExecutor {
        async fn execute(&self, _context: &StepContext) -> ServiceResult<StepOutcome> {
            Ok(StepOutcome::new("noop", None))
        }
    }

    #[test]
    fn test_session_mode_serialization() {
        assert_eq!(serde_json::to_string(&SessionMode::None).unwrap(), "\"none\"");
        assert_eq!(
            serde_json::to_string(&SessionMode::PerRun).unwrap(),
            "\"per_run\""
        );
        let parsed: SessionMode = serde_json::from_str("\"per_run\"").unwrap();
        assert_eq!(parsed, SessionMode::PerRun);
    }

    #[test]
    fn test_step_without_predicate_always_runs() {
        let spec = StepSpec::new("always", Arc::new(NoopExecutor));
        assert!(spec.should_run(None));
        assert!(spec.should_run(Some(&json!({"anything": true}))));
    }

    #[test]
    fn test_step_predicate_gates_execution() {
        let spec = StepSpec::new("gated", Arc::new(NoopExecutor)).with_predicate(|details| {
            details
                .and_then(|d| d.get("proceed"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        });

        assert!(!spec.should_run(None));
        assert!(!spec.should_run(Some(&json!({"proceed": false}))));
        assert!(spec.should_run(Some(&json!({"proceed": true}))));
    }

    #[test]
    fn test_prior_details_tracks_last_completed_step() {
        let mut context = StepContext::new(uuid::Uuid::new_v4(), "input");
        assert!(context.prior_details().is_none());

        context.completed.push(CompletedStep {
            step_name: "first".to_string(),
            outcome: StepOutcome::new("out", Some(json!({"n": 1}))),
        });
        context.completed.push(CompletedStep {
            step_name: "second".to_string(),
            outcome: StepOutcome::new("out", None),
        });

        // The second step had no details, so the prior lookup yields none
        assert!(context.prior_details().is_none());
        assert_eq!(
            context.outcome_of("first").unwrap().details,
            Some(json!({"n": 1}))
        );
    }

    #[tokio::test]
    async fn test_registry_sink_appends_to_registry() {
        let registry = Arc::new(TaskRegistry::new());
        let id = uuid::Uuid::new_v4();
        registry.create(id, 1).await;

        let sink = RegistrySink::new(Arc::clone(&registry));
        sink.on_step_complete(id, PartialResult::new("step", "output", None))
            .await;

        let snapshot = registry.get(id).await.unwrap();
        assert_eq!(snapshot.partials.len(), 1);
        assert_eq!(snapshot.partials[0].step_name, "step");
    }
}
