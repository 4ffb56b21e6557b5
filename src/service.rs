//! Service assembly and job submission.
//!
//! [`CodingService`] owns the long-lived collaborators: the task registry,
//! the pipeline runner with its fixed step plan, the terminology store,
//! and the job concurrency limit. The HTTP layer and the CLI both drive
//! jobs exclusively through this type.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::{OpenAiConfig, OpenAiProvider};
use crate::observability::metrics::metrics;
use crate::pipeline::{PipelineRunner, RegistrySink, StepSpec};
use crate::registry::{JobId, JobSnapshot, TaskRegistry};
use crate::steps::{
    has_icd10_suggestions, CodeSuggestionStep, ReportStep, ValidationStep, CODE_SUGGESTION_STEP,
    REPORTING_STEP, VALIDATION_STEP,
};
use crate::telemetry::{LoggingTelemetry, NoopTelemetry, RunOutcome, TelemetrySink};
use crate::terminology::TerminologyStore;

/// Build the configured LLM provider from service configuration
fn build_provider(config: &ServiceConfig) -> ServiceResult<Arc<dyn LlmProvider>> {
    match config.llm.provider.as_str() {
        "openai" => {
            let api_key = config.get_llm_api_key()?;
            let provider = OpenAiProvider::new(OpenAiConfig {
                api_key,
                base_url: config.llm.base_url.clone(),
                timeout: Duration::from_secs(config.llm.timeout_seconds),
                max_retries: config.llm.max_retries,
            })?;
            Ok(Arc::new(provider))
        }
        provider => Err(ServiceError::invalid_input(format!(
            "Unsupported LLM provider: {provider}"
        ))),
    }
}

/// The assembled diagnosis coding service
pub struct CodingService {
    config: ServiceConfig,
    registry: Arc<TaskRegistry>,
    runner: Arc<PipelineRunner>,
    store: Arc<TerminologyStore>,
    job_slots: Arc<Semaphore>,
}

impl CodingService {
    /// Build the full service from configuration: load the terminology
    /// table, construct the LLM provider, and assemble the step plan.
    pub fn from_config(config: ServiceConfig) -> ServiceResult<Self> {
        let store = Arc::new(TerminologyStore::load_csv(&config.terminology.csv_path)?);
        let provider = build_provider(&config)?;
        Ok(Self::assemble(config, store, provider))
    }

    /// Assemble the service from pre-built collaborators.
    ///
    /// This is the injection seam: tests pass a mock provider and an
    /// in-memory store instead of real ones.
    pub fn assemble(
        config: ServiceConfig,
        store: Arc<TerminologyStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new());

        let telemetry: Arc<dyn TelemetrySink> = if config.telemetry.enabled {
            Arc::new(LoggingTelemetry::new(
                config.service.name.clone(),
                config.telemetry.tags.clone(),
            ))
        } else {
            Arc::new(NoopTelemetry)
        };

        // The standard coding plan: suggest, validate, report. Validation
        // is skipped when the suggestion step produced no ICD-10 codes.
        let steps = vec![
            StepSpec::new(
                CODE_SUGGESTION_STEP,
                Arc::new(CodeSuggestionStep::new(provider, &config.llm)),
            ),
            StepSpec::new(VALIDATION_STEP, Arc::new(ValidationStep::new(Arc::clone(&store))))
                .with_predicate(has_icd10_suggestions),
            StepSpec::new(REPORTING_STEP, Arc::new(ReportStep::new())),
        ];

        let runner = Arc::new(PipelineRunner::new(
            Arc::clone(&registry),
            Arc::new(RegistrySink::new(Arc::clone(&registry))),
            telemetry,
            steps,
            config.pipeline.parallel_batch_size,
        ));

        let job_slots = Arc::new(Semaphore::new(config.service.max_concurrent_jobs));

        Self {
            config,
            registry,
            runner,
            store,
            job_slots,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Shared handle to the task registry
    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    /// Shared handle to the terminology store
    pub fn store(&self) -> Arc<TerminologyStore> {
        Arc::clone(&self.store)
    }

    /// Validate and trim the submitted diagnosis text
    fn accept_input(&self, diagnosis_text: &str) -> ServiceResult<String> {
        let diagnosis = diagnosis_text.trim();
        if diagnosis.is_empty() {
            metrics().job_rejected();
            return Err(ServiceError::invalid_input(
                "diagnosis_text cannot be empty",
            ));
        }
        metrics().job_received();
        Ok(diagnosis.to_string())
    }

    /// Accept a coding job and run its pipeline in the background.
    ///
    /// Returns the new job id immediately; callers poll the registry for
    /// progress. Runs beyond the configured concurrency limit wait for a
    /// slot while their job stays in `running` with zero partials.
    pub async fn submit(&self, diagnosis_text: &str) -> ServiceResult<JobId> {
        let input = self.accept_input(diagnosis_text)?;

        let job_id = Uuid::new_v4();
        self.registry.create(job_id, self.runner.total_steps()).await;
        info!(job_id = %job_id, "coding job accepted");

        let registry = Arc::clone(&self.registry);
        let runner = Arc::clone(&self.runner);
        let job_slots = Arc::clone(&self.job_slots);
        let session_mode = self.config.pipeline.session_mode;
        tokio::spawn(async move {
            let _permit = match job_slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Only possible if the semaphore was closed at shutdown
                    error!(job_id = %job_id, "job slot acquisition failed");
                    registry.fail(job_id, "Service is shutting down").await;
                    return;
                }
            };

            metrics().job_started();
            let started = Instant::now();
            let outcome = runner.run(job_id, input, session_mode).await;
            record_run_metrics(outcome, started.elapsed());
        });

        Ok(job_id)
    }

    /// Run one coding job to completion and return its final snapshot.
    ///
    /// Used by the one-shot CLI path; the HTTP layer uses [`submit`]
    /// instead.
    ///
    /// [`submit`]: CodingService::submit
    pub async fn run_to_completion(&self, diagnosis_text: &str) -> ServiceResult<JobSnapshot> {
        let input = self.accept_input(diagnosis_text)?;

        let job_id = Uuid::new_v4();
        self.registry.create(job_id, self.runner.total_steps()).await;

        let _permit = self
            .job_slots
            .acquire()
            .await
            .map_err(|_| ServiceError::internal_error("job slots closed"))?;

        metrics().job_started();
        let started = Instant::now();
        let outcome = self
            .runner
            .run(job_id, input, self.config.pipeline.session_mode)
            .await;
        record_run_metrics(outcome, started.elapsed());

        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| ServiceError::internal_error("job record missing after run"))
    }

    /// Snapshot a job by id
    pub async fn status(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.registry.get(job_id).await
    }
}

fn record_run_metrics(outcome: RunOutcome, elapsed: Duration) {
    match outcome {
        RunOutcome::Success => metrics().job_completed(elapsed),
        RunOutcome::Failure => metrics().job_failed(elapsed),
    }
}
