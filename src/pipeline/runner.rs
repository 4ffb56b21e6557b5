//! Pipeline runner: drives one job's declared steps to a terminal status.
//!
//! Steps execute sequentially in declaration order, except that runs of
//! adjacent parallel-eligible steps form a batch whose members may finish
//! in any order. The first step error fails the job with that error's
//! message and stops the run; there are no per-step retries and no
//! cancellation beyond failure.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::observability::metrics::metrics;
use crate::pipeline::{CompletedStep, SessionMode, StepContext, StepSink, StepSpec};
use crate::registry::{JobId, PartialResult, TaskRegistry};
use crate::telemetry::{RunOutcome, TelemetrySink};

/// Executes the fixed step list for submitted jobs.
///
/// One runner instance serves all jobs; per-run state lives in the
/// [`StepContext`] built inside [`run`](PipelineRunner::run).
pub struct PipelineRunner {
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn StepSink>,
    telemetry: Arc<dyn TelemetrySink>,
    steps: Vec<StepSpec>,
    parallel_batch_size: usize,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        sink: Arc<dyn StepSink>,
        telemetry: Arc<dyn TelemetrySink>,
        steps: Vec<StepSpec>,
        parallel_batch_size: usize,
    ) -> Self {
        Self {
            registry,
            sink,
            telemetry,
            steps,
            parallel_batch_size: parallel_batch_size.max(1),
        }
    }

    /// Statically declared step count, used as the progress denominator
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Execute every declared step for an already-created job.
    ///
    /// The job always reaches a terminal status: completed with the last
    /// executed step's primary output, or failed with the first error's
    /// message. With [`SessionMode::PerRun`] a best-effort telemetry
    /// session wraps the whole run.
    pub async fn run(
        &self,
        job_id: JobId,
        input: impl Into<String>,
        session_mode: SessionMode,
    ) -> RunOutcome {
        if session_mode == SessionMode::PerRun {
            self.telemetry.open_session(job_id).await;
        }

        let outcome = self.execute_steps(job_id, input.into()).await;

        if session_mode == SessionMode::PerRun {
            self.telemetry.close_session(job_id, outcome).await;
        }
        outcome
    }

    async fn execute_steps(&self, job_id: JobId, input: String) -> RunOutcome {
        let mut context = StepContext::new(job_id, input);

        let mut index = 0;
        while index < self.steps.len() {
            let batch_end = self.batch_end(index);
            let batch = &self.steps[index..batch_end];

            let step_result = if batch.len() == 1 {
                self.run_single_step(&batch[0], &mut context).await
            } else {
                self.run_parallel_batch(batch, &mut context).await
            };

            if let Err(error) = step_result {
                self.registry.fail(job_id, error.to_string()).await;
                return RunOutcome::Failure;
            }

            index = batch_end;
        }

        let final_result = context
            .completed
            .last()
            .map(|step| step.outcome.output.clone())
            .unwrap_or_default();
        self.registry.complete(job_id, final_result).await;
        RunOutcome::Success
    }

    /// End of the batch starting at `index`: a run of adjacent
    /// parallel-eligible steps, or the single step itself
    fn batch_end(&self, index: usize) -> usize {
        if !self.steps[index].parallel_eligible {
            return index + 1;
        }
        let mut end = index;
        while end < self.steps.len() && self.steps[end].parallel_eligible {
            end += 1;
        }
        end
    }

    async fn run_single_step(
        &self,
        spec: &StepSpec,
        context: &mut StepContext,
    ) -> ServiceResult<()> {
        if !spec.should_run(context.prior_details()) {
            debug!(job_id = %context.job_id, step = %spec.name, "step skipped by predicate");
            metrics().step_skipped(&spec.name);
            return Ok(());
        }

        info!(job_id = %context.job_id, step = %spec.name, "executing pipeline step");
        let started = Instant::now();
        let outcome = spec.executor.execute(context).await.map_err(|error| {
            warn!(job_id = %context.job_id, step = %spec.name, error = %error, "pipeline step failed");
            metrics().step_executed(&spec.name, started.elapsed(), false);
            error
        })?;
        metrics().step_executed(&spec.name, started.elapsed(), true);

        self.sink
            .on_step_complete(
                context.job_id,
                PartialResult::new(
                    spec.name.clone(),
                    outcome.output.clone(),
                    outcome.details.clone(),
                ),
            )
            .await;
        context.completed.push(CompletedStep {
            step_name: spec.name.clone(),
            outcome,
        });
        Ok(())
    }

    /// Run a batch of sibling steps, at most `parallel_batch_size` at once.
    ///
    /// Predicates are evaluated once against the details preceding the
    /// batch. Completions append in whatever order the steps finish; on
    /// the first failure the remaining siblings are aborted and already
    /// appended partials stay in place.
    async fn run_parallel_batch(
        &self,
        batch: &[StepSpec],
        context: &mut StepContext,
    ) -> ServiceResult<()> {
        let mut eligible = Vec::new();
        for spec in batch {
            if spec.should_run(context.prior_details()) {
                eligible.push(spec.clone());
            } else {
                debug!(job_id = %context.job_id, step = %spec.name, "step skipped by predicate");
                metrics().step_skipped(&spec.name);
            }
        }

        let shared = Arc::new(context.clone());
        for chunk in eligible.chunks(self.parallel_batch_size) {
            let mut join_set = JoinSet::new();
            for spec in chunk {
                let spec = spec.clone();
                let shared = Arc::clone(&shared);
                let sink = Arc::clone(&self.sink);
                join_set.spawn(async move {
                    info!(job_id = %shared.job_id, step = %spec.name, "executing pipeline step");
                    let started = Instant::now();
                    match spec.executor.execute(&shared).await {
                        Ok(outcome) => {
                            metrics().step_executed(&spec.name, started.elapsed(), true);
                            sink.on_step_complete(
                                shared.job_id,
                                PartialResult::new(
                                    spec.name.clone(),
                                    outcome.output.clone(),
                                    outcome.details.clone(),
                                ),
                            )
                            .await;
                            Ok(CompletedStep {
                                step_name: spec.name.clone(),
                                outcome,
                            })
                        }
                        Err(error) => {
                            warn!(job_id = %shared.job_id, step = %spec.name, error = %error, "pipeline step failed");
                            metrics().step_executed(&spec.name, started.elapsed(), false);
                            Err(error)
                        }
                    }
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok(completed)) => context.completed.push(completed),
                    Ok(Err(error)) => {
                        join_set.abort_all();
                        return Err(error);
                    }
                    Err(join_error) => {
                        join_set.abort_all();
                        return Err(ServiceError::internal_error(format!(
                            "pipeline step task failed to join: {join_error}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
