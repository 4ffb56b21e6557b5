//! Mock implementations for testing
//!
//! Provides mock LlmProvider, StepExecutor, StepSink, and TelemetrySink
//! implementations to enable comprehensive testing without external
//! dependencies.

use crate::error::{ServiceError, ServiceResult};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::pipeline::{StepContext, StepExecutor, StepOutcome, StepSink};
use crate::registry::{JobId, PartialResult};
use crate::telemetry::{RunOutcome, TelemetrySink};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub should_fail: bool,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            should_fail: false,
        }
    }

    pub fn with_failure() -> Self {
        Self {
            responses: vec![],
            current_response: Arc::new(Mutex::new(0)),
            should_fail: true,
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Scripted step executor for pipeline tests
#[derive(Debug)]
pub struct MockStepExecutor {
    name: String,
    output: String,
    details: Option<Value>,
    fail_message: Option<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<usize>>,
}

impl MockStepExecutor {
    /// Executor that succeeds with the given primary output
    pub fn succeeding(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            details: None,
            fail_message: None,
            delay: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Executor that always fails with the given message
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: String::new(),
            details: None,
            fail_message: Some(message.into()),
            delay: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Attach structured details to the successful outcome
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sleep before producing the outcome, for concurrency tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times execute was invoked
    pub async fn call_count(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl StepExecutor for MockStepExecutor {
    async fn execute(&self, _context: &StepContext) -> ServiceResult<StepOutcome> {
        {
            let mut calls = self.calls.lock().await;
            *calls += 1;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.fail_message {
            Some(message) => Err(ServiceError::step_execution_failed(&self.name, message)),
            None => Ok(StepOutcome::new(self.output.clone(), self.details.clone())),
        }
    }
}

/// Step sink that records every partial it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    partials: Arc<Mutex<Vec<(JobId, PartialResult)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<(JobId, PartialResult)> {
        self.partials.lock().await.clone()
    }
}

#[async_trait]
impl StepSink for RecordingSink {
    async fn on_step_complete(&self, job_id: JobId, partial: PartialResult) {
        self.partials.lock().await.push((job_id, partial));
    }
}

/// One observed telemetry lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Opened(JobId),
    Closed(JobId, RunOutcome),
}

/// Telemetry sink that records session lifecycle events
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    async fn open_session(&self, job_id: JobId) {
        self.events.lock().await.push(TelemetryEvent::Opened(job_id));
    }

    async fn close_session(&self, job_id: JobId, outcome: RunOutcome) {
        self.events
            .lock()
            .await
            .push(TelemetryEvent::Closed(job_id, outcome));
    }
}
