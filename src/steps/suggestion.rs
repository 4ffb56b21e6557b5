//! Code suggestion step: asks the LLM collaborator for candidate codes.
//!
//! The LLM is constrained to a JSON schema so the response parses into
//! [`CodeSuggestionOutput`] directly. The step's structured details carry
//! the whole payload for the downstream validation and reporting steps.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::llm::provider::{
    CompletionRequest, JsonSchemaDefinition, LlmProvider, Message, ResponseFormat,
};
use crate::pipeline::{StepContext, StepExecutor, StepOutcome};

const SYSTEM_PROMPT: &str = "You are a clinical coding assistant. Given a free-text \
diagnosis, suggest the most appropriate ICD-10 and SNOMED CT codes. Return up to \
three ICD-10 suggestions and up to three SNOMED suggestions, ordered from most to \
least likely, with a short explanation of your reasoning. Return empty lists when \
the text contains nothing codable.";

/// Upper bound on suggestions per terminology
const MAX_SUGGESTIONS: usize = 3;

/// One suggested ICD-10 code
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Icd10Suggestion {
    /// ICD-10 code, e.g. "G40.9"
    pub code: String,
    /// Description of the code as the model understands it
    pub description: String,
}

/// One suggested SNOMED CT concept
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnomedSuggestion {
    /// SNOMED CT concept identifier
    pub code: String,
    /// Preferred term for the concept
    pub term: String,
}

/// Structured output schema for the code suggestion step
///
/// Used with OpenAI-compatible structured output (`response_format` with a
/// JSON schema), so a well-behaved model cannot return anything that fails
/// to deserialize into this shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CodeSuggestionOutput {
    /// Up to three ICD-10 suggestions, most likely first; empty when the
    /// diagnosis text contains nothing codable
    pub icd10: Vec<Icd10Suggestion>,

    /// Up to three SNOMED CT suggestions, most likely first
    pub snomed: Vec<SnomedSuggestion>,

    /// Short reasoning behind the suggestions
    pub explanation: String,
}

impl CodeSuggestionOutput {
    /// Validate that the suggestion payload is internally consistent
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - either suggestion list contains more than three entries
    /// - any suggested code is blank
    pub fn validate(&self) -> Result<(), String> {
        if self.icd10.len() > MAX_SUGGESTIONS {
            return Err(format!(
                "expected at most {} ICD-10 suggestions, got {}",
                MAX_SUGGESTIONS,
                self.icd10.len()
            ));
        }
        if self.snomed.len() > MAX_SUGGESTIONS {
            return Err(format!(
                "expected at most {} SNOMED suggestions, got {}",
                MAX_SUGGESTIONS,
                self.snomed.len()
            ));
        }
        if self.icd10.iter().any(|s| s.code.trim().is_empty()) {
            return Err("ICD-10 suggestion with a blank code".to_string());
        }
        if self.snomed.iter().any(|s| s.code.trim().is_empty()) {
            return Err("SNOMED suggestion with a blank code".to_string());
        }
        Ok(())
    }

    /// Generate the JSON schema for this structure
    ///
    /// Used for OpenAI's structured output feature
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(CodeSuggestionOutput);
        serde_json::to_value(schema).expect("Schema should be serializable")
    }
}

/// Parse and validate an LLM response body into a suggestion payload
pub fn parse_suggestions(content: &str) -> ServiceResult<CodeSuggestionOutput> {
    let output: CodeSuggestionOutput = serde_json::from_str(content).map_err(|e| {
        warn!(error = %e, response = %content, "Failed to parse code suggestions");
        ServiceError::invalid_input(format!("Failed to parse code suggestions: {e}"))
    })?;

    output.validate().map_err(|e| {
        ServiceError::invalid_input(format!("Invalid code suggestion payload: {e}"))
    })?;

    Ok(output)
}

/// Step executor backed by an [`LlmProvider`]
pub struct CodeSuggestionStep {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl CodeSuggestionStep {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: &LlmConfig) -> Self {
        Self {
            provider,
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
        }
    }

    /// Build the completion request for a diagnosis (pure function)
    fn build_request(&self, diagnosis: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(format!("Diagnosis: {diagnosis}")),
            ],
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaDefinition {
                    name: "code_suggestion".to_string(),
                    strict: Some(true),
                    schema: CodeSuggestionOutput::json_schema(),
                },
            }),
        }
    }
}

#[async_trait]
impl StepExecutor for CodeSuggestionStep {
    async fn execute(&self, context: &StepContext) -> ServiceResult<StepOutcome> {
        let request = self.build_request(&context.input);
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(ServiceError::from)?;

        info!(
            job_id = %context.job_id,
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "received code suggestions"
        );

        let content = response
            .content
            .ok_or_else(|| ServiceError::llm_error("No content in LLM response"))?;
        let suggestions = parse_suggestions(&content)?;

        let details = serde_json::to_value(&suggestions).map_err(|e| {
            ServiceError::internal_error(format!("Failed to serialize suggestions: {e}"))
        })?;
        Ok(StepOutcome::new(suggestions.explanation.clone(), Some(details)))
    }
}
