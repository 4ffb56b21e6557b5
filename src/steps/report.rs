//! Reporting step: renders the final coding report.
//!
//! Pure formatting over the prior steps' structured details; it performs
//! no lookups and calls no collaborators. The rendered text becomes the
//! job's final result.

use async_trait::async_trait;

use crate::error::{ServiceError, ServiceResult};
use crate::pipeline::{StepContext, StepExecutor, StepOutcome};
use crate::steps::suggestion::CodeSuggestionOutput;
use crate::steps::validation::{CodeCheck, ValidationReport};
use crate::steps::{CODE_SUGGESTION_STEP, VALIDATION_STEP};

/// Step executor producing the human-readable coding report
#[derive(Debug, Default)]
pub struct ReportStep;

impl ReportStep {
    pub fn new() -> Self {
        Self
    }

    fn render(
        diagnosis: &str,
        suggestions: &CodeSuggestionOutput,
        validation: Option<&ValidationReport>,
    ) -> String {
        let mut report = format!("Coding report for: {diagnosis}\n\nICD-10 suggestions:\n");

        for suggestion in &suggestions.icd10 {
            let annotation = match validation {
                Some(validation) => validation
                    .checks
                    .iter()
                    .find(|check| check.code == suggestion.code)
                    .map(Self::annotate_check)
                    .unwrap_or_else(|| "not checked".to_string()),
                None => "not checked".to_string(),
            };
            report.push_str(&format!(
                "  {} - {} ({})\n",
                suggestion.code, suggestion.description, annotation
            ));
        }

        report.push_str("\nSNOMED CT suggestions:\n");
        for suggestion in &suggestions.snomed {
            report.push_str(&format!("  {} - {}\n", suggestion.code, suggestion.term));
        }

        report.push_str(&format!("\nExplanation: {}\n", suggestions.explanation));
        report
    }

    fn annotate_check(check: &CodeCheck) -> String {
        if !check.valid {
            if check.alternatives.is_empty() {
                return "not in reference table; no similar codes".to_string();
            }
            let codes: Vec<&str> = check.alternatives.iter().map(|a| a.code.as_str()).collect();
            return format!("not in reference table; similar codes: {}", codes.join(", "));
        }

        match &check.description_match {
            Some(description_match) if description_match.matches => {
                format!("verified: {}", description_match.note)
            }
            Some(description_match) => format!(
                "verified: {}; official: {}",
                description_match.note,
                check.official_description.as_deref().unwrap_or("unknown")
            ),
            None => "verified".to_string(),
        }
    }
}

#[async_trait]
impl StepExecutor for ReportStep {
    async fn execute(&self, context: &StepContext) -> ServiceResult<StepOutcome> {
        let suggestion_details = context
            .outcome_of(CODE_SUGGESTION_STEP)
            .and_then(|outcome| outcome.details.clone());
        let suggestions: CodeSuggestionOutput = match suggestion_details {
            Some(details) => serde_json::from_value(details).map_err(|e| {
                ServiceError::internal_error(format!(
                    "reporting step received malformed suggestion details: {e}"
                ))
            })?,
            None => {
                return Ok(StepOutcome::new(
                    format!("No code suggestions were produced for: {}", context.input),
                    None,
                ));
            }
        };

        let validation: Option<ValidationReport> = match context
            .outcome_of(VALIDATION_STEP)
            .and_then(|outcome| outcome.details.clone())
        {
            Some(details) => Some(serde_json::from_value(details).map_err(|e| {
                ServiceError::internal_error(format!(
                    "reporting step received malformed validation details: {e}"
                ))
            })?),
            None => None,
        };

        let report = Self::render(&context.input, &suggestions, validation.as_ref());
        Ok(StepOutcome::new(report, None))
    }
}
