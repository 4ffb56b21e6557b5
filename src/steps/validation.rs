//! Validation step: checks suggested ICD-10 codes against the reference
//! table.
//!
//! Runs conditionally: the step is wired with [`has_icd10_suggestions`] as
//! its predicate, so a run whose suggestion step produced no ICD-10 codes
//! skips validation entirely.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::pipeline::{StepContext, StepExecutor, StepOutcome};
use crate::steps::suggestion::CodeSuggestionOutput;
use crate::steps::CODE_SUGGESTION_STEP;
use crate::terminology::{DescriptionMatch, TerminologyRecord, TerminologyStore};

/// Predicate for wiring the validation step: true when the prior step's
/// details carry at least one ICD-10 suggestion
pub fn has_icd10_suggestions(details: Option<&serde_json::Value>) -> bool {
    details
        .and_then(|d| d.get("icd10"))
        .and_then(|v| v.as_array())
        .map(|codes| !codes.is_empty())
        .unwrap_or(false)
}

/// Result of checking one suggested code against the reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCheck {
    pub code: String,
    pub suggested_description: String,
    /// Whether the code exists in the reference table
    pub valid: bool,
    /// Official description when the code was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub official_description: Option<String>,
    /// Comparison of the suggested description against the official one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_match: Option<DescriptionMatch>,
    /// On a miss, reference records sharing the code's prefix
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<TerminologyRecord>,
}

/// Structured details produced by the validation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<CodeCheck>,
    pub valid_count: usize,
    pub total: usize,
}

/// Step executor backed by the terminology reference table
pub struct ValidationStep {
    store: Arc<TerminologyStore>,
}

impl ValidationStep {
    pub fn new(store: Arc<TerminologyStore>) -> Self {
        Self { store }
    }

    fn check_code(
        &self,
        code: &str,
        suggested_description: &str,
    ) -> ServiceResult<CodeCheck> {
        let validation = self.store.validate_code(code, Some(suggested_description))?;
        Ok(CodeCheck {
            code: code.to_string(),
            suggested_description: suggested_description.to_string(),
            valid: validation.valid,
            official_description: validation.record.map(|record| record.description),
            description_match: validation.description_match,
            alternatives: validation.alternatives,
        })
    }
}

#[async_trait]
impl StepExecutor for ValidationStep {
    async fn execute(&self, context: &StepContext) -> ServiceResult<StepOutcome> {
        let details = context
            .outcome_of(CODE_SUGGESTION_STEP)
            .and_then(|outcome| outcome.details.clone())
            .ok_or_else(|| {
                ServiceError::internal_error(
                    "validation step ran without code suggestion details",
                )
            })?;
        let suggestions: CodeSuggestionOutput =
            serde_json::from_value(details).map_err(|e| {
                ServiceError::internal_error(format!(
                    "validation step received malformed suggestion details: {e}"
                ))
            })?;

        let mut checks = Vec::with_capacity(suggestions.icd10.len());
        for suggestion in &suggestions.icd10 {
            let check = self.check_code(&suggestion.code, &suggestion.description)?;
            debug!(
                job_id = %context.job_id,
                code = %check.code,
                valid = check.valid,
                "checked suggested code"
            );
            checks.push(check);
        }

        let report = ValidationReport {
            valid_count: checks.iter().filter(|c| c.valid).count(),
            total: checks.len(),
            checks,
        };
        let output = format!(
            "Validated {} of {} suggested codes",
            report.valid_count, report.total
        );
        let details = serde_json::to_value(&report).map_err(|e| {
            ServiceError::internal_error(format!("Failed to serialize validation report: {e}"))
        })?;
        Ok(StepOutcome::new(output, Some(details)))
    }
}
