//! Concrete pipeline steps for the diagnosis coding workflow.
//!
//! The standard pipeline runs three steps in order: `code_suggestion`
//! asks the LLM collaborator for candidate codes, `validation` checks
//! every suggested ICD-10 code against the reference table, and
//! `reporting` renders the final human-readable report. Step wiring
//! (order, predicates, parallelism) lives in the service layer; each
//! module here only implements one [`StepExecutor`](crate::pipeline::StepExecutor).

pub mod report;
pub mod suggestion;
pub mod validation;

pub use report::ReportStep;
pub use suggestion::{CodeSuggestionOutput, CodeSuggestionStep, Icd10Suggestion, SnomedSuggestion};
pub use validation::{has_icd10_suggestions, CodeCheck, ValidationReport, ValidationStep};

/// Canonical step names, shared by the pipeline wiring and the report
/// step's context lookups
pub const CODE_SUGGESTION_STEP: &str = "code_suggestion";
pub const VALIDATION_STEP: &str = "validation";
pub const REPORTING_STEP: &str = "reporting";
