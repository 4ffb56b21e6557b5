//! MedCoder - Medical Diagnosis Coding Service
//!
//! An asynchronous service that turns free-text diagnoses into validated
//! terminology codes through a staged processing pipeline.
//!
//! # Overview
//!
//! This crate provides a complete diagnosis coding service, including:
//! - Thread-safe task registry with partial result streaming
//! - Fixed-sequence pipeline runner with conditional and parallel steps
//! - Terminology reference table with code and description validation
//! - LLM provider integration for code suggestion
//! - HTTP API for job submission and status polling
//!
//! # Quick Start
//!
//! ```rust
//! use medcoder::terminology::{TerminologyRecord, TerminologyStore};
//!
//! let store = TerminologyStore::from_records(vec![TerminologyRecord {
//!     code: "G40.9".to_string(),
//!     description: "Epilepsy, unspecified".to_string(),
//!     chapter: "VI".to_string(),
//!     domain: "Diseases of the nervous system".to_string(),
//!     url: "https://icd.who.int/browse10/2019/en#/G40.9".to_string(),
//! }])
//! .unwrap();
//!
//! // Exact lookup succeeds
//! let validation = store.validate_code("G40.9", None).unwrap();
//! assert!(validation.valid);
//!
//! // A miss returns alternatives sharing the code's prefix
//! let miss = store.validate_code("G40.1", None).unwrap();
//! assert!(!miss.valid);
//! assert_eq!(miss.alternatives.len(), 1);
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod steps;
pub mod telemetry;
pub mod terminology;
pub mod testing;

// Re-export the primary service surface
pub use api::ApiServer;
pub use config::*;
pub use error::{ServiceError, ServiceResult};
pub use pipeline::{PipelineRunner, SessionMode, StepSpec};
pub use registry::{JobId, JobSnapshot, JobStatus, PartialResult, TaskRegistry};
pub use service::CodingService;
pub use telemetry::{RunOutcome, TelemetrySink};
pub use terminology::{CodeValidation, DescriptionMatch, TerminologyRecord, TerminologyStore};
