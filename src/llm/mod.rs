//! LLM provider abstraction layer for the coding pipeline
//!
//! This module provides a provider-agnostic interface for LLM interactions.
//! Pipeline steps depend only on the [`LlmProvider`] trait, so tests swap
//! in scripted providers without touching any network code.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
