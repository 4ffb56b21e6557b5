//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the coding
//! pipeline without external dependencies like LLM providers.

pub mod mocks;

pub use mocks::*;
