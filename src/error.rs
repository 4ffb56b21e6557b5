//! Service-wide error types for the diagnosis coding pipeline.
//!
//! Step failures are recorded on the job verbatim; anything rendered to
//! logs or HTTP clients goes through [`ServiceError::to_error_message`],
//! which redacts secrets and bounds message length.

use thiserror::Error;

/// Main error type for coding service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Step '{step}' failed: {message}")]
    StepExecutionFailed { step: String, message: String },

    #[error("LLM provider error: {message}")]
    LlmError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Terminology error: {0}")]
    TerminologyError(#[from] crate::terminology::TerminologyError),
}

impl ServiceError {
    /// Render a client-safe message with secrets redacted
    pub fn to_error_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create step execution error
    pub fn step_execution_failed<S: Into<String>, M: Into<String>>(step: S, message: M) -> Self {
        Self::StepExecutionFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create LLM error
    pub fn llm_error<S: Into<String>>(message: S) -> Self {
        Self::LlmError {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Sanitize error messages to prevent sensitive data leakage
fn sanitize_error_message(message: &str) -> String {
    // Remove potential sensitive patterns
    let mut sanitized = message.to_string();

    // Remove common secret patterns
    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    // Remove potential file paths that might contain sensitive info
    sanitized =
        regex::Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
            .unwrap()
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}

/// Result type for coding service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_constructor() {
        let error = ServiceError::invalid_input("missing field");
        assert!(matches!(error, ServiceError::InvalidInput { .. }));
        assert_eq!(error.to_string(), "Invalid input: missing field");
    }

    #[test]
    fn test_step_execution_failed_constructor() {
        let error = ServiceError::step_execution_failed("code_suggestion", "provider timeout");
        assert!(matches!(error, ServiceError::StepExecutionFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Step 'code_suggestion' failed: provider timeout"
        );
    }

    #[test]
    fn test_llm_error_constructor() {
        let error = ServiceError::llm_error("model timeout");
        assert!(matches!(error, ServiceError::LlmError { .. }));
        assert_eq!(error.to_string(), "LLM provider error: model timeout");
    }

    #[test]
    fn test_internal_error_constructor() {
        let error = ServiceError::internal_error("unexpected state");
        assert!(matches!(error, ServiceError::InternalError { .. }));
        assert_eq!(error.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_error_message_sanitization() {
        let error =
            ServiceError::internal_error("Failed to authenticate: password=secret123 token=abc456");

        let message = error.to_error_message();

        assert!(!message.contains("secret123"));
        assert!(!message.contains("abc456"));
        assert!(message.contains("password=***"));
        assert!(message.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let long_message = "x".repeat(600);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "Auth failed: password=pass1 api_key=key123 secret=hidden token=tok456";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("key123"));
        assert!(!sanitized.contains("hidden"));
        assert!(!sanitized.contains("tok456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("key=***"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let message = "PASSWORD=secret123 Token=abc Key=xyz";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_with_colons() {
        let message = "password: secret123 token: abc456";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        let sanitized = sanitize_error_message("");
        assert_eq!(sanitized, "");
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let message = "x".repeat(500);
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }
}
