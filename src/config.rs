//! Configuration loading and validation.
//!
//! Configuration is read from a TOML file (`medcoder.toml` in the working
//! directory or under `config/`), with every field carrying a sensible
//! default so the service can start from an empty file. API keys are never
//! stored in the file; only the name of the environment variable that
//! holds them is.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pipeline::SessionMode;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable '{var}' is not set")]
    MissingEnvVar { var: String },
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub http: HttpConfig,
    pub pipeline: PipelineConfig,
    pub terminology: TerminologyConfig,
    pub llm: LlmConfig,
    pub telemetry: TelemetryConfig,
}

/// Service identity and concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Service name used in logs and telemetry tags (must match [a-zA-Z0-9._-]+)
    pub name: String,
    /// Maximum number of coding jobs running at once
    pub max_concurrent_jobs: usize,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Pipeline execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on sibling steps executed concurrently in one batch
    pub parallel_batch_size: usize,
    /// Telemetry session handling for each run
    pub session_mode: SessionMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_batch_size: default_parallel_batch_size(),
            session_mode: SessionMode::None,
        }
    }
}

/// Terminology reference data settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminologyConfig {
    /// Path to the ICD-10 reference CSV
    pub csv_path: PathBuf,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            csv_path: default_terminology_csv_path(),
        }
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "openai")
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// API base URL, overridable for proxies and tests
    pub base_url: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Sampling temperature (0.0 to 2.0)
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            timeout_seconds: default_llm_timeout_seconds(),
            max_retries: default_llm_max_retries(),
        }
    }
}

/// Telemetry session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// When false a no-op sink is installed regardless of session_mode
    pub enabled: bool,
    /// Tags attached to every telemetry session
    pub tags: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tags: default_telemetry_tags(),
        }
    }
}

fn default_service_name() -> String {
    "medcoder".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    32
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_parallel_batch_size() -> usize {
    4
}

fn default_terminology_csv_path() -> PathBuf {
    PathBuf::from("data/icd10_codes.csv")
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_max_tokens() -> u32 {
    2048
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_llm_timeout_seconds() -> u64 {
    60
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_telemetry_tags() -> Vec<String> {
    vec!["medcoder".to_string()]
}

/// Candidate config file locations, in search order
const CONFIG_SEARCH_PATHS: &[&str] = &["medcoder.toml", "config/medcoder.toml"];

impl ServiceConfig {
    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default search paths, falling back to
    /// built-in defaults when no file is present
    pub fn load() -> Result<Self, ConfigError> {
        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "service.name cannot be empty".to_string(),
            });
        }

        if !self
            .service
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "service.name '{}' contains invalid characters (allowed: a-z A-Z 0-9 . _ -)",
                    self.service.name
                ),
            });
        }

        if self.service.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationError {
                message: "service.max_concurrent_jobs must be at least 1".to_string(),
            });
        }

        if self.http.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "http.port cannot be 0".to_string(),
            });
        }

        if self.pipeline.parallel_batch_size == 0 {
            return Err(ConfigError::ValidationError {
                message: "pipeline.parallel_batch_size must be at least 1".to_string(),
            });
        }

        if self.terminology.csv_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "terminology.csv_path cannot be empty".to_string(),
            });
        }

        url::Url::parse(&self.llm.base_url).map_err(|e| ConfigError::ValidationError {
            message: format!(
                "llm.base_url '{}' is not a valid URL: {}",
                self.llm.base_url, e
            ),
        })?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "llm.temperature {} is out of range (expected 0.0 to 2.0)",
                    self.llm.temperature
                ),
            });
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ValidationError {
                message: "llm.max_tokens must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve the LLM API key from the configured environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.llm.api_key_env).map_err(|_| ConfigError::MissingEnvVar {
            var: self.llm.api_key_env.clone(),
        })
    }
}

/// Build a configuration suitable for tests
#[cfg(test)]
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.service.name = "medcoder-test".to_string();
    config.service.max_concurrent_jobs = 4;
    config.http.port = 18000;
    config.llm.max_retries = 0;
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.service.name, "medcoder");
        assert_eq!(config.http.port, 8000);
        assert_eq!(config.pipeline.session_mode, SessionMode::None);
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "coder-staging"
max_concurrent_jobs = 8

[http]
port = 9000

[pipeline]
session_mode = "per_run"

[llm]
model = "gpt-4o"
"#
        )
        .unwrap();

        let config = ServiceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.service.name, "coder-staging");
        assert_eq!(config.service.max_concurrent_jobs, 8);
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.pipeline.session_mode, SessionMode::PerRun);
        assert_eq!(config.llm.model, "gpt-4o");
        // Untouched sections keep their defaults
        assert_eq!(config.http.bind_address, "0.0.0.0");
        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ServiceConfig::load_from_file(Path::new("/nonexistent/medcoder.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not toml [[[").unwrap();

        let result = ServiceConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = ServiceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.service.name, "medcoder");
        assert_eq!(
            config.terminology.csv_path,
            PathBuf::from("data/icd10_codes.csv")
        );
    }

    #[test]
    fn test_invalid_service_name_rejected() {
        let mut config = ServiceConfig::default();
        config.service.name = "bad name!".to_string();
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let mut config = ServiceConfig::default();
        config.service.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = ServiceConfig::default();
        config.http.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = ServiceConfig::default();
        config.pipeline.parallel_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut config = ServiceConfig::default();
        config.llm.base_url = "not a url".to_string();
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        let mut config = ServiceConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_session_mode_rejected_at_parse() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nsession_mode = \"always\"").unwrap();

        let result = ServiceConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_get_llm_api_key() {
        let mut config = ServiceConfig::default();
        config.llm.api_key_env = "MEDCODER_TEST_API_KEY_UNSET".to_string();
        assert!(matches!(
            config.get_llm_api_key(),
            Err(ConfigError::MissingEnvVar { .. })
        ));

        config.llm.api_key_env = "MEDCODER_TEST_API_KEY_SET".to_string();
        std::env::set_var("MEDCODER_TEST_API_KEY_SET", "sk-test");
        assert_eq!(config.get_llm_api_key().unwrap(), "sk-test");
        std::env::remove_var("MEDCODER_TEST_API_KEY_SET");
    }

    #[test]
    fn test_config_roundtrip_through_toml() {
        let config = test_config();
        let serialized = toml::to_string(&config).unwrap();
        let restored: ServiceConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(restored.service.name, config.service.name);
        assert_eq!(restored.http.port, config.http.port);
    }
}
