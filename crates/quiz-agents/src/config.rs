//! Solver runtime configuration: model endpoint, sandbox, repair budget and
//! submission credentials.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Values in a TOML file passed to [`SolverConfig::from_toml_file`]
//! 2. Environment variables (`QUIZ_*`)
//! 3. Built-in defaults
//!
//! Every struct is `#[serde(default)]` and its `Default` reads the
//! environment, so a TOML file only needs the keys it overrides. An
//! `interpreter` table is the exception: it replaces the Python profile
//! wholesale.
//!
//! ```toml
//! [llm]
//! model = "openai/gpt-4o-mini"
//! temperature = 0.1
//!
//! [sandbox]
//! timeout_secs = 60
//! interpreter = { program = "sh", script_name = "solution.sh", language = "POSIX sh" }
//!
//! [repair]
//! max_repair_attempts = 1
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use execution::SandboxConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default OpenAI-compatible gateway.
const DEFAULT_LLM_BASE_URL: &str = "https://api.aipipe.io/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
/// Low temperature: answers and programs should be as repeatable as possible.
const DEFAULT_TEMPERATURE: f64 = 0.1;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LLM_MAX_RETRIES: u32 = 2;
/// One repair (or simplify) attempt after the first program.
const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 1;
/// Hard ceiling on the repair budget.
pub const MAX_REPAIR_ATTEMPTS_CAP: u32 = 3;
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;

const ENV_LLM_BASE_URL: &str = "QUIZ_LLM_BASE_URL";
const ENV_LLM_API_KEY: &str = "QUIZ_LLM_API_KEY";
const ENV_MODEL_NAME: &str = "QUIZ_MODEL_NAME";
const ENV_LLM_TEMPERATURE: &str = "QUIZ_LLM_TEMPERATURE";
const ENV_LLM_TIMEOUT_SECS: &str = "QUIZ_LLM_TIMEOUT_SECS";
const ENV_MAX_REPAIR_ATTEMPTS: &str = "QUIZ_MAX_REPAIR_ATTEMPTS";
const ENV_EMAIL: &str = "QUIZ_EMAIL";
const ENV_SECRET: &str = "QUIZ_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// OpenAI-compatible model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    /// Per-request budget, including the backend's generation time.
    pub request_timeout_secs: u64,
    /// Retries for transient HTTP failures within one `complete` call.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_LLM_BASE_URL)
                .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string()),
            api_key: env::var(ENV_LLM_API_KEY).unwrap_or_default(),
            model: env::var(ENV_MODEL_NAME).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            temperature: env_parse(ENV_LLM_TEMPERATURE).unwrap_or(DEFAULT_TEMPERATURE),
            request_timeout_secs: env_parse(ENV_LLM_TIMEOUT_SECS)
                .unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            max_retries: DEFAULT_LLM_MAX_RETRIES,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("llm.model must not be empty".to_string());
        }
        if self.base_url.trim().is_empty() {
            return Err("llm.base_url must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("llm.temperature must be in [0, 2], got {}", self.temperature));
        }
        if self.request_timeout_secs == 0 {
            return Err("llm.request_timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// How many extra programs a task may run after the first one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPolicy {
    pub max_repair_attempts: u32,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_repair_attempts: env_parse(ENV_MAX_REPAIR_ATTEMPTS)
                .unwrap_or(DEFAULT_MAX_REPAIR_ATTEMPTS),
        }
    }
}

impl RepairPolicy {
    /// Upper bound on program runs per task.
    pub fn max_attempts(&self) -> u32 {
        self.max_repair_attempts + 1
    }
}

/// Identity sent with every submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitCredentials {
    pub email: String,
    pub secret: String,
    #[serde(default = "default_submit_timeout")]
    pub timeout_secs: u64,
}

fn default_submit_timeout() -> u64 {
    DEFAULT_SUBMIT_TIMEOUT_SECS
}

impl SubmitCredentials {
    /// Credentials from `QUIZ_EMAIL` / `QUIZ_SECRET`, when both are set.
    pub fn from_env() -> Option<Self> {
        let email = env::var(ENV_EMAIL).ok().filter(|v| !v.trim().is_empty())?;
        let secret = env::var(ENV_SECRET).ok().filter(|v| !v.trim().is_empty())?;
        Some(Self {
            email,
            secret,
            timeout_secs: DEFAULT_SUBMIT_TIMEOUT_SECS,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub repair: RepairPolicy,
    pub submit: Option<SubmitCredentials>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
            repair: RepairPolicy::default(),
            submit: SubmitCredentials::from_env(),
        }
    }
}

impl SolverConfig {
    /// Build from environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.llm.validate()?;
        self.sandbox.validate()?;
        if self.repair.max_repair_attempts > MAX_REPAIR_ATTEMPTS_CAP {
            return Err(format!(
                "repair.max_repair_attempts must be <= {MAX_REPAIR_ATTEMPTS_CAP}, got {}",
                self.repair.max_repair_attempts
            ));
        }
        if let Some(submit) = &self.submit {
            if submit.email.trim().is_empty() || submit.secret.trim().is_empty() {
                return Err("submit.email and submit.secret must not be empty".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        SolverConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let cfg = SolverConfig::from_toml_str(
            r#"
[llm]
model = "local/qwen"
temperature = 0.0

[sandbox]
timeout_secs = 5

[repair]
max_repair_attempts = 2
"#,
        )
        .unwrap();
        assert_eq!(cfg.llm.model, "local/qwen");
        assert_eq!(cfg.sandbox.timeout_secs, 5);
        assert_eq!(cfg.sandbox.dir_prefix, SandboxConfig::default().dir_prefix);
        assert_eq!(cfg.repair.max_attempts(), 3);
    }

    #[test]
    fn repair_budget_is_capped() {
        let err = SolverConfig::from_toml_str("[repair]\nmax_repair_attempts = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut cfg = SolverConfig::default();
        cfg.llm.temperature = 3.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn interpreter_can_be_switched_to_shell() {
        let cfg = SolverConfig::from_toml_str(
            "[sandbox.interpreter]\nprogram = \"sh\"\nscript_name = \"solution.sh\"\nlanguage = \"POSIX sh\"\n",
        )
        .unwrap();
        assert_eq!(cfg.sandbox.interpreter.program, "sh");
        assert!(cfg.sandbox.interpreter.args.is_empty());
        assert!(cfg.sandbox.interpreter.epilogue.is_none());
    }

    #[test]
    fn empty_submit_credentials_rejected() {
        let err =
            SolverConfig::from_toml_str("[submit]\nemail = \"\"\nsecret = \"s\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SolverConfig::from_toml_file(Path::new("/nonexistent/quiz.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
