//! Outcome of one sandboxed run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged outcome of a run. Only `Success` carries an answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "status")]
pub enum ExecutionStatus {
    /// Clean exit with a parseable result payload.
    Success {
        value: Value,
        /// Whether the payload parsed as JSON (otherwise `value` is the raw text).
        structured: bool,
    },
    /// Deadline passed or the run was cancelled; output is not trusted.
    Timeout { cancelled: bool },
    /// Non-zero exit, or termination by signal (`exit_code = None`).
    RuntimeError { exit_code: Option<i32> },
    /// Clean exit without a complete marker pair.
    NoResultMarker,
}

impl ExecutionStatus {
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Success { .. } => StatusCode::Success,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::RuntimeError { .. } => StatusCode::RuntimeError,
            Self::NoResultMarker => StatusCode::NoResultMarker,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Fieldless view of [`ExecutionStatus`] for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    Timeout,
    RuntimeError,
    NoResultMarker,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::RuntimeError => write!(f, "RUNTIME_ERROR"),
            Self::NoResultMarker => write!(f, "NO_RESULT_MARKER"),
        }
    }
}

/// A rendered file read back from the working directory before removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub file_name: String,
    pub media_type: String,
    /// `data:<media_type>;base64,<payload>`
    pub data_uri: String,
    pub size_bytes: u64,
}

/// Immutable record of one `SandboxRunner::run` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(flatten)]
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub output: Option<OutputArtifact>,
    /// Leading output was dropped to stay within the capture limit.
    #[serde(default)]
    pub truncated: bool,
    /// Path of the (already removed) working directory.
    pub workdir: PathBuf,
}

impl ExecutionResult {
    pub fn code(&self) -> StatusCode {
        self.status.code()
    }

    /// Parsed answer value, present only for `SUCCESS`.
    pub fn value(&self) -> Option<&Value> {
        match &self.status {
            ExecutionStatus::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Tail of stderr and stdout, for repair prompts and failure reports.
    pub fn diagnostics(&self, max_chars: usize) -> String {
        let mut out = String::new();
        if !self.stderr.trim().is_empty() {
            out.push_str("STDERR:\n");
            out.push_str(&tail(&self.stderr, max_chars));
        }
        if !self.stdout.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("STDOUT:\n");
            out.push_str(&tail(&self.stdout, max_chars));
        }
        if out.is_empty() {
            out.push_str("(no output)");
        }
        out
    }
}

/// Last `max_chars` characters of `text`, on a char boundary.
pub fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim_end();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped = count - max_chars;
    let kept: String = text.chars().skip(skipped).collect();
    format!("...[{skipped} chars truncated]\n{kept}")
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
