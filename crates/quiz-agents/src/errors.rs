//! Solver error taxonomy with repair classification.
//!
//! Every way a task can end without an answer is represented here. Callers
//! query `code()` / `is_repairable()` instead of matching on messages.
//!
//! ## Codes
//!
//! | Code                    | Repairable | Fatal |
//! |-------------------------|------------|-------|
//! | LLM_UNAVAILABLE         | no         | yes   |
//! | AMBIGUOUS_STRATEGY      | n/a        | no (resolved by fallback) |
//! | SANDBOX_TIMEOUT         | yes (simplify) | after budget |
//! | SANDBOX_RUNTIME_ERROR   | yes        | after budget |
//! | NO_RESULT_MARKER        | yes        | after budget |
//! | ANSWER_UNPARSEABLE      | n/a        | no (raw text answer) |
//! | SANDBOX_UNAVAILABLE     | no         | yes   |
//! | SUBMISSION_FAILED       | no         | yes   |
//! | INTERNAL                | no         | yes   |

use std::fmt;

use chrono::{DateTime, Utc};
use execution::{SandboxError, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::llm::LlmError;
use crate::state_machine::{IllegalTransition, StateMachine, TaskState, TransitionRecord};
use crate::submit::SubmitError;
use crate::task::Answer;

/// Taxonomy entry carried by a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Model call failed (network, auth, rate limit, timeout).
    LlmUnavailable,
    /// Model strategy label unusable; resolved by the fallback heuristic.
    AmbiguousStrategy,
    /// Generated program ran past its deadline, or the task was cancelled.
    SandboxTimeout,
    /// Generated program exited non-zero.
    SandboxRuntimeError,
    /// Generated program exited cleanly without a result payload.
    NoResultMarker,
    /// Direct answer text could not be typed; the raw string is used.
    AnswerUnparseable,
    /// The sandbox itself could not run (interpreter missing, workdir failure).
    SandboxUnavailable,
    /// The answer was computed but could not be submitted.
    SubmissionFailed,
    /// Orchestration bug, e.g. an illegal state transition.
    Internal,
}

impl ErrorCode {
    /// Whether one more generated program may be tried after this code.
    pub fn is_repairable(self) -> bool {
        matches!(
            self,
            Self::SandboxTimeout | Self::SandboxRuntimeError | Self::NoResultMarker
        )
    }

    /// Whether a task can never produce an answer after this code
    /// (ignoring the repair budget).
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::AmbiguousStrategy | Self::AnswerUnparseable) && !self.is_repairable()
    }

    /// Taxonomy code for a non-successful sandbox status.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::Success => None,
            StatusCode::Timeout => Some(Self::SandboxTimeout),
            StatusCode::RuntimeError => Some(Self::SandboxRuntimeError),
            StatusCode::NoResultMarker => Some(Self::NoResultMarker),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LlmUnavailable => write!(f, "LLM_UNAVAILABLE"),
            Self::AmbiguousStrategy => write!(f, "AMBIGUOUS_STRATEGY"),
            Self::SandboxTimeout => write!(f, "SANDBOX_TIMEOUT"),
            Self::SandboxRuntimeError => write!(f, "SANDBOX_RUNTIME_ERROR"),
            Self::NoResultMarker => write!(f, "NO_RESULT_MARKER"),
            Self::AnswerUnparseable => write!(f, "ANSWER_UNPARSEABLE"),
            Self::SandboxUnavailable => write!(f, "SANDBOX_UNAVAILABLE"),
            Self::SubmissionFailed => write!(f, "SUBMISSION_FAILED"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Unified error type for one task's pipeline.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The language model could not be reached or returned nothing usable.
    #[error("language model unavailable: {0}")]
    LlmUnavailable(#[from] LlmError),

    /// Last program attempt timed out.
    #[error("generated program timed out (attempt {attempts})")]
    SandboxTimeout { attempts: u32, diagnostics: String },

    /// Last program attempt exited non-zero.
    #[error(
        "generated program failed with exit code {} (attempt {attempts})",
        .exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
    )]
    SandboxRuntimeError {
        attempts: u32,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    /// Last program attempt printed no result payload.
    #[error("generated program produced no result marker (attempt {attempts})")]
    NoResultMarker { attempts: u32, diagnostics: String },

    /// The outer request was cancelled; handled as a forced timeout.
    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    /// The sandbox infrastructure failed before a program could run.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(#[from] SandboxError),

    /// Submitting the computed answer failed.
    #[error("submission failed: {source}")]
    Submission {
        #[source]
        source: SubmitError,
        answer: Box<Answer>,
    },

    /// The pipeline attempted an illegal state transition.
    #[error("internal error: {0}")]
    Internal(#[from] IllegalTransition),
}

impl SolveError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LlmUnavailable(_) => ErrorCode::LlmUnavailable,
            Self::SandboxTimeout { .. } | Self::Cancelled { .. } => ErrorCode::SandboxTimeout,
            Self::SandboxRuntimeError { .. } => ErrorCode::SandboxRuntimeError,
            Self::NoResultMarker { .. } => ErrorCode::NoResultMarker,
            Self::SandboxUnavailable(_) => ErrorCode::SandboxUnavailable,
            Self::Submission { .. } => ErrorCode::SubmissionFailed,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Captured program output tail, for execution failures.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::SandboxTimeout { diagnostics, .. }
            | Self::SandboxRuntimeError { diagnostics, .. }
            | Self::NoResultMarker { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// Program runs made before an execution failure.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::SandboxTimeout { attempts, .. }
            | Self::SandboxRuntimeError { attempts, .. }
            | Self::NoResultMarker { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The answer that was computed before the failure, if any.
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            Self::Submission { answer, .. } => Some(answer),
            _ => None,
        }
    }
}

/// Structured terminal failure handed to the request layer.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("task {task_id} failed with {code}: {message}")]
pub struct FailureReport {
    pub task_id: Uuid,
    pub code: ErrorCode,
    pub message: String,
    /// Last diagnostic text (stderr/stdout tail) for execution failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    /// State the task was in when it failed.
    pub failed_in: TaskState,
    pub transitions: Vec<TransitionRecord>,
    /// Answer computed before a submission failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    pub timestamp: DateTime<Utc>,
}

impl FailureReport {
    /// Build the report from the error and the task's transition history.
    ///
    /// `failed_in` is the state preceding the `Failed` transition.
    pub fn from_error(task_id: Uuid, error: &SolveError, machine: &StateMachine) -> Self {
        let failed_in = machine
            .transitions()
            .iter()
            .rev()
            .find(|t| t.to == TaskState::Failed)
            .map(|t| t.from)
            .unwrap_or_else(|| machine.current());
        Self {
            task_id,
            code: error.code(),
            message: error.to_string(),
            diagnostics: error.diagnostics().map(str::to_string),
            failed_in,
            transitions: machine.transitions().to_vec(),
            answer: error.answer().cloned(),
            timestamp: Utc::now(),
        }
    }
}
