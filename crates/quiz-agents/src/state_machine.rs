//! Task state machine: explicit states and legal transition guards.
//!
//! Every task starts at `Received`. A `solve` run ends at `Answered` or
//! `Failed`; a `solve_and_submit` run ends at `Submitted` or `Failed`.
//! Each call to `advance()` validates the edge and appends it to the
//! transition log, which is copied into failure reports.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task accepted, nothing decided yet.
    Received,
    /// DIRECT or CODE chosen.
    StrategySelected,
    /// A normalized answer exists.
    Answered,
    /// The answer was accepted by the submission endpoint. Terminal.
    Submitted,
    /// Terminal failure; the report carries the error code.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Submitted | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "RECEIVED"),
            Self::StrategySelected => write!(f, "STRATEGY_SELECTED"),
            Self::Answered => write!(f, "ANSWERED"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// ```text
/// Received → StrategySelected | Failed
/// StrategySelected → Answered | Failed
/// Answered → Submitted | Failed
/// ```
fn is_legal_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Received, StrategySelected) | (StrategySelected, Answered) | (Answered, Submitted)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    /// Execution attempts made so far (0 before any program ran).
    pub attempt: u32,
    /// Milliseconds since the task was received.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: TaskState,
    pub to: TaskState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal task state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-task state machine with a full transition log.
#[derive(Debug)]
pub struct StateMachine {
    current: TaskState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: TaskState::Received,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TaskState {
        self.current
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn advance(
        &mut self,
        to: TaskState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "task state transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Failed`; legal from every non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TaskState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// e.g. `RECEIVED -> ANSWERED (12ms) [STRATEGY_SELECTED -> ANSWERED]`
    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} -> {} ({}ms)",
            TaskState::Received,
            self.current,
            self.created_at.elapsed().as_millis()
        );
        if !path.is_empty() {
            out.push_str(&format!(" [{}]", path.join(" -> ")));
        }
        out
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
