//! Answer synthesis for both strategies.
//!
//! ## Code path
//!
//! ```text
//! codegen prompt → program → SandboxRunner::run
//!   SUCCESS                      → Answer
//!   RUNTIME_ERROR | NO_RESULT    → repair prompt (program + output tail) → run again
//!   TIMEOUT                      → simplify prompt → run again
//!   TIMEOUT (cancelled)          → terminal, never retried
//! ```
//!
//! Extra runs are bounded by `RepairPolicy::max_repair_attempts`. When the
//! budget is spent the last failure is returned as a `SolveError`; a failed
//! code path never turns into a guessed answer.

use std::sync::Arc;

use execution::{ExecutionStatus, OutputArtifact, SandboxRunner};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RepairPolicy;
use crate::errors::{ErrorCode, SolveError};
use crate::llm::LanguageModel;
use crate::normalize::{normalize_text, normalize_value};
use crate::prompts;
use crate::strategy::{Strategy, StrategyKind};
use crate::task::{Answer, AnswerForm, AnswerOrigin, Task};

#[derive(Clone)]
pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    runner: SandboxRunner,
    policy: RepairPolicy,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, runner: SandboxRunner, policy: RepairPolicy) -> Self {
        Self {
            model,
            runner,
            policy,
        }
    }

    pub async fn synthesize(
        &self,
        strategy: &Strategy,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Answer, SolveError> {
        match strategy.kind {
            StrategyKind::Direct => self.answer_direct(task, cancel).await,
            StrategyKind::Code => self.answer_with_code(task, cancel).await,
        }
    }

    /// Ask for the answer itself and type the reply.
    ///
    /// Untypeable text degrades to a string answer (`AnswerForm::Unparsed`).
    pub async fn answer_direct(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Answer, SolveError> {
        let prompt = prompts::direct_prompt(task.question(), task.artifacts());
        let reply = self
            .ask(&prompt, prompts::DIRECT_PREAMBLE, cancel, "direct answer")
            .await?;

        let normalized = normalize_text(&reply);
        if normalized.form == AnswerForm::Unparsed {
            warn!(
                task_id = %task.id(),
                code = %ErrorCode::AnswerUnparseable,
                reply = %reply.chars().take(200).collect::<String>(),
                "direct answer kept as raw text"
            );
        }

        Ok(Answer {
            value: normalized.value,
            raw: reply.trim().to_string(),
            form: normalized.form,
            origin: AnswerOrigin::Direct,
            attachment: None,
        })
    }

    /// Generate, run and (within budget) repair a program.
    pub async fn answer_with_code(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Answer, SolveError> {
        let interpreter = &self.runner.config().interpreter;
        let timeout = self.runner.config().timeout();
        let request = prompts::codegen_prompt(task.question(), task.artifacts(), interpreter);
        let preamble = prompts::codegen_preamble(interpreter);

        let mut prompt = request.clone();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let reply = self.ask(&prompt, &preamble, cancel, "code generation").await?;
            let program = prompts::extract_code(&reply);
            debug!(
                task_id = %task.id(),
                attempt,
                program_chars = program.len(),
                "program generated"
            );

            let result = self
                .runner
                .run(&program, task.artifacts(), timeout, cancel)
                .await?;
            let status = result.code();
            let diagnostics = result.diagnostics(prompts::DIAGNOSTIC_TAIL_CHARS);
            info!(
                task_id = %task.id(),
                attempt,
                status = %status,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "program attempt finished"
            );

            let failure = match result.status {
                ExecutionStatus::Success { value, .. } => {
                    return Ok(answer_from_execution(value, result.output, attempt));
                }
                ExecutionStatus::Timeout { cancelled: true } => {
                    return Err(SolveError::Cancelled {
                        stage: "code execution",
                    });
                }
                ExecutionStatus::Timeout { cancelled: false } => SolveError::SandboxTimeout {
                    attempts: attempt,
                    diagnostics: diagnostics.clone(),
                },
                ExecutionStatus::RuntimeError { exit_code } => SolveError::SandboxRuntimeError {
                    attempts: attempt,
                    exit_code,
                    diagnostics: diagnostics.clone(),
                },
                ExecutionStatus::NoResultMarker => SolveError::NoResultMarker {
                    attempts: attempt,
                    diagnostics: diagnostics.clone(),
                },
            };

            if attempt > self.policy.max_repair_attempts {
                error!(
                    task_id = %task.id(),
                    attempts = attempt,
                    code = %failure.code(),
                    "repair budget spent"
                );
                return Err(failure);
            }

            prompt = if failure.code() == ErrorCode::SandboxTimeout {
                prompts::simplify_prompt(&request, &program, timeout)
            } else {
                prompts::repair_prompt(&request, &program, status, &diagnostics)
            };
            warn!(
                task_id = %task.id(),
                attempt,
                code = %failure.code(),
                "requesting repaired program"
            );
        }
    }

    /// One model call, abandoned if the task is cancelled.
    async fn ask(
        &self,
        prompt: &str,
        context: &str,
        cancel: &CancellationToken,
        stage: &'static str,
    ) -> Result<String, SolveError> {
        tokio::select! {
            reply = self.model.complete(prompt, context) => Ok(reply?),
            _ = cancel.cancelled() => Err(SolveError::Cancelled { stage }),
        }
    }
}

/// Build the answer from a successful run.
///
/// A null, empty, or file-name result with a rendered output file becomes
/// the file's data URI.
fn answer_from_execution(value: Value, output: Option<OutputArtifact>, attempts: u32) -> Answer {
    let raw = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let data_uri = output.as_ref().and_then(|o| {
        let points_at_file = match &value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty() || s.trim() == o.file_name,
            _ => false,
        };
        points_at_file.then(|| o.data_uri.clone())
    });

    let (value, form) = match data_uri {
        Some(uri) => (Value::String(uri), AnswerForm::DataUri),
        None => {
            let n = normalize_value(value);
            (n.value, n.form)
        }
    };

    Answer {
        value,
        raw,
        form,
        origin: AnswerOrigin::Code { attempts },
        attachment: output,
    }
}
