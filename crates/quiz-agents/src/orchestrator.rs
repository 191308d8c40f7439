//! Per-task pipeline: strategy selection → answer synthesis → submission.
//!
//! ```text
//! RECEIVED ──select──▶ STRATEGY_SELECTED ──synthesize──▶ ANSWERED ──submit──▶ SUBMITTED
//!     │                       │                              │
//!     └───────────────────────┴──────────────────────────────┴──▶ FAILED (FailureReport)
//! ```
//!
//! Only synthesis retries internally (bounded repair). The stages of one task
//! run strictly in sequence; separate tasks share nothing but the work root,
//! so one `Orchestrator` can serve many tasks concurrently.

use std::sync::Arc;

use anyhow::Context;
use execution::SandboxRunner;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SolverConfig;
use crate::errors::{FailureReport, SolveError};
use crate::llm::{LanguageModel, OpenAiCompatModel};
use crate::strategy::{DecisionSource, StrategySelector};
use crate::submit::{HttpSubmitter, SubmissionReceipt, SubmitError, Submitter};
use crate::state_machine::{StateMachine, TaskState};
use crate::synthesizer::AnswerSynthesizer;
use crate::task::{Answer, AnswerOrigin, Task};

/// A computed answer and the endpoint's verdict on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submitted {
    pub answer: Answer,
    pub receipt: SubmissionReceipt,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<SolverConfig>,
    selector: StrategySelector,
    synthesizer: AnswerSynthesizer,
    submitter: Option<Arc<dyn Submitter>>,
}

impl Orchestrator {
    /// Orchestrator over an arbitrary model backend, without a submitter.
    pub fn new(config: SolverConfig, model: Arc<dyn LanguageModel>) -> Self {
        let runner = SandboxRunner::new(config.sandbox.clone());
        Self {
            selector: StrategySelector::new(Arc::clone(&model)),
            synthesizer: AnswerSynthesizer::new(model, runner, config.repair),
            submitter: None,
            config: Arc::new(config),
        }
    }

    /// Production wiring: OpenAI-compatible model, HTTP submitter when
    /// credentials are configured.
    pub fn from_config(config: SolverConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let model = OpenAiCompatModel::from_config(&config.llm)
            .context("failed to build model backend")?;
        let submitter = match &config.submit {
            Some(credentials) => Some(
                HttpSubmitter::new(credentials.clone())
                    .context("failed to build submission client")?,
            ),
            None => None,
        };

        let mut orchestrator = Self::new(config, Arc::new(model));
        if let Some(submitter) = submitter {
            orchestrator = orchestrator.with_submitter(Arc::new(submitter));
        }
        Ok(orchestrator)
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn Submitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Answer a task. Never panics on bad model output or bad programs;
    /// every failure is a [`FailureReport`].
    pub async fn solve(&self, task: &Task) -> Result<Answer, FailureReport> {
        self.solve_with_cancel(task, &CancellationToken::new()).await
    }

    /// [`solve`](Self::solve) with outer cancellation. A cancelled task
    /// reports `SANDBOX_TIMEOUT`; any running program is killed and its
    /// directory removed before this returns.
    pub async fn solve_with_cancel(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Answer, FailureReport> {
        let mut machine = StateMachine::new();
        match self.answer(task, cancel, &mut machine).await {
            Ok(answer) => {
                info!(task_id = %task.id(), summary = %machine.summary(), "task answered");
                Ok(answer)
            }
            Err(err) => Err(self.fail(task, err, &mut machine)),
        }
    }

    /// Answer a task and submit the answer to its target.
    pub async fn solve_and_submit(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Submitted, FailureReport> {
        let mut machine = StateMachine::new();
        let answer = match self.answer(task, cancel, &mut machine).await {
            Ok(answer) => answer,
            Err(err) => return Err(self.fail(task, err, &mut machine)),
        };

        let receipt = match self.submit(task, &answer, cancel).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.fail(task, err, &mut machine)),
        };

        let verdict = if receipt.correct { "correct" } else { "incorrect" };
        if let Err(illegal) = machine.advance(TaskState::Submitted, Some(verdict)) {
            return Err(self.fail(task, illegal.into(), &mut machine));
        }
        info!(task_id = %task.id(), verdict, summary = %machine.summary(), "task submitted");
        Ok(Submitted { answer, receipt })
    }

    async fn answer(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        machine: &mut StateMachine,
    ) -> Result<Answer, SolveError> {
        info!(
            task_id = %task.id(),
            artifacts = task.artifacts().len(),
            question_chars = task.question().len(),
            "task received"
        );

        let manifest = task.manifest();
        let strategy = tokio::select! {
            strategy = self.selector.select(task.question(), &manifest) => strategy?,
            _ = cancel.cancelled() => {
                return Err(SolveError::Cancelled { stage: "strategy selection" });
            }
        };
        let source = match strategy.source {
            DecisionSource::Model => "model",
            DecisionSource::Fallback => "fallback",
        };
        let reason = format!("{} ({source})", strategy.kind);
        machine.advance(TaskState::StrategySelected, Some(reason.as_str()))?;

        let answer = self.synthesizer.synthesize(&strategy, task, cancel).await?;
        if let AnswerOrigin::Code { attempts } = answer.origin {
            machine.set_attempt(attempts);
        }
        machine.advance(TaskState::Answered, None)?;
        Ok(answer)
    }

    async fn submit(
        &self,
        task: &Task,
        answer: &Answer,
        cancel: &CancellationToken,
    ) -> Result<SubmissionReceipt, SolveError> {
        let rejected = |source: SubmitError| SolveError::Submission {
            source,
            answer: Box::new(answer.clone()),
        };

        let target = task
            .target()
            .ok_or_else(|| rejected(SubmitError::NotConfigured("task has no submission target")))?;
        let submitter = self
            .submitter
            .as_ref()
            .ok_or_else(|| rejected(SubmitError::NotConfigured("no submission credentials")))?;

        tokio::select! {
            receipt = submitter.submit(target, answer) => receipt.map_err(rejected),
            _ = cancel.cancelled() => Err(SolveError::Cancelled { stage: "submission" }),
        }
    }

    fn fail(&self, task: &Task, err: SolveError, machine: &mut StateMachine) -> FailureReport {
        if let Some(attempts) = err.attempts() {
            machine.set_attempt(attempts);
        }
        if let Err(illegal) = machine.fail(&err.to_string()) {
            warn!(task_id = %task.id(), error = %illegal, "task already terminal when failing");
        }
        let report = FailureReport::from_error(task.id(), &err, machine);
        error!(
            task_id = %task.id(),
            code = %report.code,
            failed_in = %report.failed_in,
            error = %err,
            "task failed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::llm::{LlmError, MockLanguageModel};
    use crate::task::SubmissionTarget;
    use async_trait::async_trait;
    use execution::{InterpreterConfig, SandboxConfig};
    use serde_json::json;
    use std::sync::Mutex;

    fn config(root: &std::path::Path) -> SolverConfig {
        SolverConfig {
            sandbox: SandboxConfig::new(InterpreterConfig::shell(), root),
            submit: None,
            ..SolverConfig::default()
        }
    }

    fn direct_model(answer: &'static str) -> MockLanguageModel {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .returning(move |_, context| {
                if context.starts_with("You route") {
                    Ok("STRATEGY: DIRECT".into())
                } else {
                    Ok(answer.into())
                }
            });
        mock
    }

    struct RecordingSubmitter {
        seen: Mutex<Vec<(String, serde_json::Value)>>,
        correct: bool,
    }

    #[async_trait]
    impl Submitter for RecordingSubmitter {
        async fn submit(
            &self,
            target: &SubmissionTarget,
            answer: &Answer,
        ) -> Result<SubmissionReceipt, SubmitError> {
            self.seen
                .lock()
                .unwrap()
                .push((target.quiz_url.clone(), answer.value.clone()));
            Ok(SubmissionReceipt {
                correct: self.correct,
                next_url: None,
                reason: None,
            })
        }
    }

    #[tokio::test]
    async fn llm_failure_fails_from_received() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .times(1)
            .returning(|_, _| Err(LlmError::Request("connection refused".into())));
        let root = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config(root.path()), Arc::new(mock));

        let report = orch.solve(&Task::new("what is 17 * 3")).await.unwrap_err();
        assert_eq!(report.code, ErrorCode::LlmUnavailable);
        assert_eq!(report.failed_in, TaskState::Received);
        assert_eq!(report.transitions.last().unwrap().to, TaskState::Failed);
    }

    #[tokio::test]
    async fn direct_answer_reaches_answered() {
        let root = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config(root.path()), Arc::new(direct_model("51")));
        let answer = orch.solve(&Task::new("what is 17 * 3")).await.unwrap();
        assert_eq!(answer.value, json!(51));
    }

    #[tokio::test]
    async fn submit_moves_to_submitted_and_posts_value() {
        let root = tempfile::tempdir().unwrap();
        let submitter = Arc::new(RecordingSubmitter {
            seen: Mutex::new(Vec::new()),
            correct: true,
        });
        let orch = Orchestrator::new(config(root.path()), Arc::new(direct_model("51")))
            .with_submitter(submitter.clone());
        let task = Task::new("what is 17 * 3").with_target(SubmissionTarget::new(
            "https://quiz.example/submit",
            "https://quiz.example/q1",
        ));

        let submitted = orch
            .solve_and_submit(&task, &CancellationToken::new())
            .await
            .unwrap();
        assert!(submitted.receipt.correct);
        assert_eq!(
            submitter.seen.lock().unwrap().as_slice(),
            &[("https://quiz.example/q1".to_string(), json!(51))]
        );
    }

    #[tokio::test]
    async fn missing_target_is_submission_failure_with_answer_kept() {
        let root = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config(root.path()), Arc::new(direct_model("51")));

        let report = orch
            .solve_and_submit(&Task::new("what is 17 * 3"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(report.code, ErrorCode::SubmissionFailed);
        assert_eq!(report.failed_in, TaskState::Answered);
        assert_eq!(report.answer.unwrap().value, json!(51));
    }

    #[tokio::test]
    async fn pre_cancelled_task_reports_timeout() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete().returning(|_, _| Ok("STRATEGY: CODE".into()));
        let root = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config(root.path()), Arc::new(mock));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orch
            .solve_with_cancel(&Task::new("sum it"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(report.code, ErrorCode::SandboxTimeout);
    }
}
