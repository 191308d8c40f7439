//! Quiz solving agents
//!
//! Turns one question (plus optional attached files) into one typed answer:
//!
//! - [`strategy`]: asks the model whether the question is answered directly
//!   or by executing a generated program, with a keyword fallback when the
//!   reply is unusable.
//! - [`synthesizer`]: produces the answer along the chosen path, with one
//!   bounded repair after a failed program run.
//! - [`orchestrator`]: drives the per-task state machine and turns every
//!   failure into a [`FailureReport`].
//! - [`submit`]: posts the answer to the quiz endpoint.
//!
//! Program execution itself lives in the `execution` crate.
//!
//! # Usage
//!
//! ```bash
//! # Answer a question about an attached file
//! quiz-agents solve --question "What is the sum of the amount column?" --file data.csv
//!
//! # Run a program in the sandbox directly
//! quiz-agents exec --script solve.py --file data.csv
//! ```

pub mod config;
pub mod errors;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;
pub mod state_machine;
pub mod strategy;
pub mod submit;
pub mod synthesizer;
pub mod task;

pub use config::{LlmConfig, RepairPolicy, SolverConfig, SubmitCredentials};
pub use errors::{ErrorCode, FailureReport, SolveError};
pub use llm::{LanguageModel, LlmError, OpenAiCompatModel};
pub use orchestrator::{Orchestrator, Submitted};
pub use state_machine::{StateMachine, TaskState, TransitionRecord};
pub use strategy::{Strategy, StrategyKind};
pub use submit::{HttpSubmitter, SubmissionReceipt, SubmitError, Submitter};
pub use task::{Answer, AnswerForm, AnswerOrigin, SubmissionTarget, Task};
