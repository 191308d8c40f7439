//! Sandboxed execution of generated analysis programs.
//!
//! This crate is the deterministic half of the quiz solver: it never talks
//! to a language model. It provides:
//!
//! - [`SandboxRunner`]: runs one program in a fresh, uniquely named working
//!   directory, enforces a wall-clock timeout, and deletes the directory
//!   before returning on every exit path.
//! - [`protocol`]: the marker-delimited result contract used to pull one
//!   answer value out of a program's standard output.
//! - [`InputArtifact`]: named input files materialized into the working
//!   directory.
//!
//! # Execution lifecycle
//!
//! ```text
//! SandboxRunner::run(program, artifacts, timeout, cancel)
//!   → ScopedWorkDir::create        : unique subtree under work_root
//!   → materialize artifacts        : one file per artifact
//!   → spawn interpreter            : cleared env, cwd = workdir
//!   → race exit / timeout / cancel
//!   → classify status              : SUCCESS | TIMEOUT | RUNTIME_ERROR | NO_RESULT_MARKER
//!   → capture output.* artifact    : clean exits only
//!   → ScopedWorkDir::close         : before the result is returned
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod protocol;
pub mod result;
pub mod runner;
pub mod workspace;

pub use artifact::{ArtifactKind, InputArtifact, ManifestEntry};
pub use config::{InterpreterConfig, SandboxConfig};
pub use error::SandboxError;
pub use result::{ExecutionResult, ExecutionStatus, OutputArtifact, StatusCode};
pub use runner::SandboxRunner;
pub use workspace::ScopedWorkDir;
