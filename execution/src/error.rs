//! Infrastructure failures of the sandbox itself.
//!
//! A generated program that crashes, hangs, or prints nothing useful is NOT
//! an error here: those outcomes are reported through
//! [`ExecutionStatus`](crate::result::ExecutionStatus). `SandboxError` covers
//! the cases where no meaningful execution could take place at all.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The unique working directory could not be created.
    #[error("failed to create working directory under {root}: {source}")]
    WorkDir {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact name cannot be materialized as a plain file.
    #[error("invalid artifact `{name}`: {reason}")]
    InvalidArtifact { name: String, reason: String },

    /// Writing an artifact or the program file failed.
    #[error("failed to materialize `{name}`: {source}")]
    Materialize {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The interpreter process could not be started.
    #[error("failed to spawn interpreter `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child process failed.
    #[error("failed to wait on interpreter: {0}")]
    Wait(#[source] std::io::Error),

    /// The working directory could not be removed.
    #[error("failed to remove working directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub fn invalid_artifact(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArtifact {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
