//! Per-run working directories with guaranteed removal.
//!
//! Every execution attempt gets its own uniquely named subtree under the
//! configured work root; directories are never reused across attempts or
//! tasks, so concurrent runs need no locking. The directory is removed by
//! [`ScopedWorkDir::close`] on the normal path and by `Drop` when the owning
//! future is cancelled or panics.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::artifact::{validate_names, InputArtifact};
use crate::error::SandboxError;

#[derive(Debug)]
pub struct ScopedWorkDir {
    dir: TempDir,
}

impl ScopedWorkDir {
    /// Create a fresh directory `<root>/<prefix><random>`.
    pub fn create(root: &Path, prefix: &str) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(root).map_err(|source| SandboxError::WorkDir {
            root: root.to_path_buf(),
            source,
        })?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(|source| SandboxError::WorkDir {
                root: root.to_path_buf(),
                source,
            })?;
        debug!(path = %dir.path().display(), "working directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write each artifact as a plain file in the directory.
    ///
    /// Names are validated as a set first so a bad artifact leaves the
    /// directory untouched.
    pub async fn materialize(
        &self,
        artifacts: &[InputArtifact],
        script_name: &str,
    ) -> Result<(), SandboxError> {
        let names = validate_names(artifacts, script_name)?;
        for (artifact, file_name) in artifacts.iter().zip(names) {
            tokio::fs::write(self.path().join(&file_name), artifact.content())
                .await
                .map_err(|source| SandboxError::Materialize {
                    name: file_name.clone(),
                    source,
                })?;
            debug!(
                file = %file_name,
                bytes = artifact.content().len(),
                kind = %artifact.kind(),
                "artifact materialized"
            );
        }
        Ok(())
    }

    /// Write the program source.
    pub async fn write_program(
        &self,
        script_name: &str,
        source: &str,
    ) -> Result<PathBuf, SandboxError> {
        let path = self.path().join(script_name);
        tokio::fs::write(&path, source)
            .await
            .map_err(|source| SandboxError::Materialize {
                name: script_name.to_string(),
                source,
            })?;
        Ok(path)
    }

    /// Remove the directory and everything in it.
    pub fn close(self) -> Result<(), SandboxError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|source| {
            warn!(path = %path.display(), error = %source, "working directory cleanup failed");
            SandboxError::Cleanup { path: path.clone(), source }
        })?;
        debug!(path = %path.display(), "working directory removed");
        Ok(())
    }
}
