//! Sandbox runner: one generated program, one fresh directory, one deadline.
//!
//! Isolation is filesystem scoping plus a process timeout: the program runs
//! with its working directory set to a unique subtree, a cleared
//! environment, and no stdin. There is no claim of OS-level confinement
//! beyond that.
//!
//! On Unix the interpreter leads its own process group, and the whole group
//! is killed when the run ends, however it ends. Anything the program
//! started in the background goes with it.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::InputArtifact;
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::protocol;
use crate::result::{ExecutionResult, ExecutionStatus, OutputArtifact};
use crate::workspace::ScopedWorkDir;

/// Variables copied from the parent environment when present.
const INHERITED_ENV: &[&str] = &[
    "PATH",
    "LANG",
    "LC_ALL",
    "PYTHONPATH",
    "VIRTUAL_ENV",
    "SYSTEMROOT",
];

/// How long to wait for stdout/stderr to drain after the process is gone.
/// A descendant that escaped the group kill can hold the pipes open.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Extensions probed for `<output_stem>.<ext>`, in priority order.
const OUTPUT_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("svg", "image/svg+xml"),
    ("gif", "image/gif"),
    ("csv", "text/csv"),
    ("json", "application/json"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
];

/// How the child stopped.
enum Exit {
    Finished(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Executes generated programs against input artifacts.
///
/// Cheap to clone; holds configuration only. Every call to [`run`](Self::run)
/// is independent, so one runner can serve many concurrent tasks.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `program` against `artifacts` with a wall-clock `timeout`.
    ///
    /// The working directory is removed before this returns, on every path.
    /// If the returned future is dropped mid-run, the child's process group
    /// is killed and the directory is removed by `Drop`.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are errors (directory creation, invalid
    /// artifact names, spawn failure, cleanup failure). Program failures are
    /// reported through [`ExecutionStatus`].
    pub async fn run(
        &self,
        program: &str,
        artifacts: &[InputArtifact],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let workdir = ScopedWorkDir::create(&self.config.work_root, &self.config.dir_prefix)?;
        let outcome = self.run_in(&workdir, program, artifacts, timeout, cancel).await;
        let cleanup = workdir.close();

        let result = outcome?;
        cleanup?;

        info!(
            status = %result.code(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            output = result.output.as_ref().map(|o| o.file_name.as_str()),
            "sandbox run finished"
        );
        Ok(result)
    }

    /// Run with the configured default timeout.
    pub async fn run_default(
        &self,
        program: &str,
        artifacts: &[InputArtifact],
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        self.run(program, artifacts, self.config.timeout(), cancel).await
    }

    async fn run_in(
        &self,
        workdir: &ScopedWorkDir,
        program: &str,
        artifacts: &[InputArtifact],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let interpreter = &self.config.interpreter;
        workdir.materialize(artifacts, &interpreter.script_name).await?;
        workdir
            .write_program(&interpreter.script_name, &interpreter.render(program))
            .await?;

        let mut cmd = Command::new(&interpreter.program);
        cmd.args(&interpreter.args)
            .arg(&interpreter.script_name)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        apply_env(&mut cmd, workdir.path());

        debug!(
            program = %interpreter.program,
            script = %interpreter.script_name,
            timeout_ms = timeout.as_millis() as u64,
            artifacts = artifacts.len(),
            "spawning interpreter"
        );

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: interpreter.program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::of(&child);

        let cap = self.config.max_capture_bytes;
        let stdout_capture = child.stdout.take().map(|pipe| Capture::spawn(pipe, cap));
        let stderr_capture = child.stderr.take().map(|pipe| Capture::spawn(pipe, cap));

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status.map_err(SandboxError::Wait)?),
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        // Also after a clean exit: backgrounded descendants must not outlive the run.
        group.kill();
        if !matches!(exit, Exit::Finished(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed-out interpreter");
            }
        }
        let elapsed = started.elapsed();

        let (stdout, stdout_truncated) = collect_capture(stdout_capture).await;
        let (stderr, stderr_truncated) = collect_capture(stderr_capture).await;
        if stdout_truncated || stderr_truncated {
            debug!(cap, stdout_truncated, stderr_truncated, "output capture kept the tail only");
        }

        let (status, output) = match exit {
            Exit::TimedOut | Exit::Cancelled => {
                let cancelled = matches!(exit, Exit::Cancelled);
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    cancelled,
                    "interpreter terminated at deadline"
                );
                (ExecutionStatus::Timeout { cancelled }, None)
            }
            Exit::Finished(status) if !status.success() => {
                (ExecutionStatus::RuntimeError { exit_code: status.code() }, None)
            }
            Exit::Finished(_) => {
                let status = match protocol::parse_output(&stdout) {
                    Some(parsed) => ExecutionStatus::Success {
                        value: parsed.value,
                        structured: parsed.structured,
                    },
                    None => ExecutionStatus::NoResultMarker,
                };
                (status, self.capture_output(workdir.path()).await)
            }
        };

        Ok(ExecutionResult {
            status,
            stdout,
            stderr,
            elapsed,
            output,
            truncated: stdout_truncated || stderr_truncated,
            workdir: workdir.path().to_path_buf(),
        })
    }

    /// Read back the first `<output_stem>.<ext>` the program wrote.
    async fn capture_output(&self, dir: &Path) -> Option<OutputArtifact> {
        for (ext, media_type) in OUTPUT_EXTENSIONS {
            let file_name = format!("{}.{ext}", self.config.output_stem);
            let path = dir.join(&file_name);
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if meta.len() > self.config.max_output_file_bytes {
                warn!(
                    file = %file_name,
                    bytes = meta.len(),
                    limit = self.config.max_output_file_bytes,
                    "output file too large, skipped"
                );
                return None;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    return Some(OutputArtifact {
                        file_name,
                        media_type: media_type.to_string(),
                        data_uri: format!("data:{media_type};base64,{encoded}"),
                        size_bytes: bytes.len() as u64,
                    });
                }
                Err(e) => {
                    warn!(file = %file_name, error = %e, "failed to read output file");
                    return None;
                }
            }
        }
        None
    }
}

fn apply_env(cmd: &mut Command, workdir: &Path) {
    cmd.env_clear();
    for key in INHERITED_ENV {
        if let Some(value) = std::env::var_os(key) {
            cmd.env(key, value);
        }
    }
    cmd.env("HOME", workdir)
        .env("TMPDIR", workdir)
        .env("MPLBACKEND", "Agg")
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONDONTWRITEBYTECODE", "1");
}

/// `SIGKILL` for the interpreter's process group, sent at most once.
///
/// Fires on [`kill`](Self::kill) or on drop, so a run future dropped
/// mid-flight still takes every descendant down.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        // SAFETY: kill(2) with a negative pid only signals; the group was
        // created at spawn by `process_group(0)`, so `pgid` is the child's pid.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // ESRCH: every member already exited.
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pgid, error = %err, "failed to kill interpreter process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// The last `cap` bytes read from a pipe.
#[derive(Debug, Default)]
struct Tail {
    bytes: VecDeque<u8>,
    dropped: u64,
}

impl Tail {
    fn push(&mut self, chunk: &[u8], cap: usize) {
        self.bytes.extend(chunk);
        let excess = self.bytes.len().saturating_sub(cap);
        if excess > 0 {
            self.bytes.drain(..excess);
            self.dropped += excess as u64;
        }
    }

    fn text(&self) -> String {
        let bytes: Vec<u8> = self.bytes.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn lock(tail: &Mutex<Tail>) -> MutexGuard<'_, Tail> {
    tail.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background reader draining one pipe into a shared [`Tail`].
struct Capture {
    tail: Arc<Mutex<Tail>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(mut pipe: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tail = Arc::new(Mutex::new(Tail::default()));
        let sink = Arc::clone(&tail);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        lock(&sink).push(&chunk[..n], cap);
                    }
                }
            }
        });
        Self { tail, task }
    }
}

/// Wait up to [`PIPE_DRAIN_GRACE`] for EOF, then return what was read and
/// whether leading bytes were dropped.
async fn collect_capture(capture: Option<Capture>) -> (String, bool) {
    let Some(Capture { tail, mut task }) = capture else {
        return (String::new(), false);
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "output capture task failed"),
        Err(_) => {
            task.abort();
            debug!("output pipe still held open after exit, keeping partial capture");
        }
    }
    let tail = lock(&tail);
    (tail.text(), tail.dropped > 0)
}
