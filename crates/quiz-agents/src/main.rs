//! Command-line entry point for the quiz solver.
//!
//! ```bash
//! # Answer only
//! quiz-agents solve --question "How many rows have status=ok?" --file data.csv
//!
//! # Answer and submit (needs QUIZ_EMAIL / QUIZ_SECRET)
//! quiz-agents solve --question "..." --submit-url https://quiz.example/submit --quiz-url https://quiz.example/q1
//!
//! # Run a program through the sandbox, bypassing the model
//! quiz-agents exec --script answer.py --file data.csv --timeout-secs 30
//! ```
//!
//! Results go to stdout as JSON, logs to stderr. The exit status is non-zero
//! when the task fails.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use execution::{InputArtifact, SandboxRunner};
use quiz_agents::{Orchestrator, SolverConfig, SubmissionTarget, Task};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults and QUIZ_* environment otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one question, optionally submitting the answer
    Solve(SolveArgs),
    /// Run a program in the sandbox and print the execution result
    Exec(ExecArgs),
}

#[derive(Args, Debug)]
struct SolveArgs {
    /// Question text
    #[arg(long)]
    question: String,

    /// Attached file, repeatable
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Endpoint the answer is posted to
    #[arg(long, requires = "quiz_url")]
    submit_url: Option<String>,

    /// Quiz page URL echoed back with the answer
    #[arg(long, requires = "submit_url")]
    quiz_url: Option<String>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Program source file
    #[arg(long)]
    script: PathBuf,

    /// Input file placed in the working directory, repeatable
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Wall-clock limit (overrides the configured sandbox timeout)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SolverConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let config = SolverConfig::from_env();
            config.validate().map_err(anyhow::Error::msg)?;
            config
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Command::Solve(args) => solve(config, args, &cancel).await,
        Command::Exec(args) => exec(config, args, &cancel).await,
    }
}

async fn solve(
    config: SolverConfig,
    args: SolveArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    info!(
        model = %config.llm.model,
        interpreter = %config.sandbox.interpreter.program,
        "quiz solver starting"
    );
    let orchestrator = Orchestrator::from_config(config)?;

    let mut task = Task::new(args.question).with_artifacts(load_artifacts(&args.files).await?);
    if let (Some(submit_url), Some(quiz_url)) = (args.submit_url, args.quiz_url) {
        task = task.with_target(SubmissionTarget::new(submit_url, quiz_url));
    }

    let outcome = if task.target().is_some() {
        orchestrator
            .solve_and_submit(&task, cancel)
            .await
            .map(|submitted| serde_json::to_string_pretty(&submitted))
    } else {
        orchestrator
            .solve_with_cancel(&task, cancel)
            .await
            .map(|answer| serde_json::to_string_pretty(&answer))
    };

    match outcome {
        Ok(json) => {
            println!("{}", json?);
            Ok(ExitCode::SUCCESS)
        }
        Err(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn exec(
    config: SolverConfig,
    args: ExecArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let program = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("failed to read {}", args.script.display()))?;
    let artifacts = load_artifacts(&args.files).await?;
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.sandbox.timeout());

    let runner = SandboxRunner::new(config.sandbox);
    let result = runner.run(&program, &artifacts, timeout, cancel).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn load_artifacts(paths: &[PathBuf]) -> Result<Vec<InputArtifact>> {
    let mut artifacts = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        artifacts.push(InputArtifact::new(file_name(path)?, bytes, None));
    }
    Ok(artifacts)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
