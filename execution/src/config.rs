//! Sandbox configuration: interpreter profile, working-directory root, limits.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Values deserialized from a config file by the caller
//! 2. Environment variable overrides (`QUIZ_PYTHON`, `QUIZ_WORK_ROOT`,
//!    `QUIZ_EXEC_TIMEOUT_SECS`)
//! 3. Built-in defaults

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{RESULT_BEGIN, RESULT_END};

/// Default wall-clock budget for one generated program.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Per-stream capture limit for stdout / stderr.
const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;
/// Output files above this size are not read back.
const DEFAULT_MAX_OUTPUT_FILE_BYTES: u64 = 10 * 1024 * 1024;
/// Prefix for per-run working directories.
const DEFAULT_DIR_PREFIX: &str = "quiz_exec_";
/// File stem a program writes rendered artifacts to (`output.png`, ...).
const DEFAULT_OUTPUT_STEM: &str = "output";

const ENV_PYTHON: &str = "QUIZ_PYTHON";
const ENV_WORK_ROOT: &str = "QUIZ_WORK_ROOT";
const ENV_EXEC_TIMEOUT_SECS: &str = "QUIZ_EXEC_TIMEOUT_SECS";

/// How a generated program is written to disk and launched.
///
/// When deserialized, `args` and `epilogue` default to empty: a profile
/// given in a config file is taken literally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Executable to launch (looked up on `PATH`).
    pub program: String,
    /// Arguments placed before the script path.
    #[serde(default)]
    pub args: Vec<String>,
    /// File name the program source is written to inside the working directory.
    pub script_name: String,
    /// Human-readable language name used in code-generation prompts.
    pub language: String,
    /// Source appended after the generated program, if any.
    #[serde(default)]
    pub epilogue: Option<String>,
}

impl InterpreterConfig {
    /// Python 3 profile. The epilogue reports a top-level `answer` variable,
    /// or `result` when there is no `answer`, through the result markers.
    pub fn python(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-u".to_string()],
            script_name: "solution.py".to_string(),
            language: "Python 3".to_string(),
            epilogue: Some(python_epilogue()),
        }
    }

    /// POSIX shell profile.
    pub fn shell() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            script_name: "solution.sh".to_string(),
            language: "POSIX sh".to_string(),
            epilogue: None,
        }
    }

    /// Full source written to `script_name`.
    pub fn render(&self, program: &str) -> String {
        match &self.epilogue {
            Some(epilogue) => format!("{}\n\n{}\n", program.trim_end(), epilogue),
            None => format!("{}\n", program.trim_end()),
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self::python(env::var(ENV_PYTHON).unwrap_or_else(|_| "python3".to_string()))
    }
}

fn python_epilogue() -> String {
    format!(
        r#"# -- result capture --
if "answer" in globals():
    import json as __quiz_json
    print("{RESULT_BEGIN}")
    print(__quiz_json.dumps(answer, default=str))
    print("{RESULT_END}")
elif "result" in globals():
    import json as __quiz_json
    print("{RESULT_BEGIN}")
    print(__quiz_json.dumps(result, default=str))
    print("{RESULT_END}")"#
    )
}

/// Top-level sandbox configuration. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub interpreter: InterpreterConfig,
    /// Directory under which per-run working directories are created.
    pub work_root: PathBuf,
    /// Prefix for per-run working directory names.
    pub dir_prefix: String,
    /// Default timeout in seconds when the caller does not supply one.
    pub timeout_secs: u64,
    /// Maximum bytes kept from each of stdout and stderr.
    pub max_capture_bytes: usize,
    /// Output files larger than this are skipped.
    pub max_output_file_bytes: u64,
    /// File stem probed for rendered output (`output.png`, `output.csv`, ...).
    pub output_stem: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            work_root: env::var(ENV_WORK_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            dir_prefix: DEFAULT_DIR_PREFIX.to_string(),
            timeout_secs: env::var(ENV_EXEC_TIMEOUT_SECS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            max_output_file_bytes: DEFAULT_MAX_OUTPUT_FILE_BYTES,
            output_stem: DEFAULT_OUTPUT_STEM.to_string(),
        }
    }
}

impl SandboxConfig {
    /// Configuration rooted at `work_root` with the given interpreter.
    pub fn new(interpreter: InterpreterConfig, work_root: impl Into<PathBuf>) -> Self {
        Self {
            interpreter,
            work_root: work_root.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.interpreter.program.trim().is_empty() {
            return Err("interpreter.program must not be empty".to_string());
        }
        if self.interpreter.script_name.trim().is_empty()
            || self.interpreter.script_name.contains(['/', '\\'])
        {
            return Err(format!(
                "interpreter.script_name must be a plain file name, got `{}`",
                self.interpreter.script_name
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }
        if self.max_capture_bytes == 0 {
            return Err("max_capture_bytes must be > 0".to_string());
        }
        if self.max_output_file_bytes == 0 {
            return Err("max_output_file_bytes must be > 0".to_string());
        }
        if self.dir_prefix.contains(['/', '\\']) {
            return Err(format!(
                "dir_prefix must not contain separators, got `{}`",
                self.dir_prefix
            ));
        }
        Ok(())
    }
}
