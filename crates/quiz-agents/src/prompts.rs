//! Prompt builders for strategy selection, direct answers, code generation
//! and repair.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever any template changes so
//! logged decisions can be traced to the wording that produced them.

use std::sync::LazyLock;
use std::time::Duration;

use execution::protocol::{RESULT_BEGIN, RESULT_END};
use execution::{InputArtifact, InterpreterConfig, ManifestEntry, StatusCode};
use regex::Regex;

pub const PROMPT_VERSION: &str = "1.3.0";

/// Characters of stderr/stdout shown to the model in a repair prompt.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 2_000;

/// First fenced block; the info string (language tag) is optional.
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").unwrap());

/// Opening fence with no closing fence (truncated response).
static OPEN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*)$").unwrap());

pub const STRATEGY_PREAMBLE: &str = "\
You route data-analysis quiz questions. Decide whether the question can be \
answered directly from the question text alone, or whether a program must be \
executed against the attached files.

Choose DIRECT when the answer follows from the text itself: arithmetic \
stated in the question, general knowledge, reading a value that is spelled \
out, or extracting a code or phrase from the text.

Choose CODE when any attached file must be read, filtered, aggregated, \
joined or counted, when a chart or image must be produced, or when the \
computation is too large to do reliably by hand (statistics, regression, \
clustering, training a model).

Reply with exactly this format:
STRATEGY: DIRECT or CODE
REASON: one sentence";

pub const DIRECT_PREAMBLE: &str = "\
You answer quiz questions precisely. Reply with the final answer only: no \
explanation, no units unless the question asks for them, no surrounding \
quotes. Numbers are plain digits. Yes/no questions are answered with true or \
false. When the question asks for a structured answer, reply with one line \
of valid JSON.";

/// System instruction for code generation in the given language.
pub fn codegen_preamble(interpreter: &InterpreterConfig) -> String {
    format!(
        "You write one self-contained {} program that answers a data-analysis \
         question. The program runs non-interactively in a directory that \
         contains the attached files under the names listed. It has no network \
         access and must finish quickly. Reply with a single fenced code block \
         and nothing else.",
        interpreter.language
    )
}

pub fn strategy_prompt(question: &str, manifest: &[ManifestEntry]) -> String {
    let mut out = format!("QUESTION:\n{}\n\nATTACHED FILES:\n", question.trim());
    if manifest.is_empty() {
        out.push_str("(none)\n");
    } else {
        for entry in manifest {
            out.push_str(&format!(
                "- {} ({}, {} bytes)\n",
                entry.name, entry.kind, entry.size_bytes
            ));
        }
    }
    out.push_str("\nWhich strategy answers this question?");
    out
}

pub fn direct_prompt(question: &str, artifacts: &[InputArtifact]) -> String {
    let mut out = format!("QUESTION:\n{}\n", question.trim());
    let previews = previews(artifacts);
    if !previews.is_empty() {
        out.push_str("\nCONTEXT FROM ATTACHED FILES:\n");
        out.push_str(&previews);
    }
    out.push_str("\nFINAL ANSWER:");
    out
}

pub fn codegen_prompt(
    question: &str,
    artifacts: &[InputArtifact],
    interpreter: &InterpreterConfig,
) -> String {
    let mut out = format!("QUESTION:\n{}\n\nFILES IN THE WORKING DIRECTORY:\n", question.trim());
    if artifacts.is_empty() {
        out.push_str("(none)\n");
    } else {
        for artifact in artifacts {
            out.push_str(&format!("- {} ({})\n", artifact.name(), artifact.kind()));
        }
        let previews = previews(artifacts);
        if !previews.is_empty() {
            out.push_str("\nPREVIEWS:\n");
            out.push_str(&previews);
        }
    }
    out.push('\n');
    out.push_str(&result_contract(interpreter));
    out
}

/// Ask for a corrected program after a runtime error or missing result.
///
/// `diagnostics` is the failing run's output tail
/// (see [`execution::ExecutionResult::diagnostics`]).
pub fn repair_prompt(
    request: &str,
    program: &str,
    status: StatusCode,
    diagnostics: &str,
) -> String {
    let hint = match status {
        StatusCode::NoResultMarker => "The program exited without printing the result markers.",
        _ => "The program raised an error.",
    };
    format!(
        "{request}\n\n\
         A previous program for this request failed ({status}). {hint}\n\n\
         PREVIOUS PROGRAM:\n```\n{program}\n```\n\n\
         OUTPUT:\n{diagnostics}\n\n\
         Fix the problem and return the complete corrected program. Make sure \
         the final answer is printed between the result markers.",
        program = program.trim_end(),
    )
}

/// Ask for a cheaper program after a timeout.
pub fn simplify_prompt(request: &str, program: &str, timeout: Duration) -> String {
    format!(
        "{request}\n\n\
         A previous program for this request was killed after {secs} seconds.\n\n\
         PREVIOUS PROGRAM:\n```\n{program}\n```\n\n\
         Write a simpler program that finishes well within the limit: sample \
         large inputs, cap iteration counts, avoid nested loops over rows and \
         skip anything not needed for the answer.",
        secs = timeout.as_secs(),
        program = program.trim_end(),
    )
}

/// Program source from a model reply: the first fenced block, else the
/// whole reply.
pub fn extract_code(response: &str) -> String {
    if let Some(caps) = FENCED_BLOCK.captures(response) {
        return caps[1].trim_end().to_string();
    }
    if let Some(caps) = OPEN_FENCE.captures(response) {
        return caps[1].trim_end().to_string();
    }
    response.trim().to_string()
}

fn result_contract(interpreter: &InterpreterConfig) -> String {
    let mut out = format!(
        "OUTPUT CONTRACT:\n\
         Print the final answer between two marker lines, as the last thing \
         the program prints:\n{RESULT_BEGIN}\n<answer as one line of JSON, or a bare number or string>\n{RESULT_END}\n\
         You may print debugging output before that; only the last marked \
         answer counts.\n"
    );
    if interpreter.epilogue.is_some() {
        out.push_str(
            "Alternatively assign the final value to a top-level variable named \
             `answer`; it is printed with the markers automatically.\n",
        );
    }
    out.push_str(
        "If the question asks for a chart or image, save it as output.png in \
         the working directory and set the answer to null.\n",
    );
    out
}

fn previews(artifacts: &[InputArtifact]) -> String {
    let mut out = String::new();
    for artifact in artifacts {
        if let Some(preview) = artifact.preview() {
            out.push_str(&format!("--- {} ---\n{}\n", artifact.name(), preview.trim_end()));
        }
    }
    out
}
