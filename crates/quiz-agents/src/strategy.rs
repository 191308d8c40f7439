//! Strategy selection: DIRECT answer vs CODE execution.
//!
//! The model is asked for a label; its reply is normalized by
//! [`parse_strategy`]. When the reply names neither label, or both without
//! an explicit `STRATEGY:` line, [`fallback_kind`] decides deterministically.
//! Selection is therefore total: a successful model call always yields a
//! [`Strategy`].

use std::fmt;
use std::sync::{Arc, LazyLock};

use execution::ManifestEntry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ErrorCode;
use crate::llm::{LanguageModel, LlmError};
use crate::prompts;

/// Longest rationale kept from a model reply.
const MAX_RATIONALE_CHARS: usize = 500;

/// `STRATEGY: CODE`, `**Strategy** - direct`, `strategy = code_execution`
static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[\s*#>_-]*strategy[\s*_]*[:=\-][\s*_`]*(direct|code(?:[ _]execution)?)\b",
    )
    .unwrap()
});

static LABEL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(direct|code(?:[ _]execution)?)\b").unwrap());

static REASON_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*#>_-]*(?:reason|rationale|justification)[\s*_]*[:=\-]\s*(.+)$")
        .unwrap()
});

/// Phrasing that implies computation over data.
static COMPUTE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(calculat\w*|comput\w*|sum|total|average|mean|median|mode|std|standard deviation|variance|count\w*|aggregat\w*|filter\w*|group\w*|sort\w*|rank\w*|percent\w*|ratio|correlat\w*|regress\w*|classif\w*|cluster\w*|train\w*|predict\w*|model|forecast\w*|distribution|hypothesis|statistic\w*|plot\w*|chart|graph|visuali[sz]\w*|histogram|scatter)\b",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    Direct,
    Code,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "DIRECT"),
            Self::Code => write!(f, "CODE"),
        }
    }
}

/// Who made the routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Model,
    /// The model reply was ambiguous; the heuristic decided.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub kind: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub source: DecisionSource,
}

/// Normalize a model reply into a label, if it names exactly one.
pub fn parse_strategy(reply: &str) -> Option<StrategyKind> {
    if let Some(caps) = LABEL_LINE.captures(reply) {
        return Some(kind_of(&caps[1]));
    }

    let mut found: Option<StrategyKind> = None;
    for caps in LABEL_TOKEN.captures_iter(reply) {
        let kind = kind_of(&caps[1]);
        match found {
            Some(prev) if prev != kind => return None,
            _ => found = Some(kind),
        }
    }
    found
}

/// Deterministic routing when the model reply is unusable.
pub fn fallback_kind(question: &str, manifest: &[ManifestEntry]) -> StrategyKind {
    if manifest.iter().any(|entry| entry.kind.is_data()) || COMPUTE_HINT.is_match(question) {
        StrategyKind::Code
    } else {
        StrategyKind::Direct
    }
}

fn kind_of(label: &str) -> StrategyKind {
    if label.eq_ignore_ascii_case("direct") {
        StrategyKind::Direct
    } else {
        StrategyKind::Code
    }
}

fn rationale_of(reply: &str) -> Option<String> {
    let text = match REASON_LINE.captures(reply) {
        Some(caps) => caps[1].trim().to_string(),
        None => reply
            .lines()
            .filter(|line| !LABEL_LINE.is_match(line))
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string(),
    };
    (!text.is_empty()).then(|| text.chars().take(MAX_RATIONALE_CHARS).collect())
}

/// Chooses DIRECT or CODE for a question.
#[derive(Clone)]
pub struct StrategySelector {
    model: Arc<dyn LanguageModel>,
}

impl StrategySelector {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Ask the model, falling back to the heuristic on an unusable reply.
    ///
    /// # Errors
    ///
    /// Only a failed model call is an error; it is never defaulted away.
    pub async fn select(
        &self,
        question: &str,
        manifest: &[ManifestEntry],
    ) -> Result<Strategy, LlmError> {
        let prompt = prompts::strategy_prompt(question, manifest);
        let reply = self.model.complete(&prompt, prompts::STRATEGY_PREAMBLE).await?;

        let strategy = match parse_strategy(&reply) {
            Some(kind) => Strategy {
                kind,
                rationale: rationale_of(&reply),
                source: DecisionSource::Model,
            },
            None => {
                let kind = fallback_kind(question, manifest);
                warn!(
                    code = %ErrorCode::AmbiguousStrategy,
                    fallback = %kind,
                    reply = %reply.chars().take(200).collect::<String>(),
                    "model strategy reply unusable, using heuristic"
                );
                Strategy {
                    kind,
                    rationale: Some(format!("fallback heuristic ({} artifacts)", manifest.len())),
                    source: DecisionSource::Fallback,
                }
            }
        };

        info!(
            strategy = %strategy.kind,
            source = ?strategy.source,
            prompt_version = prompts::PROMPT_VERSION,
            "strategy selected"
        );
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;
    use execution::ArtifactKind;

    fn csv_manifest() -> Vec<ManifestEntry> {
        vec![ManifestEntry {
            name: "data.csv".into(),
            kind: ArtifactKind::Tabular,
            size_bytes: 16,
        }]
    }

    fn selector(reply: &'static str) -> StrategySelector {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .times(1)
            .returning(move |_, _| Ok(reply.to_string()));
        StrategySelector::new(Arc::new(mock))
    }

    #[test]
    fn label_line_wins_over_rationale_tokens() {
        let reply = "STRATEGY: DIRECT\nREASON: no code needed, simple arithmetic";
        assert_eq!(parse_strategy(reply), Some(StrategyKind::Direct));
        assert_eq!(
            parse_strategy("**Strategy:** CODE_EXECUTION"),
            Some(StrategyKind::Code)
        );
        assert_eq!(parse_strategy("strategy = code execution"), Some(StrategyKind::Code));
    }

    #[test]
    fn bare_tokens_case_insensitive() {
        assert_eq!(parse_strategy("direct"), Some(StrategyKind::Direct));
        assert_eq!(parse_strategy("I'd say Code."), Some(StrategyKind::Code));
    }

    #[test]
    fn both_or_neither_token_is_ambiguous() {
        assert_eq!(parse_strategy("either direct or code would do"), None);
        assert_eq!(parse_strategy("banana"), None);
        assert_eq!(parse_strategy(""), None);
        // "directly" and "codebase" are not labels
        assert_eq!(parse_strategy("answer directly from the codebase"), None);
    }

    #[test]
    fn fallback_prefers_code_for_data_or_compute_words() {
        assert_eq!(fallback_kind("what is the capital of France", &[]), StrategyKind::Direct);
        assert_eq!(fallback_kind("what is the secret word", &csv_manifest()), StrategyKind::Code);
        assert_eq!(fallback_kind("Calculate the average price", &[]), StrategyKind::Code);
        assert_eq!(fallback_kind("plot revenue by month", &[]), StrategyKind::Code);
    }

    #[test]
    fn rationale_prefers_reason_line() {
        assert_eq!(
            rationale_of("STRATEGY: CODE\nREASON: needs the CSV").as_deref(),
            Some("needs the CSV")
        );
        assert_eq!(rationale_of("STRATEGY: CODE"), None);
    }

    #[tokio::test]
    async fn model_label_is_used() {
        let s = selector("STRATEGY: DIRECT\nREASON: arithmetic in the question")
            .select("what is 17 * 3", &[])
            .await
            .unwrap();
        assert_eq!(s.kind, StrategyKind::Direct);
        assert_eq!(s.source, DecisionSource::Model);
        assert_eq!(s.rationale.as_deref(), Some("arithmetic in the question"));
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let s = selector("¯\\_(ツ)_/¯")
            .select("sum the amount column", &csv_manifest())
            .await
            .unwrap();
        assert_eq!(s.kind, StrategyKind::Code);
        assert_eq!(s.source, DecisionSource::Fallback);
    }

    #[tokio::test]
    async fn model_failure_is_propagated() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .returning(|_, _| Err(LlmError::Request("401 Unauthorized".into())));
        let err = StrategySelector::new(Arc::new(mock))
            .select("what is 17 * 3", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Request(_)));
    }

    #[tokio::test]
    async fn manifest_reaches_the_prompt() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .withf(|prompt, context| {
                prompt.contains("data.csv (tabular") && context.starts_with("You route")
            })
            .returning(|_, _| Ok("STRATEGY: CODE".into()));
        let s = StrategySelector::new(Arc::new(mock))
            .select("sum the amount column", &csv_manifest())
            .await
            .unwrap();
        assert_eq!(s.kind, StrategyKind::Code);
    }
}
