//! Task and answer types.

use chrono::{DateTime, Utc};
use execution::{InputArtifact, ManifestEntry, OutputArtifact};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Where a computed answer is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionTarget {
    /// Endpoint the answer is POSTed to.
    pub submit_url: String,
    /// URL of the quiz page the answer belongs to.
    pub quiz_url: String,
}

impl SubmissionTarget {
    pub fn new(submit_url: impl Into<String>, quiz_url: impl Into<String>) -> Self {
        Self {
            submit_url: submit_url.into(),
            quiz_url: quiz_url.into(),
        }
    }
}

/// One quiz question plus its attached files.
///
/// Built with the `with_*` methods, then read-only.
#[derive(Debug, Clone)]
pub struct Task {
    id: Uuid,
    question: String,
    artifacts: Vec<InputArtifact>,
    target: Option<SubmissionTarget>,
    received_at: DateTime<Utc>,
}

impl Task {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            artifacts: Vec::new(),
            target: None,
            received_at: Utc::now(),
        }
    }

    /// Attach an input file. A file name already used by an earlier
    /// artifact gets a numeric suffix (`data.csv`, `data_2.csv`).
    pub fn with_artifact(mut self, artifact: InputArtifact) -> Self {
        let artifact = artifact.unique_among(&self.artifacts);
        self.artifacts.push(artifact);
        self
    }

    pub fn with_artifacts(self, artifacts: impl IntoIterator<Item = InputArtifact>) -> Self {
        artifacts.into_iter().fold(self, Self::with_artifact)
    }

    pub fn with_target(mut self, target: SubmissionTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn artifacts(&self) -> &[InputArtifact] {
        &self.artifacts
    }

    pub fn target(&self) -> Option<&SubmissionTarget> {
        self.target.as_ref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.artifacts.iter().map(InputArtifact::manifest_entry).collect()
    }
}

/// How the answer value was typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerForm {
    Number,
    Boolean,
    /// Object, array or null.
    Json,
    Text,
    /// A rendered output file as a `data:` URI.
    DataUri,
    /// Could not be typed; `value` is the raw text.
    Unparsed,
}

/// Which path produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "path")]
pub enum AnswerOrigin {
    Direct,
    /// `attempts` counts every program run, including the successful one.
    Code { attempts: u32 },
}

/// Final normalized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub value: Value,
    /// Text the value was derived from (model reply or result payload).
    pub raw: String,
    pub form: AnswerForm,
    pub origin: AnswerOrigin,
    /// Rendered output file, when the program wrote one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<OutputArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_artifacts_and_manifest() {
        let task = Task::new("sum the amount column")
            .with_artifact(InputArtifact::new("data.csv", b"amount\n10\n".to_vec(), None))
            .with_target(SubmissionTarget::new("https://x/submit", "https://x/quiz/1"));
        let manifest = task.manifest();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].name, "data.csv");
        assert_eq!(task.target().unwrap().quiz_url, "https://x/quiz/1");
    }

    #[test]
    fn downloads_with_the_same_derived_name_are_all_kept() {
        let json = Some("application/json".to_string());
        let task = Task::new("merge the two exports").with_artifacts([
            InputArtifact::from_url("https://x/export?id=1", b"[1]".to_vec(), json.clone()),
            InputArtifact::from_url("https://x/export?id=2", b"[2]".to_vec(), json),
            InputArtifact::from_url("https://x/a/report.pdf", b"%PDF".to_vec(), None),
            InputArtifact::from_url("https://x/b/report.pdf", b"%PDF".to_vec(), None),
        ]);
        let names: Vec<_> = task.manifest().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["data.json", "data_2.json", "report.pdf", "report_2.pdf"]);
        assert!(execution::artifact::validate_names(task.artifacts(), "solution.py").is_ok());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(Task::new("a").id(), Task::new("a").id());
    }

    #[test]
    fn origin_serializes_with_path_tag() {
        let v = serde_json::to_value(AnswerOrigin::Code { attempts: 2 }).unwrap();
        assert_eq!(v, serde_json::json!({"path": "code", "attempts": 2}));
    }
}
