//! Answer submission: `submit(target, answer) -> receipt`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SubmitCredentials;
use crate::task::{Answer, SubmissionTarget};

/// Longest response body kept in a rejection error.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission is not configured: {0}")]
    NotConfigured(&'static str),

    #[error("submission request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("submission rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid submission response: {0}")]
    InvalidResponse(String),
}

/// Endpoint's verdict on a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub correct: bool,
    /// Next quiz page, if the endpoint sent one.
    #[serde(default, rename = "url", skip_serializing_if = "Option::is_none")]
    pub next_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// JSON body posted to the submission endpoint.
#[derive(Debug, Serialize)]
pub struct SubmissionPayload<'a> {
    pub email: &'a str,
    pub secret: &'a str,
    pub url: &'a str,
    pub answer: &'a Value,
}

#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(
        &self,
        target: &SubmissionTarget,
        answer: &Answer,
    ) -> Result<SubmissionReceipt, SubmitError>;
}

/// Posts answers as JSON over HTTP.
pub struct HttpSubmitter {
    client: reqwest::Client,
    credentials: SubmitCredentials,
}

impl HttpSubmitter {
    pub fn new(credentials: SubmitCredentials) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .timeout(credentials.timeout())
            .build()?;
        Ok(Self { client, credentials })
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(
        &self,
        target: &SubmissionTarget,
        answer: &Answer,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let payload = SubmissionPayload {
            email: &self.credentials.email,
            secret: &self.credentials.secret,
            url: &target.quiz_url,
            answer: &answer.value,
        };

        let response = self.client.post(&target.submit_url).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), url = %target.submit_url, "submission rejected");
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let receipt = parse_receipt(&body)?;
        info!(
            correct = receipt.correct,
            next_url = receipt.next_url.as_deref().unwrap_or(""),
            "answer submitted"
        );
        Ok(receipt)
    }
}

fn parse_receipt(body: &str) -> Result<SubmissionReceipt, SubmitError> {
    serde_json::from_str(body).map_err(|e| SubmitError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receipt_maps_url_to_next_url() {
        let body = r#"{"correct": true, "url": "https://quiz.example/2", "reason": null}"#;
        let r = parse_receipt(body).unwrap();
        assert!(r.correct);
        assert_eq!(r.next_url.as_deref(), Some("https://quiz.example/2"));
        assert!(r.reason.is_none());
    }

    #[test]
    fn receipt_without_optional_fields() {
        let r = parse_receipt(r#"{"correct": false, "reason": "Wrong sum"}"#).unwrap();
        assert!(!r.correct);
        assert_eq!(r.reason.as_deref(), Some("Wrong sum"));
    }

    #[test]
    fn non_json_body_is_invalid_response() {
        assert!(matches!(
            parse_receipt("<html>oops</html>"),
            Err(SubmitError::InvalidResponse(_))
        ));
    }

    #[test]
    fn payload_shape() {
        let answer = json!(60);
        let payload = SubmissionPayload {
            email: "a@b.c",
            secret: "s3",
            url: "https://quiz.example/1",
            answer: &answer,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"email": "a@b.c", "secret": "s3", "url": "https://quiz.example/1", "answer": 60})
        );
    }
}
