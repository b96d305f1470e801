//! Tags finished conversations with an outcome label through an external
//! classification API.
use crate::config::ClassifierConfig;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub const UNKNOWN_OUTCOME: &str = "unknown";

#[async_trait]
pub trait OutcomeClassifier: Send + Sync {
    async fn classify(&self, transcript: &Value, summary: Option<&str>) -> Result<String>;
}

pub struct HttpClassifier {
    config: ClassifierConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(alias = "outcome")]
    label: Option<String>,
}

/// Maps the returned label onto the configured set.
pub fn constrain_label(label: Option<&str>, labels: &[String]) -> String {
    let Some(label) = label.map(|l| l.trim().to_lowercase()) else {
        return UNKNOWN_OUTCOME.to_string();
    };
    if labels.iter().any(|l| l.eq_ignore_ascii_case(&label)) {
        label
    } else {
        UNKNOWN_OUTCOME.to_string()
    }
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(10_000));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(crate::version::get_useragent())
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl OutcomeClassifier for HttpClassifier {
    async fn classify(&self, transcript: &Value, summary: Option<&str>) -> Result<String> {
        let mut request = self.client.post(&self.config.url).json(&json!({
            "transcript": transcript,
            "summary": summary,
            "labels": self.config.labels,
        }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .context("classifier request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("classifier returned {}", status));
        }
        let body: ClassifyResponse = response
            .json()
            .await
            .context("invalid classifier response")?;
        Ok(constrain_label(body.label.as_deref(), &self.config.labels))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns a fixed label, or fails when `label` is `None`.
    pub struct StaticClassifier {
        pub label: Option<String>,
    }

    #[async_trait]
    impl OutcomeClassifier for StaticClassifier {
        async fn classify(&self, _transcript: &Value, _summary: Option<&str>) -> Result<String> {
            self.label
                .clone()
                .ok_or_else(|| anyhow!("classifier unavailable"))
        }
    }

    #[test]
    fn test_constrain_label() {
        let labels = crate::config::default_outcome_labels();
        assert_eq!(constrain_label(Some("Interested"), &labels), "interested");
        assert_eq!(constrain_label(Some(" voicemail "), &labels), "voicemail");
        assert_eq!(constrain_label(Some("angry"), &labels), UNKNOWN_OUTCOME);
        assert_eq!(constrain_label(None, &labels), UNKNOWN_OUTCOME);
    }

    #[test]
    fn test_response_accepts_outcome_alias() {
        let body: ClassifyResponse =
            serde_json::from_value(json!({"outcome": "do_not_call"})).unwrap();
        assert_eq!(body.label.as_deref(), Some("do_not_call"));
    }
}
