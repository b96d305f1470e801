use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Longest call the provider can report; anything above is clamped.
pub const MAX_CALL_DURATION_SECS: i64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneCall {
    pub call_sid: Option<String>,
    pub agent_number: Option<String>,
    pub external_number: Option<String>,
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallMetadata {
    pub start_time_unix_secs: Option<i64>,
    pub call_duration_secs: Option<i64>,
    pub termination_reason: Option<String>,
    pub phone_call: Option<PhoneCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Analysis {
    pub transcript_summary: Option<String>,
    pub call_successful: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionData {
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub transcript: Option<Value>,
    #[serde(default)]
    pub metadata: CallMetadata,
    #[serde(default)]
    pub analysis: Option<Analysis>,
}

impl TranscriptionData {
    pub fn call_sid(&self) -> Option<&str> {
        self.metadata
            .phone_call
            .as_ref()
            .and_then(|p| p.call_sid.as_deref())
    }

    pub fn duration_secs(&self) -> i64 {
        self.metadata
            .call_duration_secs
            .unwrap_or(0)
            .clamp(0, MAX_CALL_DURATION_SECS)
    }

    pub fn summary(&self) -> Option<&str> {
        self.analysis
            .as_ref()
            .and_then(|a| a.transcript_summary.as_deref())
    }

    pub fn provider_failed(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("failed"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitiationFailureData {
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl InitiationFailureData {
    /// Telephony carriers nest the sid differently; both shapes are accepted.
    pub fn call_sid(&self) -> Option<&str> {
        let metadata = self.metadata.as_ref()?;
        metadata
            .pointer("/body/CallSid")
            .or_else(|| metadata.get("call_sid"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum WebhookEvent {
    PostCallTranscription(Box<TranscriptionData>),
    CallInitiationFailure(InitiationFailureData),
    Other(String),
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_slice(body).context("webhook body is not a valid event")?;
        let event = match envelope.event_type.as_str() {
            "post_call_transcription" => WebhookEvent::PostCallTranscription(Box::new(
                serde_json::from_value(envelope.data)
                    .context("invalid post_call_transcription data")?,
            )),
            "call_initiation_failure" => WebhookEvent::CallInitiationFailure(
                serde_json::from_value(envelope.data)
                    .context("invalid call_initiation_failure data")?,
            ),
            _ => WebhookEvent::Other(envelope.event_type),
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            WebhookEvent::PostCallTranscription(_) => "post_call_transcription",
            WebhookEvent::CallInitiationFailure(_) => "call_initiation_failure",
            WebhookEvent::Other(kind) => kind,
        }
    }
}
