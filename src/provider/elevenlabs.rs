use super::{AgentSpec, OutboundCallRequest, OutboundCallResponse, VoiceProvider};
use crate::config::ProviderConfig;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

const API_KEY_HEADER: &str = "xi-api-key";

pub struct ElevenLabsProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CreateAgentResponse {
    agent_id: String,
}

#[derive(Deserialize)]
struct OutboundCallPayload {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default, rename = "callSid")]
    call_sid: Option<String>,
}

impl ElevenLabsProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let mut builder = reqwest::Client::builder().user_agent(crate::version::get_useragent());
        if let Some(timeout) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        } else {
            builder = builder.timeout(Duration::from_secs(15));
        }
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: builder.build().unwrap_or_default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .with_context(|| format!("voice provider {} request failed", what))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("voice provider {} returned {}: {}", what, status, body));
        }
        Ok(response)
    }
}

/// Request body shared by agent create and update.
pub fn agent_payload(spec: &AgentSpec) -> Value {
    let mut agent = json!({
        "language": spec.language,
        "prompt": {
            "prompt": spec.system_prompt.clone().unwrap_or_default(),
        },
    });
    if let Some(first_message) = &spec.first_message {
        agent["first_message"] = json!(first_message);
    }
    if let Some(llm) = &spec.llm {
        agent["prompt"]["llm"] = json!(llm);
    }
    let mut conversation_config = json!({ "agent": agent });
    if let Some(voice_id) = &spec.voice_id {
        conversation_config["tts"] = json!({ "voice_id": voice_id });
    }
    json!({
        "name": spec.name,
        "conversation_config": conversation_config,
    })
}

pub fn outbound_call_payload(request: &OutboundCallRequest) -> Value {
    json!({
        "agent_id": request.provider_agent_id,
        "agent_phone_number_id": request.phone_number_id,
        "to_number": request.to_number,
        "conversation_initiation_client_data": {
            "dynamic_variables": request.dynamic_variables,
        },
    })
}

#[async_trait]
impl VoiceProvider for ElevenLabsProvider {
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
        let request = self
            .client
            .post(self.url("/v1/convai/agents/create"))
            .json(&agent_payload(spec));
        let created: CreateAgentResponse = self
            .send(request, "create agent")
            .await?
            .json()
            .await
            .context("invalid create agent response")?;
        info!(agent_id = %created.agent_id, name = %spec.name, "provider agent created");
        Ok(created.agent_id)
    }

    async fn update_agent(&self, provider_agent_id: &str, spec: &AgentSpec) -> Result<()> {
        let request = self
            .client
            .patch(self.url(&format!("/v1/convai/agents/{}", provider_agent_id)))
            .json(&agent_payload(spec));
        self.send(request, "update agent").await?;
        Ok(())
    }

    async fn delete_agent(&self, provider_agent_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("/v1/convai/agents/{}", provider_agent_id)));
        self.send(request, "delete agent").await?;
        Ok(())
    }

    async fn place_call(&self, request: &OutboundCallRequest) -> Result<OutboundCallResponse> {
        let http = self
            .client
            .post(self.url("/v1/convai/twilio/outbound-call"))
            .json(&outbound_call_payload(request));
        let payload: OutboundCallPayload = self
            .send(http, "outbound call")
            .await?
            .json()
            .await
            .context("invalid outbound call response")?;
        if payload.success == Some(false) {
            return Err(anyhow!(
                "outbound call rejected: {}",
                payload.message.unwrap_or_else(|| "unknown reason".to_string())
            ));
        }
        debug!(
            to = %request.to_number,
            conversation_id = ?payload.conversation_id,
            "outbound call accepted"
        );
        Ok(OutboundCallResponse {
            conversation_id: payload.conversation_id,
            call_sid: payload.call_sid,
            message: payload.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_agent_payload_includes_optional_fields() {
        let spec = AgentSpec {
            name: "Sales".into(),
            voice_id: Some("voice-1".into()),
            language: "hi".into(),
            first_message: Some("Namaste!".into()),
            system_prompt: Some("You sell things".into()),
            llm: Some("gpt-4o-mini".into()),
        };
        let payload = agent_payload(&spec);
        assert_eq!(payload["name"], "Sales");
        let agent = &payload["conversation_config"]["agent"];
        assert_eq!(agent["language"], "hi");
        assert_eq!(agent["first_message"], "Namaste!");
        assert_eq!(agent["prompt"]["prompt"], "You sell things");
        assert_eq!(agent["prompt"]["llm"], "gpt-4o-mini");
        assert_eq!(payload["conversation_config"]["tts"]["voice_id"], "voice-1");
    }

    #[test]
    fn test_agent_payload_omits_missing_fields() {
        let spec = AgentSpec {
            name: "Bare".into(),
            voice_id: None,
            language: "en".into(),
            first_message: None,
            system_prompt: None,
            llm: None,
        };
        let payload = agent_payload(&spec);
        assert!(payload["conversation_config"].get("tts").is_none());
        assert!(payload["conversation_config"]["agent"].get("first_message").is_none());
        assert_eq!(payload["conversation_config"]["agent"]["prompt"]["prompt"], "");
    }

    #[test]
    fn test_outbound_payload_carries_variables() {
        let mut vars = Map::new();
        vars.insert("name".into(), json!("Asha"));
        let payload = outbound_call_payload(&OutboundCallRequest {
            provider_agent_id: "agent_1".into(),
            phone_number_id: "phnum_1".into(),
            to_number: "+919800000001".into(),
            dynamic_variables: vars,
        });
        assert_eq!(payload["agent_id"], "agent_1");
        assert_eq!(payload["agent_phone_number_id"], "phnum_1");
        assert_eq!(
            payload["conversation_initiation_client_data"]["dynamic_variables"]["name"],
            "Asha"
        );
    }

    #[test]
    fn test_outbound_response_parses_call_sid() {
        let payload: OutboundCallPayload = serde_json::from_value(json!({
            "success": true,
            "message": "ok",
            "conversation_id": "conv_abc",
            "callSid": "CA123"
        }))
        .unwrap();
        assert_eq!(payload.call_sid.as_deref(), Some("CA123"));
        assert_eq!(payload.conversation_id.as_deref(), Some("conv_abc"));
    }
}
