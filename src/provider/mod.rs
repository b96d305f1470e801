//! Conversational-voice provider seam. Agents are mirrored to the provider and
//! outbound calls are placed through it; call results come back on the webhook.
use crate::models::agent::Model as AgentModel;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod elevenlabs;

pub use elevenlabs::ElevenLabsProvider;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub voice_id: Option<String>,
    pub language: String,
    pub first_message: Option<String>,
    pub system_prompt: Option<String>,
    pub llm: Option<String>,
}

impl From<&AgentModel> for AgentSpec {
    fn from(agent: &AgentModel) -> Self {
        Self {
            name: agent.name.clone(),
            voice_id: agent.voice_id.clone(),
            language: agent.language.clone(),
            first_message: agent.first_message.clone(),
            system_prompt: agent.system_prompt.clone(),
            llm: agent.llm.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundCallRequest {
    pub provider_agent_id: String,
    pub phone_number_id: String,
    pub to_number: String,
    /// Substituted into the agent prompt, e.g. the contact's name.
    pub dynamic_variables: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OutboundCallResponse {
    pub conversation_id: Option<String>,
    pub call_sid: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Returns the provider's agent id.
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String>;
    async fn update_agent(&self, provider_agent_id: &str, spec: &AgentSpec) -> Result<()>;
    async fn delete_agent(&self, provider_agent_id: &str) -> Result<()>;
    async fn place_call(&self, request: &OutboundCallRequest) -> Result<OutboundCallResponse>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory provider that records every request and fails calls to
    /// numbers listed in `failing_numbers`.
    #[derive(Default)]
    pub struct RecordingProvider {
        pub agents: Mutex<Vec<AgentSpec>>,
        pub deleted: Mutex<Vec<String>>,
        pub calls: Mutex<Vec<OutboundCallRequest>>,
        pub failing_numbers: Mutex<HashSet<String>>,
    }

    impl RecordingProvider {
        pub fn fail_number(&self, number: &str) {
            self.failing_numbers
                .lock()
                .unwrap()
                .insert(number.to_string());
        }

        pub fn placed(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.to_number.clone())
                .collect()
        }
    }

    #[async_trait]
    impl VoiceProvider for RecordingProvider {
        async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
            let mut agents = self.agents.lock().unwrap();
            agents.push(spec.clone());
            Ok(format!("agent_{}", agents.len()))
        }

        async fn update_agent(&self, _provider_agent_id: &str, spec: &AgentSpec) -> Result<()> {
            self.agents.lock().unwrap().push(spec.clone());
            Ok(())
        }

        async fn delete_agent(&self, provider_agent_id: &str) -> Result<()> {
            self.deleted
                .lock()
                .unwrap()
                .push(provider_agent_id.to_string());
            Ok(())
        }

        async fn place_call(&self, request: &OutboundCallRequest) -> Result<OutboundCallResponse> {
            if self
                .failing_numbers
                .lock()
                .unwrap()
                .contains(&request.to_number)
            {
                return Err(anyhow!("destination {} unreachable", request.to_number));
            }
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            let n = calls.len();
            Ok(OutboundCallResponse {
                conversation_id: Some(format!("conv_{}", n)),
                call_sid: Some(format!("CA{:04}", n)),
                message: None,
            })
        }
    }
}
