use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use arena_core::config::LlmConfig;
use arena_core::domain::battle::Speaker;
use arena_core::domain::ledger::TokenUsage;
use arena_core::domain::tier::ModelTier;

use crate::gateway::{
    AuditReply, AuditRequest, CompletionGateway, GatewayError, GradeReply, GradeRequest,
    TurnReply, TurnRequest,
};
use crate::prompts::{self, PromptMessage, PromptRole};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

/// Anthropic Messages API client with a tier to model mapping.
pub struct MessagesApiGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    premium_model: String,
    economy_model: String,
    max_output_tokens: u32,
    timeout_secs: u64,
}

impl MessagesApiGateway {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GatewayError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GatewayError::Configuration("llm.api_key is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| GatewayError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            api_key,
            premium_model: config.premium_model.clone(),
            economy_model: config.economy_model.clone(),
            max_output_tokens: config.max_output_tokens,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Premium => &self.premium_model,
            ModelTier::Economy => &self.economy_model,
        }
    }

    async fn complete(
        &self,
        tier: ModelTier,
        system: String,
        messages: Vec<PromptMessage>,
    ) -> Result<Completion, GatewayError> {
        let body = MessagesRequest::new(
            self.model_for(tier),
            self.max_output_tokens,
            system,
            &messages,
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GatewayError::Timeout(self.timeout_secs)
                } else {
                    GatewayError::Transport(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status: status.as_u16(), body });
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::InvalidResponse(error.to_string()))?;

        debug!(
            event_name = "llm.messages.completed",
            model = %payload.model,
            input_tokens = payload.usage.input_tokens,
            output_tokens = payload.usage.output_tokens,
            "completion received"
        );

        Ok(payload.into_completion())
    }
}

#[async_trait]
impl CompletionGateway for MessagesApiGateway {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate_turn(&self, request: TurnRequest) -> Result<TurnReply, GatewayError> {
        let system = match request.speaker {
            Speaker::Closer => {
                prompts::closer_system_prompt(&request.persona, request.turn_index, request.max_turns)
            }
            Speaker::Persona => prompts::persona_system_prompt(
                &request.persona,
                request.turn_index,
                request.max_turns,
            ),
        };
        let messages = prompts::dialogue_messages(request.speaker, &request.transcript);

        let completion = self.complete(request.tier, system, messages).await?;
        let (text, ends_conversation) = prompts::strip_end_marker(&completion.text);

        Ok(TurnReply { text, usage: completion.usage, ends_conversation, model: completion.model })
    }

    async fn grade_transcript(&self, request: GradeRequest) -> Result<GradeReply, GatewayError> {
        let system = prompts::referee_system_prompt(&request.rubric);
        let messages = vec![PromptMessage {
            role: PromptRole::User,
            content: prompts::render_transcript(&request.persona_name, &request.transcript),
        }];

        let completion = self.complete(request.tier, system, messages).await?;
        Ok(GradeReply { raw: completion.text, usage: completion.usage, model: completion.model })
    }

    async fn audit_transcript(&self, request: AuditRequest) -> Result<AuditReply, GatewayError> {
        let messages = vec![PromptMessage {
            role: PromptRole::User,
            content: prompts::render_transcript(&request.persona_name, &request.transcript),
        }];

        let completion =
            self.complete(request.tier, prompts::audit_system_prompt(), messages).await?;
        Ok(AuditReply { note: completion.text, usage: completion.usage, model: completion.model })
    }
}

struct Completion {
    text: String,
    usage: TokenUsage,
    model: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<WireMessage>,
}

impl MessagesRequest {
    fn new(model: &str, max_tokens: u32, system: String, messages: &[PromptMessage]) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            system,
            messages: messages
                .iter()
                .map(|message| WireMessage {
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl MessagesResponse {
    fn into_completion(self) -> Completion {
        let text = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        Completion {
            text,
            usage: TokenUsage::new(self.usage.input_tokens, self.usage.output_tokens),
            model: self.model,
        }
    }
}
