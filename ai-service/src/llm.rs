//! 大模型客户端模块
//!
//! Speaks the OpenAI-compatible chat-completions protocol with tool calling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::errors::{AppError, AppResult};
use common::models::chat::{ChatMessage, LlmConfig};

/// Model used when the client does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upstream error bodies are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &'static str, description: &'static str, parameters: Value) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }
}

/// One chat-completions round trip.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the assistant message of the first choice.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> AppResult<ChatMessage>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Client for any endpoint implementing `/chat/completions`.
pub struct OpenAiCompatClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// `api_address` is the full chat-completions URL.
    pub fn new(config: &LlmConfig) -> AppResult<Self> {
        if config.api_address.trim().is_empty() || config.api_key.trim().is_empty() {
            return Err(AppError::Validation(
                "LLM API address or API key is not configured.".into(),
            ));
        }
        Ok(Self {
            endpoint: config.api_address.trim().to_string(),
            api_key: config.api_key.clone(),
            model: config
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> AppResult<ChatMessage> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::ExternalService(format!("LLM response unreadable: {}", e)))?;
        tracing::debug!(status = %status, model = %self.model, "LLM 响应");

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::ExternalService(format!(
                "LLM auth failed ({}). Check API key and account access.",
                status
            )));
        }
        if !status.is_success() {
            let excerpt: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(AppError::ExternalService(format!(
                "LLM error {}: {}",
                status, excerpt
            )));
        }

        parse_completion(&text)
    }
}

fn parse_completion(text: &str) -> AppResult<ChatMessage> {
    let parsed: ChatCompletionResponse = serde_json::from_str(text)
        .map_err(|e| AppError::AgentProtocol(format!("unparsable completion: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| AppError::AgentProtocol("missing choices[0].message".into()))
}
