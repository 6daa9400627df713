use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ClaudeConfig;
use crate::llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, Message, Role, Usage,
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};

const PROVIDER: &str = "Claude";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client for Anthropic models.
pub struct ClaudeProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeConfig, http: reqwest::Client) -> Result<Self, LlmError> {
        let api_key = config.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey { provider: PROVIDER });
        }

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url,
            model: config.model,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    /// System messages are joined into the top-level `system` field; the rest stay
    /// in order as the conversation.
    pub fn build_request_body(&self, messages: &[Message], options: &LlmRequestOptions) -> Value {
        let system = messages
            .iter()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        let conversation = messages
            .iter()
            .filter(|message| message.role != Role::System)
            .collect::<Vec<_>>();

        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "messages": conversation,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n"));
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &options.stop {
            body["stop_sequences"] = json!(stop);
        }
        body
    }
}

pub fn parse_response(body: Value) -> Result<LlmResponse, LlmError> {
    let response: MessagesResponse =
        serde_json::from_value(body).map_err(|err| LlmError::InvalidResponse {
            provider: PROVIDER,
            message: err.to_string(),
        })?;

    let content = response
        .content
        .into_iter()
        .next()
        .filter(|block| block.kind == "text")
        .and_then(|block| block.text)
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        model: response.model,
        usage: Some(Usage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
    })
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_request_body(messages, options);
        let http_error = |source| LlmError::Http {
            provider: PROVIDER,
            source,
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await.map_err(http_error)?;
        let parsed = parse_response(body)?;
        debug!(model = %parsed.model, usage = ?parsed.usage, "Claude message received");
        Ok(parsed)
    }
}
