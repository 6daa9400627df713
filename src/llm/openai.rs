use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, Message, Usage, DEFAULT_MAX_TOKENS,
    DEFAULT_TEMPERATURE,
};

const PROVIDER: &str = "OpenAI";

/// Chat completions client for the OpenAI API.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    organization: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig, http: reqwest::Client) -> Result<Self, LlmError> {
        let api_key = config.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey { provider: PROVIDER });
        }

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url,
            model: config.model,
            organization: config.organization,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn build_request_body(&self, messages: &[Message], options: &LlmRequestOptions) -> Value {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &options.stop {
            body["stop"] = json!(stop);
        }
        body
    }
}

pub fn parse_response(body: Value) -> Result<LlmResponse, LlmError> {
    let response: ChatResponse =
        serde_json::from_value(body).map_err(|err| LlmError::InvalidResponse {
            provider: PROVIDER,
            message: format!("expected object with 'choices' and 'model': {err}"),
        })?;

    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::InvalidResponse {
            provider: PROVIDER,
            message: "empty choices array".to_string(),
        });
    };

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        model: response.model,
        usage: response.usage.map(|usage| Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }),
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_request_body(messages, options);
        let mut request = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(organization) = &self.organization {
            request = request.header("OpenAI-Organization", organization);
        }

        let http_error = |source| LlmError::Http {
            provider: PROVIDER,
            source,
        };
        let response = request.send().await.map_err(http_error)?;
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
        debug!(model = %parsed.model, usage = ?parsed.usage, "OpenAI completion received");
        Ok(parsed)
    }
}
