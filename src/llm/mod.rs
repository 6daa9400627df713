//! LLM providers used for hypothesis generation
//!
//! Providers are plain HTTP clients behind the [`LlmProvider`] trait. The
//! [`LlmManager`] is built once from configuration and injected where needed.

pub mod claude;
pub mod generator;
pub mod openai;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{LlmConfig, LlmProviderKind};

pub use claude::ClaudeProvider;
pub use generator::HypothesisGenerator;
pub use openai::OpenAiProvider;

pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequestOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} API key is required")]
    MissingApiKey { provider: &'static str },
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error: {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
    #[error("provider '{requested}' not available; available providers: {available}")]
    ProviderUnavailable { requested: String, available: String },
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        messages: &[Message],
        options: &LlmRequestOptions,
    ) -> Result<LlmResponse, LlmError>;
}

/// Named providers plus the one used when a caller does not pick.
pub struct LlmManager {
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
    default_provider: String,
}

impl LlmManager {
    pub fn new(
        providers: BTreeMap<String, Arc<dyn LlmProvider>>,
        default_provider: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let default_provider = default_provider.into();
        if !providers.contains_key(&default_provider) {
            return Err(LlmError::ProviderUnavailable {
                available: join_names(&providers),
                requested: default_provider,
            });
        }

        Ok(Self {
            providers,
            default_provider,
        })
    }

    /// `Ok(None)` when generation is disabled (no default provider configured).
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, LlmError> {
        let Some(default_kind) = config.default_provider else {
            info!("no LLM provider configured, hypothesis generation uses placeholders");
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|source| LlmError::Http {
                provider: default_kind.as_str(),
                source,
            })?;

        let mut providers: BTreeMap<String, Arc<dyn LlmProvider>> = BTreeMap::new();
        if let Some(openai) = &config.openai {
            providers.insert(
                LlmProviderKind::OpenAi.as_str().to_string(),
                Arc::new(OpenAiProvider::new(openai.clone(), http.clone())?),
            );
        }
        if let Some(claude) = &config.claude {
            providers.insert(
                LlmProviderKind::Claude.as_str().to_string(),
                Arc::new(ClaudeProvider::new(claude.clone(), http)?),
            );
        }

        let manager = Self::new(providers, default_kind.as_str())?;
        info!(
            default_provider = %manager.default_provider,
            available = %manager.available().join(", "),
            "LLM providers initialized"
        );
        Ok(Some(manager))
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn available(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub async fn generate(
        &self,
        messages: &[Message],
        options: &LlmRequestOptions,
        provider: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        let name = provider.unwrap_or(&self.default_provider);
        let Some(provider) = self.providers.get(name) else {
            return Err(LlmError::ProviderUnavailable {
                requested: name.to_string(),
                available: join_names(&self.providers),
            });
        };
        provider.generate(messages, options).await
    }
}

fn join_names(providers: &BTreeMap<String, Arc<dyn LlmProvider>>) -> String {
    providers.keys().cloned().collect::<Vec<_>>().join(", ")
}
