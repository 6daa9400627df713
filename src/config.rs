use std::{env, path::PathBuf};

use thiserror::Error;

pub const DEFAULT_CASES_PATH: &str = "data/cases.json";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone)]
pub struct Config {
    pub cases_path: PathBuf,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Claude,
}

impl LlmProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub default_provider: Option<LlmProviderKind>,
    pub openai: Option<OpenAiConfig>,
    pub claude: Option<ClaudeConfig>,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub organization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_RCA_LLM_PROVIDER must be one of: openai, claude, anthropic, none")]
    UnknownProvider,
    #[error("OPENAI_API_KEY must be set when using the OpenAI provider")]
    MissingOpenAiKey,
    #[error("ANTHROPIC_API_KEY must be set when using the Anthropic provider")]
    MissingAnthropicKey,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let cases_path = var("MCP_RCA_CASES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CASES_PATH));

        let openai = var("OPENAI_API_KEY").map(|api_key| OpenAiConfig {
            api_key,
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            organization: var("OPENAI_ORG_ID"),
        });
        let claude = var("ANTHROPIC_API_KEY").map(|api_key| ClaudeConfig {
            api_key,
            base_url: var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            model: var("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
        });

        let default_provider = match var("MCP_RCA_LLM_PROVIDER")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None => {
                if openai.is_some() {
                    Some(LlmProviderKind::OpenAi)
                } else if claude.is_some() {
                    Some(LlmProviderKind::Claude)
                } else {
                    None
                }
            }
            Some("none") => None,
            Some("openai") => {
                if openai.is_none() {
                    return Err(ConfigError::MissingOpenAiKey);
                }
                Some(LlmProviderKind::OpenAi)
            }
            Some("claude" | "anthropic") => {
                if claude.is_none() {
                    return Err(ConfigError::MissingAnthropicKey);
                }
                Some(LlmProviderKind::Claude)
            }
            Some(_) => return Err(ConfigError::UnknownProvider),
        };

        Ok(Self {
            cases_path,
            llm: LlmConfig {
                default_provider,
                openai,
                claude,
            },
        })
    }
}
