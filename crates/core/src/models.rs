//! # Beacon Models
//!
//! LLM provider selection for the generative stages. Every supported provider
//! speaks the OpenAI chat-completions protocol; they differ in base URL,
//! authentication header and the environment variable holding the key.

use serde::{Deserialize, Serialize};

use crate::llm::OpenAiChat;

/// Supported LLM providers
///
/// - OpenAI - `OPENAI_API_KEY` (base URL override via `OPENAI_BASE_URL`)
/// - Azure OpenAI - `AZURE_OPENAI_API_KEY`, base URL is the deployment URL
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "azure")]
    AzureOpenAI,
    OpenRouter,
    DeepSeek,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::OpenAI,
            LlmProvider::AzureOpenAI,
            LlmProvider::OpenRouter,
            LlmProvider::DeepSeek,
        ]
    }

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::AzureOpenAI => "Azure OpenAI",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::AzureOpenAI => "AZURE_OPENAI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Default base URL; Azure has none and must be configured
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAI => Some("https://api.openai.com/v1"),
            LlmProvider::AzureOpenAI => None,
            LlmProvider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            LlmProvider::DeepSeek => Some("https://api.deepseek.com/v1"),
        }
    }

    /// Default model when none is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI | LlmProvider::AzureOpenAI => "gpt-4o",
            LlmProvider::OpenRouter => "openai/gpt-4o",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }

    /// Whether this provider accepts a custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI | LlmProvider::AzureOpenAI)
    }
}

/// Configuration for LLM model selection
///
/// ## Example
/// ```rust,ignore
/// use beacon_core::models::{ModelConfig, LlmProvider};
///
/// let config = ModelConfig::with_provider(LlmProvider::DeepSeek, "deepseek-chat");
/// let backend = config.create_backend();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model (or Azure deployment) name
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::OpenAI, LlmProvider::OpenAI.default_model())
    }
}

impl ModelConfig {
    /// Create a new model config with the default provider (OpenAI)
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_provider(LlmProvider::OpenAI, model)
    }

    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Defaults overridden by `OPENAI_BASE_URL` / `OPENAI_CHAT_MODEL_ID`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("OPENAI_CHAT_MODEL_ID") {
            config.model = model;
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = Some(url);
        }
        config
    }

    /// Effective base URL, if any
    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .filter(|_| self.provider.supports_base_url())
            .or_else(|| self.provider.default_base_url().map(str::to_string))
    }

    /// Create a chat client for the configured provider.
    ///
    /// Missing keys are not checked here; the client reports a configuration
    /// error on its first request.
    pub fn create_backend(&self) -> OpenAiChat {
        let api_key = std::env::var(self.provider.api_key_env()).ok();
        OpenAiChat::new(self.provider, self.resolved_base_url(), api_key)
    }
}
