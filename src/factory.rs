use crate::config::Config;
use crate::error::{GraderError, Result};
use crate::providers::{OllamaProvider, OpenAiProvider, Provider};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Identifier of a supported backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = GraderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(GraderError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

pub struct LlmFactory;

impl LlmFactory {
    /// Build the provider named by `provider_id`, bound to its config slice
    pub fn create(provider_id: &str, config: &Config) -> Result<Provider> {
        let kind: ProviderKind = provider_id.parse()?;
        debug!(provider = %kind, "creating LLM provider");

        match kind {
            ProviderKind::OpenAi => Ok(Provider::OpenAi(OpenAiProvider::new(
                &config.openai,
                config.rubric.clone(),
            )?)),
            ProviderKind::Ollama => {
                let provider = OllamaProvider::new(&config.ollama, config.rubric.clone())?;
                debug!(host = provider.host(), "using local Ollama server");
                Ok(Provider::Ollama(provider))
            }
        }
    }

    /// Build the provider selected in the configuration
    pub fn from_config(config: &Config) -> Result<Provider> {
        Self::create(&config.provider, config)
    }
}
