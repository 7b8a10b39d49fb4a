use crate::error::{GraderError, Result};
use crate::rubric::RubricWeights;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Environment variable holding the hosted API key
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
/// Environment variable holding the Ollama host
pub const OLLAMA_HOST_VAR: &str = "OLLAMA_HOST";

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "grader.json";

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Settings for the hosted OpenAI-compatible API
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key; falls back to `OPENAI_API_KEY` when unset
    pub api_key: Option<String>,
    /// Base URL, overridable for API-compatible services
    pub base_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    /// Sampling temperature (0.0 to 1.0)
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4".to_string(),
            vision_model: "gpt-4-vision-preview".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

impl OpenAiConfig {
    /// Configured key, or the environment one when none is configured
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(OPENAI_API_KEY_VAR).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Settings for a self-hosted Ollama server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Server URL; falls back to `OLLAMA_HOST`, then localhost
    pub host: Option<String>,
    pub chat_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: None,
            chat_model: "llama2".to_string(),
            vision_model: "llava".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

impl OllamaConfig {
    pub fn resolve_host(&self) -> String {
        let host = self
            .host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .or_else(|| std::env::var(OLLAMA_HOST_VAR).ok())
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
        host.trim_end_matches('/').to_string()
    }
}

/// Document conversion backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserBackend {
    Markitdown,
    Mineru,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    pub backend: ParserBackend,
    /// Split converted markdown into structural blocks
    pub split_blocks: bool,
    pub markitdown_command: String,
    pub mineru_command: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: ParserBackend::Markitdown,
            split_blocks: false,
            markitdown_command: "markitdown".to_string(),
            mineru_command: "magic-pdf".to_string(),
        }
    }
}

/// Root configuration, built once and passed to each component
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Provider used when none is given on the command line
    pub provider: String,
    pub openai: OpenAiConfig,
    pub ollama: OllamaConfig,
    pub parser: ParserConfig,
    pub rubric: RubricWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            openai: OpenAiConfig::default(),
            ollama: OllamaConfig::default(),
            parser: ParserConfig::default(),
            rubric: RubricWeights::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, or TOML when the extension is `.toml`
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))
        }
    }

    /// Best-effort load: a missing or malformed file yields the defaults.
    ///
    /// A file that parses but holds invalid values is rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        } else {
            match Self::from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %format!("{e:#}"),
                        "ignoring configuration file, using defaults"
                    );
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges for both providers and the rubric
    pub fn validate(&self) -> Result<()> {
        check_sampling("openai", self.openai.temperature, self.openai.timeout_secs)?;
        check_sampling("ollama", self.ollama.temperature, self.ollama.timeout_secs)?;
        self.rubric.validate()
    }
}

fn check_sampling(section: &str, temperature: f64, timeout_secs: u64) -> Result<()> {
    if !(0.0..=1.0).contains(&temperature) {
        return Err(GraderError::Configuration(format!(
            "{section}.temperature must be within [0, 1], got {temperature}"
        )));
    }
    if timeout_secs == 0 {
        return Err(GraderError::Configuration(format!(
            "{section}.timeout_secs must be greater than zero"
        )));
    }
    Ok(())
}

/// Run `f` with `name` set to `value` (or unset), restoring the previous value.
///
/// Tests touching the process environment take a shared lock so they never
/// observe each other's changes.
#[cfg(test)]
pub(crate) fn with_env_var<T>(name: &str, value: Option<&str>, f: impl FnOnce() -> T) -> T {
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let previous = std::env::var(name).ok();
    // Safety: every test that mutates the environment holds ENV_LOCK
    unsafe {
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
    }

    let result = f();

    unsafe {
        match previous {
            Some(previous) => std::env::set_var(name, previous),
            None => std::env::remove_var(name),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut temp_file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(temp_file, "{}", content).unwrap();
        temp_file
    }

    #[test]
    fn test_config_parsing() {
        let json_content = r#"
{
    "provider": "ollama",
    "openai": {
        "api_key": "sk-test",
        "base_url": "https://example.com/v1",
        "chat_model": "gpt-4o",
        "max_tokens": 200,
        "temperature": 0.5
    },
    "ollama": {
        "host": "http://gpu-box:11434",
        "chat_model": "qwen2",
        "timeout_secs": 120
    },
    "parser": { "backend": "mineru", "split_blocks": true },
    "rubric": { "correctness": 0.6, "completeness": 0.4 }
}
"#;
        let temp_file = write_config(".json", json_content);

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai.chat_model, "gpt-4o");
        assert_eq!(config.openai.max_tokens, 200);
        assert_eq!(config.openai.temperature, 0.5);
        assert_eq!(config.openai.vision_model, "gpt-4-vision-preview");
        assert_eq!(config.ollama.resolve_host(), "http://gpu-box:11434");
        assert_eq!(config.ollama.timeout_secs, 120);
        assert_eq!(config.parser.backend, ParserBackend::Mineru);
        assert!(config.parser.split_blocks);
        assert_eq!(config.rubric.weight("correctness"), Some(0.6));
    }

    #[test]
    fn test_config_defaults() {
        let temp_file = write_config(".json", "{}");

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.provider, "openai");
        assert_eq!(config.openai.max_tokens, 500);
        assert_eq!(config.openai.temperature, 0.7);
        assert_eq!(config.ollama.chat_model, "llama2");
        assert_eq!(config.ollama.vision_model, "llava");
        assert_eq!(config.parser.backend, ParserBackend::Markitdown);
        assert!(!config.parser.split_blocks);
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
provider = "ollama"

[ollama]
chat_model = "mistral"

[rubric]
correctness = 1.0
"#;
        let temp_file = write_config(".toml", toml_content);

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.ollama.chat_model, "mistral");
        assert_eq!(config.rubric.dimensions().collect::<Vec<_>>(), ["correctness"]);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("grader.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_malformed_file_falls_back_to_defaults() {
        let temp_file = write_config(".json", "{ not json");

        assert!(Config::from_file(temp_file.path()).is_err());
        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_rejects_rubric_not_summing_to_one() {
        let temp_file = write_config(
            ".json",
            r#"{"rubric": {"completeness": 0.5, "correctness": 0.4, "originality": 0.2}}"#,
        );

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(matches!(err, GraderError::InvalidRubric(_)));
    }

    #[test]
    fn test_load_rejects_temperature_out_of_range() {
        let temp_file = write_config(".json", r#"{"ollama": {"temperature": 1.5}}"#);

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(matches!(err, GraderError::Configuration(_)));
        assert!(err.to_string().contains("ollama.temperature"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.openai.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(GraderError::Configuration(_))
        ));
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = OpenAiConfig {
            api_key: Some("sk-explicit".to_string()),
            ..OpenAiConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-explicit"));
    }

    #[test]
    fn test_explicit_host_trailing_slash_trimmed() {
        let config = OllamaConfig {
            host: Some("http://127.0.0.1:11434/".to_string()),
            ..OllamaConfig::default()
        };
        assert_eq!(config.resolve_host(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_api_key_falls_back_to_environment() {
        let key = with_env_var(OPENAI_API_KEY_VAR, Some("sk-from-env"), || {
            OpenAiConfig::default().resolve_api_key()
        });
        assert_eq!(key.as_deref(), Some("sk-from-env"));
    }

    #[test]
    fn test_blank_api_key_everywhere_is_none() {
        let config = OpenAiConfig {
            api_key: Some("  ".to_string()),
            ..OpenAiConfig::default()
        };
        let key = with_env_var(OPENAI_API_KEY_VAR, None, || config.resolve_api_key());
        assert_eq!(key, None);
    }

    #[test]
    fn test_host_falls_back_to_environment() {
        let host = with_env_var(OLLAMA_HOST_VAR, Some("http://gpu-box:11434/"), || {
            OllamaConfig::default().resolve_host()
        });
        assert_eq!(host, "http://gpu-box:11434");
    }

    #[test]
    fn test_explicit_host_beats_environment() {
        let config = OllamaConfig {
            host: Some("http://10.0.0.5:11434".to_string()),
            ..OllamaConfig::default()
        };
        let host = with_env_var(OLLAMA_HOST_VAR, Some("http://gpu-box:11434"), || {
            config.resolve_host()
        });
        assert_eq!(host, "http://10.0.0.5:11434");
    }

    #[test]
    fn test_host_defaults_to_localhost() {
        let host = with_env_var(OLLAMA_HOST_VAR, None, || OllamaConfig::default().resolve_host());
        assert_eq!(host, "http://localhost:11434");
    }
}
