use super::{LlmProvider, read_image};
use crate::config::OllamaConfig;
use crate::error::{GraderError, Result};
use crate::models::{Message, Role};
use crate::rubric::RubricWeights;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "ollama";

/// Client for a self-hosted Ollama server
#[derive(Debug)]
pub struct OllamaProvider {
    http: reqwest::Client,
    host: String,
    config: OllamaConfig,
    rubric: RubricWeights,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: String,
    /// Base64 images attached to this turn
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Options {
    temperature: f64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

impl OllamaProvider {
    pub fn new(config: &OllamaConfig, rubric: RubricWeights) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GraderError::provider(NAME, e))?;

        Ok(Self {
            http,
            host: config.resolve_host(),
            config: config.clone(),
            rubric,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn options(&self) -> Options {
        Options {
            temperature: self.config.temperature,
            num_predict: self.config.max_tokens,
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.host, path);
        debug!(%url, "sending Ollama request");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GraderError::provider(NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or(text);
            warn!(status = status.as_u16(), %url, "Ollama returned an error status");
            return Err(GraderError::provider(
                NAME,
                format!("status {}: {}", status.as_u16(), message),
            ));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GraderError::provider(NAME, format!("malformed response body: {e}")))
    }
}

fn to_wire(message: &Message) -> WireMessage {
    WireMessage {
        role: message.role,
        content: message.content.text(),
        images: message
            .content
            .images()
            .into_iter()
            .map(|data| BASE64.encode(data))
            .collect(),
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rubric(&self) -> &RubricWeights {
        &self.rubric
    }

    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: messages.iter().map(to_wire).collect(),
            stream: false,
            options: self.options(),
        };

        let response: ChatResponse = self.post_json("/api/chat", &request).await?;
        let content = response
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| GraderError::provider(NAME, "response is missing message.content"))?;

        debug!(model = %self.config.chat_model, chars = content.len(), "Ollama chat completed");
        Ok(content)
    }

    async fn analyze_image(&self, image_path: &Path, prompt: &str) -> Result<String> {
        let image = read_image(NAME, image_path).await?;

        let request = GenerateRequest {
            model: &self.config.vision_model,
            prompt,
            images: vec![BASE64.encode(&image.data)],
            stream: false,
            options: self.options(),
        };

        let response: GenerateResponse = self.post_json("/api/generate", &request).await?;
        response
            .response
            .ok_or_else(|| GraderError::provider(NAME, "response is missing the response field"))
    }
}
