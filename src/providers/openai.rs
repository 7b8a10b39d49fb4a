use super::{LlmProvider, read_image};
use crate::config::{OPENAI_API_KEY_VAR, OpenAiConfig};
use crate::error::{GraderError, Result};
use crate::models::{ContentPart, Message, MessageContent, Role};
use crate::rubric::RubricWeights;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ImageDetail, ImageUrlArgs,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const NAME: &str = "openai";

/// Client for the hosted OpenAI API or any API-compatible endpoint.
///
/// Does not derive `Debug` so the credential never ends up in logs.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    config: OpenAiConfig,
    rubric: RubricWeights,
}

fn api_error(e: OpenAIError) -> GraderError {
    GraderError::provider(NAME, e)
}

/// Backoff policy that gives up immediately, so failed calls are not retried
fn no_retry() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

impl OpenAiProvider {
    /// Create the provider; the API key comes from config or `OPENAI_API_KEY`
    pub fn new(config: &OpenAiConfig, rubric: RubricWeights) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            GraderError::Configuration(format!(
                "OpenAI API key is not set; configure openai.api_key or {OPENAI_API_KEY_VAR}"
            ))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GraderError::Configuration(format!("cannot build HTTP client: {e}")))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.base_url);

        let client = Client::with_config(openai_config)
            .with_http_client(http)
            .with_backoff(no_retry());

        Ok(Self {
            client,
            config: config.clone(),
            rubric,
        })
    }

    /// Run one chat completion against `model`
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(self.config.temperature as f32)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(api_error)?;

        debug!(%model, base_url = %self.config.base_url, "sending chat completion request");
        let response = self.client.chat().create(request).await.map_err(api_error)?;

        extract_content(response)
    }
}

/// Pull the reply text out of the first choice
fn extract_content(response: CreateChatCompletionResponse) -> Result<String> {
    if let Some(usage) = &response.usage {
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "chat completion usage"
        );
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GraderError::provider(NAME, "response contains no choices"))?;

    choice.message.content.ok_or_else(|| {
        GraderError::provider(NAME, "response is missing choices[0].message.content")
    })
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
    let built = match (message.role, &message.content) {
        (Role::System, content) => ChatCompletionRequestSystemMessageArgs::default()
            .content(content.text())
            .build()
            .map(Into::into),
        (Role::Assistant, content) => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content.text())
            .build()
            .map(Into::into),
        (Role::User, MessageContent::Text(text)) => ChatCompletionRequestUserMessageArgs::default()
            .content(text.clone())
            .build()
            .map(Into::into),
        (Role::User, MessageContent::Parts(parts)) => {
            let parts = parts
                .iter()
                .map(to_content_part)
                .collect::<Result<Vec<_>>>()?;
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map(Into::into)
        }
    };

    built.map_err(api_error)
}

fn to_content_part(part: &ContentPart) -> Result<ChatCompletionRequestUserMessageContentPart> {
    let part = match part {
        ContentPart::Text { text } => ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(text.clone())
            .build()
            .map_err(api_error)?
            .into(),
        ContentPart::Image { mime_type, data } => {
            let image_url = ImageUrlArgs::default()
                .url(data_uri(mime_type, data))
                .detail(ImageDetail::Auto)
                .build()
                .map_err(api_error)?;
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(image_url)
                .build()
                .map_err(api_error)?
                .into()
        }
    };
    Ok(part)
}

fn data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(data))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn rubric(&self) -> &RubricWeights {
        &self.rubric
    }

    async fn chat(&self, messages: &[Message]) -> Result<String> {
        self.complete(&self.config.chat_model, messages).await
    }

    async fn analyze_image(&self, image_path: &Path, prompt: &str) -> Result<String> {
        let image = read_image(NAME, image_path).await?;

        let message = Message {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::Image {
                    mime_type: image.mime_type.to_string(),
                    data: image.data,
                },
            ]),
        };

        self.complete(&self.config.vision_model, &[message]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::with_env_var;
    use mockito::Matcher;
    use serde_json::json;
    use std::io::Write;

    const COMPLETION_BODY: &str = r#"{
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": "SCORE: 95\nCOMMENTS: correct"}, "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18}
    }"#;

    fn provider_for(url: &str) -> OpenAiProvider {
        let config = OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            base_url: format!("{url}/v1"),
            ..OpenAiConfig::default()
        };
        OpenAiProvider::new(&config, RubricWeights::default()).unwrap()
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let result = with_env_var(OPENAI_API_KEY_VAR, None, || {
            OpenAiProvider::new(&OpenAiConfig::default(), RubricWeights::default())
        });
        let err = result.err().unwrap();
        assert!(matches!(err, GraderError::Configuration(_)));
        assert!(err.to_string().contains(OPENAI_API_KEY_VAR));
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri("image/png", &[1, 2, 3]), "data:image/png;base64,AQID");
    }

    #[tokio::test]
    async fn test_chat_sends_model_and_credential() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4",
                "max_tokens": 500,
                "messages": [{"role": "user", "content": "grade this"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION_BODY)
            .create_async()
            .await;

        let reply = provider_for(&server.url())
            .chat(&[Message::user("grade this")])
            .await
            .unwrap();

        assert_eq!(reply, "SCORE: 95\nCOMMENTS: correct");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_evaluate_answer_over_http() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION_BODY)
            .create_async()
            .await;

        let result = provider_for(&server.url())
            .evaluate_answer("The answer is 4.", "4")
            .await
            .unwrap();

        assert_eq!(result.score, Some(95.0));
        assert_eq!(result.comments, "correct");
    }

    #[tokio::test]
    async fn test_analyze_image_sends_data_uri_to_vision_model() {
        let mut image = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        image.write_all(&[1, 2, 3]).unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"model": "gpt-4-vision-preview"})),
                Matcher::Regex(r#""type":"image_url""#.to_string()),
                Matcher::Regex("data:image/png;base64,AQID".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION_BODY)
            .create_async()
            .await;

        let reply = provider_for(&server.url())
            .analyze_image(image.path(), "describe")
            .await
            .unwrap();

        assert!(reply.starts_with("SCORE"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_analyze_image_missing_file_is_not_found() {
        let err = provider_for("http://127.0.0.1:1")
            .analyze_image(Path::new("/no/such/image.jpg"), "describe")
            .await
            .unwrap_err();
        assert!(matches!(err, GraderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_api_error_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "param": null, "code": "invalid_api_key"}}"#)
            .create_async()
            .await;

        let err = provider_for(&server.url())
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::Provider { provider: "openai", .. }));
        assert!(err.to_string().contains("Incorrect API key"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "x", "object": "chat.completion", "created": 1, "model": "gpt-4", "choices": []}"#)
            .create_async()
            .await;

        let err = provider_for(&server.url())
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"unexpected": true}"#)
            .create_async()
            .await;

        let err = provider_for(&server.url())
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, GraderError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_api_key_from_environment_is_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-from-env")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION_BODY)
            .create_async()
            .await;

        let config = OpenAiConfig {
            api_key: None,
            base_url: format!("{}/v1", server.url()),
            ..OpenAiConfig::default()
        };
        let provider = with_env_var(OPENAI_API_KEY_VAR, Some("sk-from-env"), || {
            OpenAiProvider::new(&config, RubricWeights::default())
        })
        .unwrap();

        provider.chat(&[Message::user("hi")]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "internal failure", "type": "server_error", "param": null, "code": null}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = provider_for(&server.url())
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::Provider { provider: "openai", .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "Rate limit reached", "type": "requests", "param": null, "code": "rate_limit_exceeded"}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = provider_for(&server.url())
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::Provider { .. }));
        mock.assert_async().await;
    }
}
