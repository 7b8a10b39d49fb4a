//! LLM backends behind one capability interface.
//!
//! Every operation is a single chat round-trip; the backends differ only in
//! how a request is put on the wire.

use crate::error::{GraderError, Result};
use crate::evaluation::{self, CODE_REVIEW_SYSTEM_PROMPT, GRADER_SYSTEM_PROMPT};
use crate::models::{CodeAnalysis, EvaluationResult, Message};
use crate::rubric::RubricWeights;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

pub mod ollama;
pub mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Capabilities shared by every backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend identifier used in logs and errors
    fn name(&self) -> &'static str;

    /// Dimensions requested in grading prompts
    fn rubric(&self) -> &RubricWeights;

    /// Send a full message history and return the reply text
    async fn chat(&self, messages: &[Message]) -> Result<String>;

    /// Describe an image file according to `prompt`
    async fn analyze_image(&self, image_path: &Path, prompt: &str) -> Result<String>;

    /// Grade a student answer against a standard answer
    async fn evaluate_answer(
        &self,
        standard_answer: &str,
        student_answer: &str,
    ) -> Result<EvaluationResult> {
        let prompt = evaluation::grading_prompt(standard_answer, student_answer, self.rubric());
        debug!(provider = self.name(), "requesting answer evaluation");

        let reply = self
            .chat(&[Message::system(GRADER_SYSTEM_PROMPT), Message::user(prompt)])
            .await?;
        evaluation::parse_evaluation(&reply)
    }

    /// Review a piece of source code
    async fn analyze_code(&self, code: &str) -> Result<CodeAnalysis> {
        let prompt = evaluation::code_review_prompt(code);
        debug!(provider = self.name(), "requesting code analysis");

        let reply = self
            .chat(&[Message::system(CODE_REVIEW_SYSTEM_PROMPT), Message::user(prompt)])
            .await?;
        evaluation::parse_code_analysis(&reply)
    }
}

/// The closed set of supported backends
pub enum Provider {
    OpenAi(OpenAiProvider),
    Ollama(OllamaProvider),
}

#[async_trait]
impl LlmProvider for Provider {
    fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi(p) => p.name(),
            Provider::Ollama(p) => p.name(),
        }
    }

    fn rubric(&self) -> &RubricWeights {
        match self {
            Provider::OpenAi(p) => p.rubric(),
            Provider::Ollama(p) => p.rubric(),
        }
    }

    async fn chat(&self, messages: &[Message]) -> Result<String> {
        match self {
            Provider::OpenAi(p) => p.chat(messages).await,
            Provider::Ollama(p) => p.chat(messages).await,
        }
    }

    async fn analyze_image(&self, image_path: &Path, prompt: &str) -> Result<String> {
        match self {
            Provider::OpenAi(p) => p.analyze_image(image_path, prompt).await,
            Provider::Ollama(p) => p.analyze_image(image_path, prompt).await,
        }
    }
}

/// Image bytes plus the MIME type guessed from the extension
pub(crate) struct ImageFile {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

/// Read an image for a multimodal request.
///
/// A missing path is `NotFound`; any other read failure is a provider error.
pub(crate) async fn read_image(provider: &'static str, path: &Path) -> Result<ImageFile> {
    if !path.exists() {
        return Err(GraderError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let data = tokio::fs::read(path).await.map_err(|e| {
        GraderError::provider(provider, format!("cannot read image {}: {e}", path.display()))
    })?;

    Ok(ImageFile {
        data,
        mime_type: mime_type_for(path),
    })
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
