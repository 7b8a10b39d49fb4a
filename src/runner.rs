use crate::config::Config;
use crate::error::GraderError;
use crate::evaluation::Evaluator;
use crate::factory::LlmFactory;
use crate::models::{CodeAnalysis, GradeReport, Message, ParsedDocument};
use crate::parser::DocumentParser;
use crate::providers::{LlmProvider, Provider};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Inputs of one grading run
#[derive(Debug, Clone, Copy, Default)]
pub struct GradeRequest<'a> {
    /// Document to ingest; its content is the standard answer when none is given
    pub file: Option<&'a Path>,
    pub standard_answer: Option<&'a str>,
    pub student_answer: &'a str,
    /// Overrides the configured provider
    pub provider: Option<&'a str>,
}

/// Orchestrates parsing, provider calls and persistence for the CLI
pub struct Runner {
    config: Config,
    parser: DocumentParser,
    verbose: bool,
}

impl Runner {
    pub fn new(config: Config, verbose: bool) -> Self {
        let parser = DocumentParser::new(&config.parser);
        Self {
            config,
            parser,
            verbose,
        }
    }

    /// Build the provider named by `provider_id`, or the configured one
    pub fn provider(&self, provider_id: Option<&str>) -> Result<Provider> {
        let provider = match provider_id {
            Some(id) => LlmFactory::create(id, &self.config),
            None => LlmFactory::from_config(&self.config),
        };
        provider.with_context(|| {
            format!(
                "Failed to create provider: {}",
                provider_id.unwrap_or(&self.config.provider)
            )
        })
    }

    pub async fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        self.parser
            .parse(path)
            .await
            .with_context(|| format!("Failed to parse document: {}", path.display()))
    }

    /// Parse the optional document and grade the student answer
    pub async fn grade(&self, request: GradeRequest<'_>) -> Result<GradeReport> {
        let document = match request.file {
            Some(path) => Some(self.parse(path).await?),
            None => None,
        };

        let standard_answer = match (request.standard_answer, &document) {
            (Some(standard), _) => standard.to_string(),
            (None, Some(document)) => document.content.clone(),
            (None, None) => bail!("A standard answer or a document is required"),
        };

        let evaluator = Evaluator::new(self.provider(request.provider)?, self.config.rubric.clone())?;
        info!(provider = evaluator.provider().name(), "grading answer");
        let evaluation = evaluator
            .evaluate(&standard_answer, request.student_answer)
            .await
            .context("Failed to evaluate answer")?;

        if self.verbose {
            info!(raw_response = %evaluation.raw_response, "model reply");
        }
        info!(score = ?evaluation.score, "evaluation finished");

        Ok(GradeReport {
            source: request.file.map(Path::to_path_buf),
            document,
            standard_answer,
            student_answer: request.student_answer.to_string(),
            evaluation,
        })
    }

    pub async fn chat(
        &self,
        prompt: &str,
        system: Option<&str>,
        provider_id: Option<&str>,
    ) -> Result<String> {
        let provider = self.provider(provider_id)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        provider.chat(&messages).await.context("Chat request failed")
    }

    pub async fn analyze_image(
        &self,
        image_path: &Path,
        prompt: &str,
        provider_id: Option<&str>,
    ) -> Result<String> {
        let provider = self.provider(provider_id)?;
        provider
            .analyze_image(image_path, prompt)
            .await
            .with_context(|| format!("Failed to analyze image: {}", image_path.display()))
    }

    /// Review the source file at `path`
    pub async fn analyze_code(&self, path: &Path, provider_id: Option<&str>) -> Result<CodeAnalysis> {
        if !path.exists() {
            return Err(GraderError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        let code = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read source file: {}", path.display()))?;

        let provider = self.provider(provider_id)?;
        provider
            .analyze_code(&code)
            .await
            .with_context(|| format!("Failed to analyze code: {}", path.display()))
    }

    /// Store a value as pretty JSON, creating parent directories
    pub fn store_results<T: Serialize>(&self, results: &T, path: &Path) -> Result<()> {
        let json_content = serialize_results(results)?;
        ensure_directory_exists(path)?;
        write_results_file(path, &json_content)?;
        info!(path = %path.display(), "results stored");
        Ok(())
    }
}

fn serialize_results<T: Serialize>(results: &T) -> Result<String> {
    serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
}

fn ensure_directory_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn write_results_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results to: {}", path.display()))
}
