use crate::models::{BlockKind, CodeAnalysis, GradeReport, ParsedDocument};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Human-readable rendering used by [`OutputFormat::Plain`]
pub trait PlainText {
    fn write_plain(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn plain_text(&self) -> String
    where
        Self: Sized,
    {
        Plain(self).to_string()
    }
}

struct Plain<'a, T>(&'a T);

impl<T: PlainText> fmt::Display for Plain<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.write_plain(f)
    }
}

/// Render a result in the given format
pub fn render<T: PlainText + Serialize>(value: &T, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Plain => Ok(value.plain_text()),
        OutputFormat::Json => serde_json::to_string_pretty(value),
    }
}

/// Print a result to stdout in the given format
pub fn print_results<T: PlainText + Serialize>(value: &T, format: OutputFormat) {
    match render(value, format) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}

impl PlainText for GradeReport {
    fn write_plain(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let evaluation = &self.evaluation;

        writeln!(out, "=== Grade Report ===")?;
        if let Some(source) = &self.source {
            writeln!(out, "Source: {}", source.display())?;
        }
        writeln!(out)?;

        match evaluation.score {
            Some(score) => writeln!(out, "Score: {:.1} / 100", score)?,
            None => writeln!(out, "Score: n/a")?,
        }

        if !evaluation.dimension_scores.is_empty() {
            writeln!(out, "{:<15} {:<8}", "Dimension", "Score")?;
            writeln!(out, "{}", "-".repeat(24))?;
            for (dimension, score) in &evaluation.dimension_scores {
                writeln!(out, "{:<15} {:<8.1}", dimension, score)?;
            }
        }

        write!(out, "\nComments: {}", evaluation.comments)?;
        if !evaluation.suggestions.is_empty() {
            write!(out, "\nSuggestions: {}", evaluation.suggestions)?;
        }
        Ok(())
    }
}

impl PlainText for ParsedDocument {
    fn write_plain(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blocks.is_empty() {
            return out.write_str(&self.content);
        }

        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.write_str("\n\n")?;
            }
            write!(out, "[{}] ", block.position)?;
            match &block.kind {
                BlockKind::Heading { level } => write!(out, "heading {}", level)?,
                BlockKind::Paragraph => out.write_str("paragraph")?,
                BlockKind::Code { language: Some(language) } => write!(out, "code {}", language)?,
                BlockKind::Code { language: None } => out.write_str("code")?,
                BlockKind::Table => out.write_str("table")?,
                BlockKind::Formula => out.write_str("formula")?,
            }
            write!(out, "\n{}", block.text)?;
        }
        Ok(())
    }
}

impl PlainText for CodeAnalysis {
    fn write_plain(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            out,
            "Quality: {}\nIssues: {}\nSuggestions: {}",
            self.quality, self.issues, self.suggestions
        )
    }
}

impl PlainText for String {
    fn write_plain(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        out.write_str(self)
    }
}
