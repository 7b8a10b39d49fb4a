//! Document ingestion: normalizes input files into a [`ParsedDocument`].

use crate::config::{ParserBackend, ParserConfig};
use crate::error::{GraderError, Result};
use crate::models::{DocumentKind, ParsedDocument};
use std::path::Path;
use tracing::{debug, info};

pub mod blocks;
pub mod markitdown;
pub mod mineru;

pub use markitdown::MarkitdownConverter;
pub use mineru::MineruConverter;

/// Extensions accepted by [`DocumentParser::parse`], lower case
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["md", "txt", "pdf", "docx", "pptx", "xlsx"];

/// Read as UTF-8 text without conversion
const TEXT_EXTENSIONS: [&str; 2] = ["md", "txt"];

enum Converter {
    Markitdown(MarkitdownConverter),
    Mineru(MineruConverter),
}

impl Converter {
    async fn convert(&self, path: &Path) -> Result<String> {
        match self {
            Converter::Markitdown(c) => c.convert(path).await,
            Converter::Mineru(c) => c.convert(path).await,
        }
    }
}

pub struct DocumentParser {
    converter: Converter,
    split_blocks: bool,
}

impl DocumentParser {
    pub fn new(config: &ParserConfig) -> Self {
        let converter = match config.backend {
            ParserBackend::Markitdown => {
                Converter::Markitdown(MarkitdownConverter::new(&config.markitdown_command))
            }
            ParserBackend::Mineru => Converter::Mineru(MineruConverter::new(&config.mineru_command)),
        };

        Self {
            converter,
            split_blocks: config.split_blocks,
        }
    }

    /// Parse a document into markdown text and, when enabled, structural blocks
    pub async fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        if !path.exists() {
            return Err(GraderError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(GraderError::UnsupportedFormat { extension });
        }

        let content = if TEXT_EXTENSIONS.contains(&extension.as_str()) {
            read_text(path).await?
        } else {
            self.converter.convert(path).await?
        };

        let blocks = if self.split_blocks {
            blocks::split_markdown(&content)
        } else {
            Vec::new()
        };

        info!(
            path = %path.display(),
            chars = content.len(),
            blocks = blocks.len(),
            "parsed document"
        );

        Ok(ParsedDocument {
            kind: DocumentKind::Markdown,
            content,
            blocks,
        })
    }
}

async fn read_text(path: &Path) -> Result<String> {
    debug!(path = %path.display(), "reading text document");
    let bytes = tokio::fs::read(path).await?;
    String::from_utf8(bytes).map_err(|e| GraderError::conversion("text", format!("not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockKind;
    use tempfile::tempdir;

    fn parser() -> DocumentParser {
        DocumentParser::new(&ParserConfig::default())
    }

    #[tokio::test]
    async fn test_parse_markdown_keeps_blocks_empty_by_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Title\nBody text").unwrap();

        let doc = parser().parse(&path).await.unwrap();
        assert_eq!(
            doc,
            ParsedDocument {
                kind: DocumentKind::Markdown,
                content: "# Title\nBody text".to_string(),
                blocks: vec![],
            }
        );
    }

    #[tokio::test]
    async fn test_parse_with_block_splitting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "# Title\nBody text").unwrap();

        let config = ParserConfig {
            split_blocks: true,
            ..ParserConfig::default()
        };
        let doc = DocumentParser::new(&config).parse(&path).await.unwrap();
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks[0].kind, BlockKind::Heading { level: 1 });
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found_for_every_extension() {
        let dir = tempdir().unwrap();
        for extension in SUPPORTED_EXTENSIONS {
            let path = dir.path().join(format!("missing.{extension}"));
            let err = parser().parse(&path).await.unwrap_err();
            assert!(matches!(err, GraderError::NotFound { .. }), "{extension}");
        }
    }

    #[tokio::test]
    async fn test_existing_file_with_unsupported_extension() {
        let dir = tempdir().unwrap();
        for name in ["page.html", "image.png", "archive.tar.gz", "README"] {
            let path = dir.path().join(name);
            std::fs::write(&path, "content").unwrap();

            let err = parser().parse(&path).await.unwrap_err();
            assert!(matches!(err, GraderError::UnsupportedFormat { .. }), "{name}");
        }
    }

    #[tokio::test]
    async fn test_extension_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("NOTES.MD");
        std::fs::write(&path, "hello").unwrap();

        assert_eq!(parser().parse(&path).await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_is_conversion_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = parser().parse(&path).await.unwrap_err();
        assert!(matches!(err, GraderError::Conversion { backend: "text", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_office_formats_delegate_to_converter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slides.pptx");
        std::fs::write(&path, "# Slide 1\n\nHello").unwrap();

        let config = ParserConfig {
            markitdown_command: "cat".to_string(),
            split_blocks: true,
            ..ParserConfig::default()
        };
        let doc = DocumentParser::new(&config).parse(&path).await.unwrap();
        assert_eq!(doc.content, "# Slide 1\n\nHello");
        assert_eq!(doc.blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_converter_failure_propagates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let config = ParserConfig {
            backend: ParserBackend::Mineru,
            mineru_command: "no-such-magic-pdf-binary".to_string(),
            ..ParserConfig::default()
        };
        let err = DocumentParser::new(&config).parse(&path).await.unwrap_err();
        assert!(matches!(err, GraderError::Conversion { backend: "mineru", .. }));
    }
}
