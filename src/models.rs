use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One piece of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { mime_type: String, data: Vec<u8> },
}

/// Text or multimodal message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the message, images skipped
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Image payloads carried by the message, in order
    pub fn images(&self) -> Vec<&[u8]> {
        match self {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Image { data, .. } => Some(data.as_slice()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }
}

/// One turn in a conversation sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Outcome of grading one answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Overall score (0 to 100); `None` when the reply carried no score
    pub score: Option<f64>,
    /// Per-dimension scores (0 to 100) reported by the model
    #[serde(default)]
    pub dimension_scores: BTreeMap<String, f64>,
    pub comments: String,
    pub suggestions: String,
    /// Raw model reply
    pub raw_response: String,
}

/// Outcome of a code review request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    pub quality: String,
    pub issues: String,
    pub suggestions: String,
    pub raw_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockKind {
    Heading { level: u8 },
    Paragraph,
    Code { language: Option<String> },
    Table,
    Formula,
}

/// One structural unit of a parsed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub kind: BlockKind,
    pub text: String,
    /// Index of the block in document order
    pub position: usize,
}

/// Normalized output of document ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub kind: DocumentKind,
    pub content: String,
    pub blocks: Vec<ContentBlock>,
}

/// Complete result of one grading run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    /// Source document, if one was supplied
    pub source: Option<PathBuf>,
    pub document: Option<ParsedDocument>,
    pub standard_answer: String,
    pub student_answer: String,
    pub evaluation: EvaluationResult,
}
