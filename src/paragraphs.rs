//! Pre-parsed document payloads made of chapter/content paragraphs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const UNTITLED: &str = "Untitled Document";

/// Errors raised while reading a processed-file payload.
#[derive(Debug, Error)]
pub enum ParagraphError {
    /// Payload was not valid JSON or a paragraph was missing a required field.
    #[error("invalid processed file: {0}")]
    Invalid(#[from] serde_json::Error),
    /// Payload contained no paragraphs.
    #[error("paragraphs not found or empty")]
    Empty,
}

/// One paragraph of a parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    /// Chapter the paragraph belongs to.
    pub chapter: String,
    /// Paragraph text.
    pub content: String,
    /// Source page, when the parser reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Document already split into paragraphs by an upstream parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFile {
    /// Paragraphs in document order; never empty once parsed.
    pub paragraphs: Vec<Paragraph>,
}

impl ProcessedFile {
    /// Parse a JSON payload, rejecting documents without paragraphs.
    pub fn from_json(payload: &str) -> Result<Self, ParagraphError> {
        let file: Self = serde_json::from_str(payload)?;
        file.validate()
    }

    /// Convert an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ParagraphError> {
        let file: Self = serde_json::from_value(value)?;
        file.validate()
    }

    fn validate(self) -> Result<Self, ParagraphError> {
        if self.paragraphs.is_empty() {
            return Err(ParagraphError::Empty);
        }
        Ok(self)
    }

    /// Chapter of the first paragraph, used as the document title.
    pub fn title(&self) -> &str {
        self.paragraphs
            .first()
            .map(|paragraph| paragraph.chapter.as_str())
            .filter(|chapter| !chapter.is_empty())
            .unwrap_or(UNTITLED)
    }

    /// Distinct non-empty chapters in first-seen order.
    pub fn sections(&self) -> Vec<String> {
        let mut sections: Vec<String> = Vec::new();
        for paragraph in &self.paragraphs {
            if !paragraph.chapter.is_empty() && !sections.contains(&paragraph.chapter) {
                sections.push(paragraph.chapter.clone());
            }
        }
        sections
    }
}

/// Prompt made of `instruction` followed by every chapter and paragraph, one per line.
pub fn file_prompt(instruction: &str, file: &ProcessedFile) -> String {
    let mut prompt = String::with_capacity(
        instruction.len()
            + file
                .paragraphs
                .iter()
                .map(|p| p.chapter.len() + p.content.len() + 2)
                .sum::<usize>()
            + 1,
    );
    prompt.push_str(instruction);
    prompt.push('\n');
    for paragraph in &file.paragraphs {
        prompt.push_str(&paragraph.chapter);
        prompt.push('\n');
        prompt.push_str(&paragraph.content);
        prompt.push('\n');
    }
    prompt
}
