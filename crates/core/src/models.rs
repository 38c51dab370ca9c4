use crate::error::QueryError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const PAGE_HEADER_PREFIX: &str = "# page ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentPage {
    pub page_num: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tables: Vec<PageTable>,
}

impl DocumentPage {
    /// Page text followed by every table in pipe-markdown form.
    pub fn render_text(&self) -> String {
        let mut blocks = Vec::new();
        if !self.text.trim().is_empty() {
            blocks.push(self.text.trim_end().to_string());
        }

        for table in &self.tables {
            let mut lines = Vec::with_capacity(table.rows.len() + 2);
            lines.push(format!("| {} |", table.headers.join(" | ")));
            lines.push(format!("| {} |", vec!["---"; table.headers.len()].join(" | ")));
            for row in &table.rows {
                lines.push(format!("| {} |", row.join(" | ")));
            }
            blocks.push(lines.join("\n"));
        }

        blocks.join("\n\n")
    }

    pub fn to_page_text(&self) -> PageText {
        PageText {
            number: self.page_num,
            text: self.render_text(),
        }
    }
}

pub fn render_page_markdown(pages: &[DocumentPage]) -> String {
    pages
        .iter()
        .map(|page| format!("{PAGE_HEADER_PREFIX}{}\n\n{}", page.page_num, page.render_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub parent_page: u32,
    pub text: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Normalized to [0, 1], higher is more similar.
    pub similarity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentPage {
    pub page_num: u32,
    pub full_text: String,
    pub source_chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedPage {
    #[serde(flatten)]
    pub page: ParentPage,
    pub vector_similarity: f64,
    pub llm_reasoning: String,
    pub llm_score: f64,
    pub weighted_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Boolean,
    Number,
    #[serde(rename = "string")]
    Text,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Boolean => "boolean",
            QuestionKind::Number => "number",
            QuestionKind::Text => "string",
        }
    }
}

impl FromStr for QuestionKind {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "boolean" => Ok(QuestionKind::Boolean),
            "number" => Ok(QuestionKind::Number),
            "string" => Ok(QuestionKind::Text),
            _ => Err(QueryError::UnsupportedKind(value.to_string())),
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalAnswer {
    Boolean(bool),
    Number(f64),
    /// A number question with no matching metric, serialized as `"N/A"`.
    NotAvailable,
    Text(String),
}

impl Serialize for FinalAnswer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FinalAnswer::Boolean(value) => serializer.serialize_bool(*value),
            FinalAnswer::Number(value) => serializer.serialize_f64(*value),
            FinalAnswer::NotAvailable => serializer.serialize_str("N/A"),
            FinalAnswer::Text(value) => serializer.serialize_str(value),
        }
    }
}

impl fmt::Display for FinalAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalAnswer::Boolean(value) => write!(f, "{value}"),
            FinalAnswer::Number(value) => write!(f, "{value}"),
            FinalAnswer::NotAvailable => f.write_str("N/A"),
            FinalAnswer::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Answer {
    pub step_by_step_analysis: String,
    pub reasoning_summary: String,
    pub relevant_pages: Vec<u32>,
    pub final_answer: FinalAnswer,
}
