use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A retrieved document: the indexed text plus the metadata stored next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: Option<String>,
    pub container: Option<String>,
    /// Extractive captions returned by the semantic ranker
    #[serde(default)]
    pub captions: Vec<String>,
    /// Any other metadata fields stored with the document
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One hit from a semantic hybrid query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    /// Base hybrid (vector + keyword) score
    pub similarity_score: f64,
    /// Semantic reranker score, used as the final sort key
    pub rerank_score: f64,
}

impl SearchResult {
    /// Display title used in citations and data points.
    pub fn title(&self) -> &str {
        self.document
            .metadata
            .file_name
            .as_deref()
            .unwrap_or("untitled")
    }
}

/// Chat request body for `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub dialog: String,
    #[serde(default)]
    pub dialog_id: Option<String>,
}

/// A single message sent to the chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A source the model declares in structured-output mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedSource {
    /// The integer ID of a specific source which justifies the answer.
    pub source_id: i64,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub page_number: Option<i64>,
}

/// Structured answer produced through the `CitedAnswer` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<CitedSource>,
}

/// Citation surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
}

impl From<CitedSource> for Citation {
    fn from(source: CitedSource) -> Self {
        Self {
            id: source.source_id.to_string(),
            title: source.title,
            url: source.url,
            page_number: source.page_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproachType {
    Structured,
    Unstructured,
    ChitChat,
    Continuation,
    Inappropriate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub formatted_answer: String,
    pub citations: Vec<Citation>,
    pub query_generation_prompt: Option<String>,
    pub query: Option<String>,
    pub query_result: Option<String>,
}

/// Response body for `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub classification: Option<ApproachType>,
    pub answer: Answer,
    pub data_points: Vec<String>,
    pub error: Option<String>,
    pub suggested_classification: Option<ApproachType>,
    pub show_retry: bool,
}

/// Request body for `POST /rate`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateRequest {
    pub dialog_id: String,
    /// `true` = thumbs up, `false` = thumbs down, `null` = neutral
    #[serde(default)]
    pub rating: Option<bool>,
    pub request: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateResponse {
    pub dialog_id: String,
    /// Ids of the entries written to the ratings index
    pub output: Vec<String>,
}
