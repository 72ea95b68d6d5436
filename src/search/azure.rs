//! Azure AI Search gateway.
//!
//! Queries use semantic hybrid search: the query text drives keyword matching and the
//! semantic reranker, and its embedding drives a vector query against `content_vector`.
//! The index layout follows the common `id` / `content` / `content_vector` / `metadata`
//! schema, where `metadata` holds a JSON-encoded object.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{OpenAiConfig, SearchServiceConfig};
use crate::llm::embeddings::{embed_batch, embed_single};
use crate::models::{Document, DocumentMetadata, SearchResult};

/// A text entry to append to an index.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub content: String,
    pub metadata: serde_json::Value,
}

/// Retrieval and append operations against named indexes.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// Return at most `result_count` hits for `query`, ordered as the service ranks them.
    async fn search(
        &self,
        index_name: &str,
        query: &str,
        result_count: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Embed and upload `entries`, returning the ids of the new documents.
    async fn add_texts(&self, index_name: &str, entries: Vec<NewEntry>) -> Result<Vec<String>>;
}

pub struct AzureSearchClient {
    client: reqwest::Client,
    search: SearchServiceConfig,
    semantic_configuration: String,
    openai: OpenAiConfig,
}

impl AzureSearchClient {
    pub fn new(
        client: reqwest::Client,
        search: SearchServiceConfig,
        semantic_configuration: impl Into<String>,
        openai: OpenAiConfig,
    ) -> Self {
        Self {
            client,
            search,
            semantic_configuration: semantic_configuration.into(),
            openai,
        }
    }

    fn docs_url(&self, index_name: &str, operation: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{operation}?api-version={}",
            self.search.endpoint,
            urlencoding::encode(index_name),
            self.search.api_version
        )
    }

    fn query_body(&self, query: &str, vector: Vec<f32>, result_count: usize) -> QueryRequest<'_> {
        QueryRequest {
            search: query.to_string(),
            top: result_count,
            select: "id,content,metadata",
            query_type: "semantic",
            semantic_configuration: &self.semantic_configuration,
            captions: "extractive",
            vector_queries: vec![VectorQuery {
                kind: "vector",
                vector,
                fields: "content_vector",
                k: result_count,
            }],
        }
    }
}

#[async_trait]
impl DocumentSearch for AzureSearchClient {
    async fn search(
        &self,
        index_name: &str,
        query: &str,
        result_count: usize,
    ) -> Result<Vec<SearchResult>> {
        if result_count == 0 {
            anyhow::bail!("result_count must be greater than zero");
        }
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }

        let vector = embed_single(&self.client, &self.openai, query)
            .await
            .context("Failed to embed search query")?;

        let resp = self
            .client
            .post(self.docs_url(index_name, "search"))
            .header("api-key", &self.search.api_key)
            .json(&self.query_body(query, vector, result_count))
            .send()
            .await
            .with_context(|| format!("Failed to call Azure AI Search for index {index_name}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Azure AI Search returned {status} for index {index_name}: {body}");
        }

        let body: QueryResponse = resp
            .json()
            .await
            .context("Failed to parse Azure AI Search response")?;

        let mut results: Vec<SearchResult> = body.value.into_iter().map(into_search_result).collect();
        results.truncate(result_count);
        tracing::debug!("Index {index_name} returned {} hits", results.len());
        Ok(results)
    }

    async fn add_texts(&self, index_name: &str, entries: Vec<NewEntry>) -> Result<Vec<String>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = entries.iter().map(|e| e.content.clone()).collect();
        let vectors = embed_batch(&self.client, &self.openai, &texts)
            .await
            .context("Failed to embed texts for upload")?;

        let actions: Vec<IndexAction> = entries
            .into_iter()
            .zip(vectors)
            .map(|(entry, vector)| IndexAction {
                action: "upload",
                id: uuid::Uuid::new_v4().to_string(),
                metadata: entry.metadata.to_string(),
                content: entry.content,
                content_vector: vector,
            })
            .collect();
        let ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();

        let resp = self
            .client
            .post(self.docs_url(index_name, "index"))
            .header("api-key", &self.search.api_key)
            .json(&IndexBatch { value: actions })
            .send()
            .await
            .with_context(|| format!("Failed to upload documents to index {index_name}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Azure AI Search upload returned {status} for index {index_name}: {body}");
        }

        let body: IndexBatchResponse = resp
            .json()
            .await
            .context("Failed to parse Azure AI Search upload response")?;
        if let Some(failed) = body.value.iter().find(|r| !r.status) {
            anyhow::bail!(
                "Upload of {} to index {index_name} failed: {}",
                failed.key,
                failed.error_message.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(ids)
    }
}

fn into_search_result(hit: QueryHit) -> SearchResult {
    let mut metadata = match hit.metadata.as_deref() {
        Some(raw) => serde_json::from_str::<DocumentMetadata>(raw).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unparseable metadata on document {:?}: {e}", hit.id);
            DocumentMetadata::default()
        }),
        None => DocumentMetadata::default(),
    };
    metadata
        .captions
        .extend(hit.captions.unwrap_or_default().into_iter().map(|c| c.text));

    SearchResult {
        document: Document {
            content: hit.content.unwrap_or_default(),
            metadata,
        },
        similarity_score: hit.score,
        rerank_score: hit.reranker_score.unwrap_or(0.0),
    }
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    search: String,
    top: usize,
    select: &'static str,
    query_type: &'static str,
    semantic_configuration: &'a str,
    captions: &'static str,
    vector_queries: Vec<VectorQuery>,
}

#[derive(Serialize)]
struct VectorQuery {
    kind: &'static str,
    vector: Vec<f32>,
    fields: &'static str,
    k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    value: Vec<QueryHit>,
}

#[derive(Deserialize)]
struct QueryHit {
    #[serde(rename = "@search.score")]
    score: f64,
    #[serde(rename = "@search.rerankerScore")]
    reranker_score: Option<f64>,
    #[serde(rename = "@search.captions")]
    captions: Option<Vec<Caption>>,
    id: Option<String>,
    content: Option<String>,
    metadata: Option<String>,
}

#[derive(Deserialize)]
struct Caption {
    text: String,
}

#[derive(Serialize)]
struct IndexBatch {
    value: Vec<IndexAction>,
}

#[derive(Serialize)]
struct IndexAction {
    #[serde(rename = "@search.action")]
    action: &'static str,
    id: String,
    content: String,
    content_vector: Vec<f32>,
    metadata: String,
}

#[derive(Deserialize)]
struct IndexBatchResponse {
    value: Vec<IndexResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexResult {
    key: String,
    status: bool,
    error_message: Option<String>,
}
