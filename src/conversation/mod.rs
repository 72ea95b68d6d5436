//! The chat pipeline: retrieve from both indexes, merge, then route.

pub mod context;
pub mod router;

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ChatOptions, RetrievalOptions};
use crate::llm::ChatModel;
use crate::models::{Answer, ApproachType, ChatResponse, SearchResult};
use crate::search::{merge_filter_rank, DocumentSearch, MergePolicy, MergedContext};
use crate::storage::BlobSigner;

pub use context::ContextFormatter;
pub use router::{ConversationRouter, Route, RoutedAnswer};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidQuestion(String),
    #[error("Document retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error("Citation resolution failed: {0:#}")]
    CitationResolution(anyhow::Error),
    #[error("Model invocation failed: {0:#}")]
    ModelInvocation(anyhow::Error),
}

/// Results of the two index queries, kept apart until merging.
#[derive(Debug, Clone, Default)]
pub struct RetrievedDocuments {
    pub primary: Vec<SearchResult>,
    pub secondary: Vec<SearchResult>,
}

/// Everything a single chat turn produced.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub question: String,
    pub context: MergedContext,
    pub answer: RoutedAnswer,
}

impl ChatOutcome {
    pub fn into_response(self) -> ChatResponse {
        let data_points = self
            .context
            .documents()
            .iter()
            .map(|r| format!("{}: {}", r.title(), r.document.content))
            .collect();

        ChatResponse {
            classification: Some(ApproachType::Unstructured),
            answer: Answer {
                formatted_answer: self.answer.answer,
                citations: self.answer.citations,
                query: Some(self.question),
                ..Default::default()
            },
            data_points,
            error: None,
            suggested_classification: None,
            show_retry: false,
        }
    }
}

pub struct ChatConversation {
    search: Arc<dyn DocumentSearch>,
    router: ConversationRouter,
    retrieval: RetrievalOptions,
}

impl ChatConversation {
    pub fn new(
        search: Arc<dyn DocumentSearch>,
        model: Arc<dyn ChatModel>,
        signer: Option<Arc<dyn BlobSigner>>,
        chat: ChatOptions,
        retrieval: RetrievalOptions,
    ) -> Self {
        let formatter = match signer {
            Some(signer) if chat.citations => ContextFormatter::with_citations(signer),
            _ => ContextFormatter::plain(),
        };
        Self {
            search,
            router: ConversationRouter::new(model, formatter, chat),
            retrieval,
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            threshold: self.retrieval.rerank_threshold,
            top_k: self.retrieval.top_k,
            deduplicate: self.retrieval.deduplicate,
        }
    }

    /// Query both indexes concurrently. Either failing fails the turn.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievedDocuments, ChatError> {
        let count = self.retrieval.results_per_index;
        let (primary, secondary) = tokio::try_join!(
            self.search
                .search(&self.retrieval.primary_index_name, question, count),
            self.search
                .search(&self.retrieval.secondary_index_name, question, count),
        )
        .map_err(ChatError::Retrieval)?;

        tracing::info!(
            "Retrieved {} primary and {} secondary documents",
            primary.len(),
            secondary.len()
        );
        Ok(RetrievedDocuments { primary, secondary })
    }

    pub async fn run(&self, question: &str) -> Result<ChatOutcome, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidQuestion("Dialog is required".to_string()));
        }

        let retrieved = self.retrieve(question).await?;
        let context = merge_filter_rank(retrieved.primary, retrieved.secondary, &self.merge_policy());
        tracing::debug!("Merged context holds {} documents", context.len());

        let answer = self.router.route(question, &context).await?;
        Ok(ChatOutcome {
            question: question.to_string(),
            context,
            answer,
        })
    }
}
