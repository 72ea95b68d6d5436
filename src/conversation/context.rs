use std::sync::Arc;

use anyhow::Context;
use futures_util::future::try_join_all;

use crate::conversation::ChatError;
use crate::llm::prompt::sanitize_for_prompt;
use crate::models::SearchResult;
use crate::storage::BlobSigner;

const SEPARATOR: &str = "\n\n";

/// Turns merged documents into the grounding text placed in the system prompt.
#[derive(Clone, Default)]
pub struct ContextFormatter {
    /// Present when citation blocks with signed URLs are enabled.
    signer: Option<Arc<dyn BlobSigner>>,
}

impl ContextFormatter {
    pub fn plain() -> Self {
        Self { signer: None }
    }

    pub fn with_citations(signer: Arc<dyn BlobSigner>) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    pub fn citations_enabled(&self) -> bool {
        self.signer.is_some()
    }

    pub async fn format(&self, documents: &[SearchResult]) -> Result<String, ChatError> {
        match &self.signer {
            None => Ok(format_plain(documents)),
            Some(signer) => format_with_citations(documents, signer.as_ref()).await,
        }
    }
}

/// Document contents separated by blank lines.
pub fn format_plain(documents: &[SearchResult]) -> String {
    documents
        .iter()
        .map(|d| sanitize_for_prompt(&d.document.content))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// `TITLE` / `URL` / `CONTENT` blocks. Any document that cannot be signed fails the whole batch.
pub async fn format_with_citations(
    documents: &[SearchResult],
    signer: &dyn BlobSigner,
) -> Result<String, ChatError> {
    let blocks = try_join_all(documents.iter().map(|d| citation_block(d, signer)))
        .await
        .map_err(ChatError::CitationResolution)?;
    Ok(blocks.join(SEPARATOR))
}

async fn citation_block(result: &SearchResult, signer: &dyn BlobSigner) -> anyhow::Result<String> {
    let meta = &result.document.metadata;
    let file_name = meta
        .file_name
        .as_deref()
        .context("Document metadata has no file_name")?;
    let container = meta
        .container
        .as_deref()
        .context("Document metadata has no container")?;
    let url = signer
        .signed_url(container, file_name)
        .await
        .with_context(|| format!("Failed to sign URL for {container}/{file_name}"))?;
    Ok(format!(
        "TITLE: {file_name}\nURL: {url}\nCONTENT: {}",
        sanitize_for_prompt(&result.document.content)
    ))
}
