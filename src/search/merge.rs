use std::collections::HashSet;

use crate::models::SearchResult;

/// Knobs for combining the primary and secondary result lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    /// Minimum rerank score kept. 0 keeps everything the reranker scored.
    pub threshold: f64,
    pub top_k: usize,
    /// Drop repeated documents, keeping the best-ranked copy.
    pub deduplicate: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            top_k: 3,
            deduplicate: false,
        }
    }
}

/// Ranked, filtered, truncated documents used to ground the prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedContext {
    documents: Vec<SearchResult>,
}

impl MergedContext {
    pub fn documents(&self) -> &[SearchResult] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn into_documents(self) -> Vec<SearchResult> {
        self.documents
    }
}

/// Concatenate both lists, drop entries below the threshold, sort by rerank
/// score (descending, stable) and keep the first `top_k`.
///
/// Equal scores keep concatenation order, so primary hits win ties.
pub fn merge_filter_rank(
    primary: Vec<SearchResult>,
    secondary: Vec<SearchResult>,
    policy: &MergePolicy,
) -> MergedContext {
    let mut documents: Vec<SearchResult> = primary
        .into_iter()
        .chain(secondary)
        // NaN compares false, so unscored entries never pass.
        .filter(|r| r.rerank_score >= policy.threshold)
        .collect();

    // Vec::sort_by is stable.
    documents.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));

    if policy.deduplicate {
        let mut seen = HashSet::new();
        documents.retain(|r| seen.insert(identity(r)));
    }

    documents.truncate(policy.top_k);
    MergedContext { documents }
}

/// Identity of a document for deduplication: its source blob (when known) plus its text.
fn identity(result: &SearchResult) -> (Option<String>, String) {
    let meta = &result.document.metadata;
    let source = match (meta.container.as_deref(), meta.file_name.as_deref()) {
        (Some(container), Some(file)) => Some(format!("{container}/{file}")),
        _ => None,
    };
    (source, result.document.content.clone())
}
