use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;

/// Maximum characters sent per text to the embedding API.
/// ada-002 and text-embedding-3 accept 8 191 tokens; prose averages ~4 chars/token,
/// dense text closer to 2.5, so 16 000 chars stays under the limit.
const MAX_EMBED_CHARS: usize = 16_000;

/// Azure OpenAI accepts up to 16 inputs per embeddings request.
const BATCH_SIZE: usize = 16;

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub(crate) fn embeddings_url(config: &OpenAiConfig) -> String {
    format!(
        "{}/openai/deployments/{}/embeddings?api-version={}",
        config.endpoint, config.embedding_model, config.api_version
    )
}

/// Generate embeddings for a batch of texts with the configured embedding deployment.
pub async fn embed_batch(
    client: &reqwest::Client,
    config: &OpenAiConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let url = embeddings_url(config);
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(BATCH_SIZE) {
        let req = EmbedRequest {
            input: chunk
                .iter()
                .map(|t| truncate_for_embedding(t).to_string())
                .collect(),
        };

        let resp = client
            .post(&url)
            .header("api-key", &config.api_key)
            .json(&req)
            .send()
            .await
            .context("Failed to call Azure OpenAI embeddings API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Azure OpenAI embeddings API returned {status}: {body}");
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Azure OpenAI embeddings response")?;

        all_embeddings.extend(order_embeddings(body.data, chunk.len())?);
    }

    Ok(all_embeddings)
}

/// Generate embedding for a single text.
pub async fn embed_single(
    client: &reqwest::Client,
    config: &OpenAiConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_batch(client, config, &[text.to_string()]).await?;
    results.into_iter().next().context("No embedding returned")
}

/// The API tags each vector with the index of its input; restore input order.
fn order_embeddings(mut data: Vec<EmbedData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        anyhow::bail!(
            "Embeddings API returned {} vectors for {expected} inputs",
            data.len()
        );
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Serialize)]
struct EmbedRequest {
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
