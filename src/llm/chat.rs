use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::models::{ChatMessage, CitedAnswer};

const CITED_ANSWER_TOOL: &str = "CitedAnswer";
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// A hosted chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Completion constrained to the `CitedAnswer` tool schema.
    async fn complete_cited(&self, messages: &[ChatMessage]) -> Result<CitedAnswer>;
}

/// Azure OpenAI chat-completions client.
#[derive(Clone)]
pub struct AzureChatModel {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl AzureChatModel {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint, self.config.deployment, self.config.api_version
        )
    }

    fn request<'a>(&self, messages: &'a [ChatMessage], cited: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            n: self.config.n,
            tools: cited.then(|| vec![cited_answer_tool()]),
            tool_choice: cited.then(|| ToolChoice {
                kind: "function",
                function: ToolChoiceFunction {
                    name: CITED_ANSWER_TOOL,
                },
            }),
        }
    }

    /// Send the request, retrying once after a short backoff when the
    /// connection itself fails or times out. HTTP error statuses are not retried.
    async fn send(&self, req: &CompletionRequest<'_>) -> Result<CompletionResponse> {
        let url = self.url();
        let mut attempt = 0;
        let resp = loop {
            attempt += 1;
            match self
                .client
                .post(&url)
                .header("api-key", &self.config.api_key)
                .json(req)
                .send()
                .await
            {
                Ok(resp) => break resp,
                Err(e) if attempt == 1 && is_transient(&e) => {
                    tracing::warn!("Chat completion attempt failed ({e}), retrying once");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) => {
                    return Err(e).context("Failed to call Azure OpenAI chat completions API")
                }
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Azure OpenAI chat API returned {status}: {body}");
        }

        resp.json()
            .await
            .context("Failed to parse Azure OpenAI chat response")
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[async_trait]
impl ChatModel for AzureChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.send(&self.request(messages, false)).await?;
        extract_text(body)
    }

    async fn complete_cited(&self, messages: &[ChatMessage]) -> Result<CitedAnswer> {
        let body = self.send(&self.request(messages, true)).await?;
        extract_cited_answer(body)
    }
}

fn extract_text(body: CompletionResponse) -> Result<String> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .context("Chat completion returned no choices")?;
    Ok(choice.message.content.unwrap_or_default())
}

fn extract_cited_answer(body: CompletionResponse) -> Result<CitedAnswer> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .context("Chat completion returned no choices")?;
    let call = choice
        .message
        .tool_calls
        .into_iter()
        .find(|c| c.function.name == CITED_ANSWER_TOOL)
        .context("Model did not call the CitedAnswer tool")?;
    serde_json::from_str(&call.function.arguments).context("Malformed CitedAnswer tool arguments")
}

/// Function schema the model must fill in for structured answers.
fn cited_answer_tool() -> Tool {
    Tool {
        kind: "function",
        function: ToolFunction {
            name: CITED_ANSWER_TOOL,
            description: "Answer the user question based only on the given sources, and cite the sources used.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": "The answer to the user question, which is based only on the given sources."
                    },
                    "citations": {
                        "type": "array",
                        "description": "Citations from the given sources that justify the answer.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "source_id": {
                                    "type": "integer",
                                    "description": "The integer ID of a SPECIFIC source which justifies the answer."
                                },
                                "url": { "type": "string", "description": "The URL of the source." },
                                "title": { "type": "string", "description": "A short title of the source." },
                                "page_number": {
                                    "type": "integer",
                                    "description": "The page number of the source that justifies the answer."
                                }
                            },
                            "required": ["source_id", "url", "title", "page_number"]
                        }
                    }
                },
                "required": ["answer", "citations"]
            }),
        },
    }
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolFunction,
}

#[derive(Serialize)]
struct ToolFunction {
    name: &'static str,
    description: &'static str,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolChoiceFunction,
}

#[derive(Serialize)]
struct ToolChoiceFunction {
    name: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Deserialize)]
struct ToolCallFunction {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}
