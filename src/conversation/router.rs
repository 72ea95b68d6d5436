use std::sync::Arc;

use crate::config::ChatOptions;
use crate::conversation::context::ContextFormatter;
use crate::conversation::ChatError;
use crate::llm::prompt::build_messages;
use crate::llm::ChatModel;
use crate::models::Citation;
use crate::search::MergedContext;

/// Which branch answered the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Nothing survived the merge; the fallback message was returned.
    NoContext,
    /// The model answered from the merged documents.
    Grounded,
}

impl Route {
    pub fn for_context(context: &MergedContext) -> Self {
        if context.is_empty() {
            Route::NoContext
        } else {
            Route::Grounded
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutedAnswer {
    pub route: Route,
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Decides between the fallback message and a single model call.
pub struct ConversationRouter {
    model: Arc<dyn ChatModel>,
    formatter: ContextFormatter,
    options: ChatOptions,
}

impl ConversationRouter {
    pub fn new(model: Arc<dyn ChatModel>, formatter: ContextFormatter, options: ChatOptions) -> Self {
        Self {
            model,
            formatter,
            options,
        }
    }

    pub async fn route(&self, question: &str, context: &MergedContext) -> Result<RoutedAnswer, ChatError> {
        match Route::for_context(context) {
            Route::NoContext => {
                tracing::info!("No documents survived merging; returning fallback message");
                Ok(RoutedAnswer {
                    route: Route::NoContext,
                    answer: self.options.default_return_message.clone(),
                    citations: Vec::new(),
                })
            }
            Route::Grounded => {
                let grounding = self.formatter.format(context.documents()).await?;
                let messages = build_messages(&self.options.system_prompt, &grounding, question);

                let (answer, citations) = if self.options.cited_answers {
                    let cited = self
                        .model
                        .complete_cited(&messages)
                        .await
                        .map_err(ChatError::ModelInvocation)?;
                    (cited.answer, cited.citations.into_iter().map(Citation::from).collect())
                } else {
                    let text = self
                        .model
                        .complete(&messages)
                        .await
                        .map_err(ChatError::ModelInvocation)?;
                    (text, Vec::new())
                };

                tracing::info!(
                    "Model answered from {} documents with {} citations",
                    context.len(),
                    citations.len()
                );
                Ok(RoutedAnswer {
                    route: Route::Grounded,
                    answer,
                    citations,
                })
            }
        }
    }
}
