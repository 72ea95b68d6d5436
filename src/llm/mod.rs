//! Clients for the hosted Azure OpenAI deployments.

pub mod chat;
pub mod embeddings;
pub mod prompt;

pub use chat::{AzureChatModel, ChatModel};
