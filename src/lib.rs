//! # multi-index-chat
//!
//! A retrieval-augmented chat backend. Each question is answered from two
//! Azure AI Search indexes whose hits are merged before a single call to an
//! Azure OpenAI chat deployment.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────────┐
//!                   │  POST /chat  │
//!                   └──────┬───────┘
//!                          │
//!             ┌────────────┴────────────┐
//!             ▼                         ▼
//!     ┌───────────────┐         ┌───────────────┐
//!     │ Primary index │         │Secondary index│
//!     │semantic hybrid│         │semantic hybrid│
//!     └───────┬───────┘         └───────┬───────┘
//!             └────────────┬────────────┘
//!                          ▼
//!              ┌───────────────────────┐
//!              │ Merge, filter, rank   │
//!              │ rerank ≥ threshold    │
//!              │ keep top K            │
//!              └───────────┬───────────┘
//!                          │
//!              empty? ─────┴───── otherwise
//!                │                   │
//!                ▼                   ▼
//!       ┌────────────────┐  ┌─────────────────────┐
//!       │Fallback message│  │ Format context      │
//!       │ no model call  │  │ (signed blob URLs)  │
//!       └────────────────┘  │ one chat completion │
//!                           └─────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - YAML + environment configuration, validated at startup
//! - [`models`] - Documents, search hits, request/response bodies
//! - [`search::azure`] - Azure AI Search query and upload client
//! - [`search::merge`] - Merge-filter-rank policy over both result lists
//! - [`llm::embeddings`] - Azure OpenAI embeddings
//! - [`llm::chat`] - Azure OpenAI chat completions, plain or with structured citations
//! - [`storage`] - Shared access signatures for cited blobs
//! - [`conversation`] - The per-question pipeline and its routing decision
//! - [`feedback`] - Ratings appended to a dedicated index
//! - [`auth`] - Entra ID bearer-token validation
//! - [`api`] - Axum handlers and router
//! - [`state`] - Shared application state

pub mod api;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
pub mod storage;
