//! Integration tests for the chat and rating endpoints.
//!
//! The router runs against in-memory search, model and key-set fakes, so no
//! Azure service is contacted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::ServiceExt;

use multi_index_chat::api;
use multi_index_chat::auth::{AzureAdValidator, JwksCache};
use multi_index_chat::config::Config;
use multi_index_chat::llm::ChatModel;
use multi_index_chat::models::{ChatMessage, CitedAnswer, Document, DocumentMetadata, SearchResult};
use multi_index_chat::search::{DocumentSearch, NewEntry};
use multi_index_chat::state::AppState;

const YAML: &str = r#"
chat_approach:
  system_prompt: |
    You answer questions about company documents.
    {context}
  default_return_message: "Sorry, I could not find anything relevant."
  documents:
    primary_index_name: handbook
    secondary_index_name: policies
    semantic_configuration_name: default
    rerank_threshold: 0.1
  openai_settings:
    api_version: "2024-02-01"
    deployment: gpt-4o
    embedding_model: text-embedding-ada-002
    temperature: 0.0
    max_tokens: 500
    n: 1
"#;

const TENANT: &str = "tenant-123";
const CLIENT: &str = "client-456";
const KID: &str = "test-kid";
const SIGNING_KEY: &[u8] = include_bytes!("fixtures/test_signing_key.pem");
const N: &str = "ruA0z6UrdxGhEAtEWyEfKBnWq2HHstfSigXYerCJvq3NxFMeeMAPuGJAr1WTIjW26-HtwIQEiH0js7UcA9OOn6Mmvzeq4fITE7RBlSyhaWzK67Ccxh-iZwMCnaL_yRahHOg3MGolMwWlswJRqkcqoMkSQPf-6CmVgVTkTSYOkLGzTMUW1cEVbPLFEiVyEuOhu-iGt72vlunQDhC3eU7-5DsqH7aZhMVRORvgOxSVgAnAhEZReUDLwS87erEne8ZD4Cu7IVaTvCXKvd76oxKRzEvNVcYE_J4wIHAb_sAXXO46TzEr8exs7FhfdZaRLDMvmdvBXxEHNE73L8sTDeAZxQ";
const E: &str = "AQAB";

// ── Fakes ──────────────────────────────────────────────

#[derive(Default)]
struct FakeSearch {
    hits: HashMap<String, Vec<SearchResult>>,
    failing: bool,
    added: Mutex<Vec<(String, NewEntry)>>,
    add_delay: Option<Duration>,
}

#[async_trait]
impl DocumentSearch for FakeSearch {
    async fn search(
        &self,
        index_name: &str,
        _query: &str,
        result_count: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        if self.failing {
            anyhow::bail!("search service returned 503");
        }
        let mut hits = self.hits.get(index_name).cloned().unwrap_or_default();
        hits.truncate(result_count);
        Ok(hits)
    }

    async fn add_texts(&self, index_name: &str, entries: Vec<NewEntry>) -> anyhow::Result<Vec<String>> {
        if let Some(delay) = self.add_delay {
            tokio::time::sleep(delay).await;
        }
        let mut added = self.added.lock();
        let mut ids = Vec::new();
        for entry in entries {
            ids.push(format!("rating-{}", added.len()));
            added.push((index_name.to_string(), entry));
        }
        Ok(ids)
    }
}

#[derive(Default)]
struct FakeModel {
    calls: AtomicUsize,
    last_system_prompt: Mutex<Option<String>>,
    delay: Option<Duration>,
    /// When set, signal `entered` and wait for `release` before answering.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system_prompt.lock() = Some(messages[0].content.clone());
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok("You get twenty days of leave.".to_string())
    }

    async fn complete_cited(&self, messages: &[ChatMessage]) -> anyhow::Result<CitedAnswer> {
        let answer = self.complete(messages).await?;
        Ok(CitedAnswer {
            answer,
            citations: vec![],
        })
    }
}

// ── Helpers ────────────────────────────────────────────

fn config(extra_env: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = [
        ("AZURE_OPENAI_ENDPOINT", "https://aoai.example.com"),
        ("AZURE_OPENAI_API_KEY", "oai-key"),
        ("AZURE_SEARCH_ENDPOINT", "https://search.example.com"),
        ("AZURE_AI_SEARCH_API_KEY", "search-key"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra_env {
        env.insert(k.to_string(), v.to_string());
    }
    Config::from_yaml(YAML, move |k| env.get(k).cloned()).unwrap()
}

fn hit(name: &str, rerank: f64) -> SearchResult {
    SearchResult {
        document: Document {
            content: format!("{name} says employees get twenty days."),
            metadata: DocumentMetadata {
                file_name: Some(name.to_string()),
                container: Some("hr".to_string()),
                ..Default::default()
            },
        },
        similarity_score: 0.03,
        rerank_score: rerank,
    }
}

fn validator() -> Arc<AzureAdValidator> {
    let mut keys = HashMap::new();
    keys.insert(KID.to_string(), DecodingKey::from_rsa_components(N, E).unwrap());
    let cache = JwksCache::with_keys(reqwest::Client::new(), "http://127.0.0.1:9/keys", keys);
    Arc::new(AzureAdValidator::new(TENANT, CLIENT, cache))
}

fn v2_token() -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let claims = json!({
        "iss": format!("https://login.microsoftonline.com/{TENANT}/v2.0"),
        "aud": CLIENT,
        "exp": chrono::Utc::now().timestamp() + 3600,
        "ver": "2.0",
        "sub": "user-1",
    });
    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_rsa_pem(SIGNING_KEY).unwrap()).unwrap()
}

fn app(
    config: Config,
    search: Arc<FakeSearch>,
    model: Arc<FakeModel>,
    validator: Option<Arc<AzureAdValidator>>,
) -> Router {
    api::router(AppState::from_parts(config, search, model, None, validator))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ── Tests ──────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let app = app(config(&[]), Arc::default(), Arc::default(), None);
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_empty_indexes_return_fallback_message() {
    let model = Arc::new(FakeModel::default());
    let app = app(config(&[]), Arc::default(), model.clone(), None);

    let (status, body) = send(app, post_json("/chat", json!({"dialog": "What is the leave policy?"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["answer"]["formatted_answer"],
        "Sorry, I could not find anything relevant."
    );
    assert!(body["answer"]["citations"].as_array().unwrap().is_empty());
    assert!(body["data_points"].as_array().unwrap().is_empty());
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_secondary_hit_outranks_primary() {
    let mut search = FakeSearch::default();
    search
        .hits
        .insert("handbook".into(), vec![hit("handbook.pdf", 0.9), hit("faq.pdf", 0.2)]);
    search.hits.insert("policies".into(), vec![hit("policy.pdf", 0.95)]);
    let model = Arc::new(FakeModel::default());
    let app = app(config(&[]), Arc::new(search), model.clone(), None);

    let (status, body) = send(
        app,
        post_json("/chat", json!({"dialog": "How much leave?", "dialog_id": "d-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["classification"], "unstructured");
    assert_eq!(body["answer"]["formatted_answer"], "You get twenty days of leave.");
    assert_eq!(body["answer"]["query"], "How much leave?");
    let points: Vec<&str> = body["data_points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(
        points,
        vec![
            "policy.pdf: policy.pdf says employees get twenty days.",
            "handbook.pdf: handbook.pdf says employees get twenty days.",
            "faq.pdf: faq.pdf says employees get twenty days.",
        ]
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    let prompt = model.last_system_prompt.lock().clone().unwrap();
    let policy_at = prompt.find("policy.pdf says").unwrap();
    let handbook_at = prompt.find("handbook.pdf says").unwrap();
    assert!(policy_at < handbook_at);
}

#[tokio::test]
async fn test_hits_below_threshold_fall_back() {
    let mut search = FakeSearch::default();
    search.hits.insert("handbook".into(), vec![hit("stale.pdf", 0.05)]);
    let model = Arc::new(FakeModel::default());
    let app = app(config(&[]), Arc::new(search), model.clone(), None);

    let (status, body) = send(app, post_json("/chat", json!({"dialog": "anything"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["answer"]["formatted_answer"],
        "Sorry, I could not find anything relevant."
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_dialog_is_bad_request() {
    let app = app(config(&[]), Arc::default(), Arc::default(), None);
    let (status, body) = send(app, post_json("/chat", json!({"dialog": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Dialog is required");
}

#[tokio::test]
async fn test_search_failure_is_bad_gateway() {
    let search = FakeSearch {
        failing: true,
        ..Default::default()
    };
    let app = app(config(&[]), Arc::new(search), Arc::default(), None);
    let (status, body) = send(app, post_json("/chat", json!({"dialog": "q"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Document retrieval failed");
}

#[tokio::test]
async fn test_slow_model_times_out() {
    let mut search = FakeSearch::default();
    search.hits.insert("handbook".into(), vec![hit("a.pdf", 1.0)]);
    let model = FakeModel {
        delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let app = app(
        config(&[("CHAT_REQUEST_TIMEOUT_SECS", "1")]),
        Arc::new(search),
        Arc::new(model),
        None,
    );
    let (status, body) = send(app, post_json("/chat", json!({"dialog": "q"}))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Request timed out");
}

#[tokio::test]
async fn test_saturated_service_is_busy() {
    let mut search = FakeSearch::default();
    search.hits.insert("handbook".into(), vec![hit("a.pdf", 1.0)]);
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let model = FakeModel {
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    };
    let app = app(
        config(&[("CHAT_MAX_CONCURRENT", "1")]),
        Arc::new(search),
        Arc::new(model),
        None,
    );

    let first = tokio::spawn(send(app.clone(), post_json("/chat", json!({"dialog": "first"}))));
    entered.notified().await;

    let (status, body) = send(app, post_json("/chat", json!({"dialog": "second"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Chat service at capacity");

    release.notify_one();
    let (status, _) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_appends_labelled_entry() {
    let search = Arc::new(FakeSearch::default());
    let app = app(config(&[]), search.clone(), Arc::default(), None);

    let (status, body) = send(
        app,
        post_json(
            "/rate",
            json!({
                "dialog_id": "d-9",
                "rating": false,
                "request": "How much leave?",
                "response": "Ten days."
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"dialog_id": "d-9", "output": ["rating-0"]}));

    let added = search.added.lock();
    assert_eq!(added[0].0, "ratings");
    assert_eq!(added[0].1.content, "How much leave?");
    assert_eq!(added[0].1.metadata["label"], "rating:thumbs-down");
}

#[tokio::test]
async fn test_slow_rating_times_out() {
    let search = Arc::new(FakeSearch {
        add_delay: Some(Duration::from_secs(5)),
        ..Default::default()
    });
    let app = app(
        config(&[("CHAT_REQUEST_TIMEOUT_SECS", "1")]),
        search.clone(),
        Arc::default(),
        None,
    );
    let (status, body) = send(
        app,
        post_json(
            "/rate",
            json!({"dialog_id": "d-2", "rating": true, "request": "q", "response": "a"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Request timed out");
    assert!(search.added.lock().is_empty());
}

#[tokio::test]
async fn test_malformed_body_gets_json_error() {
    let app = app(config(&[]), Arc::default(), Arc::default(), None);
    let req = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");

    let req = Request::builder()
        .method("POST")
        .uri("/chat")
        .body(Body::from(r#"{"dialog":"q"}"#))
        .unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");

    let (status, body) = send(app, post_json("/rate", json!({"dialog_id": "d-3"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");
}

#[tokio::test]
async fn test_dialog_limit_counts_characters() {
    let app = app(config(&[]), Arc::default(), Arc::default(), None);
    let dialog = "é".repeat(4500);
    let (status, body) = send(app, post_json("/chat", json!({"dialog": dialog}))).await;
    assert_eq!(status, StatusCode::OK);
    let query = body["answer"]["query"].as_str().unwrap();
    assert_eq!(query.chars().count(), 4000);
}

#[tokio::test]
async fn test_auth_rejects_missing_header() {
    let app = app(config(&[]), Arc::default(), Arc::default(), Some(validator()));
    let (status, body) = send(app, post_json("/chat", json!({"dialog": "q"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication error: Authorization header is missing");
}

#[tokio::test]
async fn test_auth_rejects_basic_scheme() {
    let model = Arc::new(FakeModel::default());
    let app = app(config(&[]), Arc::default(), model.clone(), Some(validator()));
    let mut req = post_json("/chat", json!({"dialog": "q"}));
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Basic xyz".parse().unwrap());

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["error"],
        "Authentication error: Authorization header must start with 'Bearer'"
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_auth_accepts_valid_token() {
    let app = app(config(&[]), Arc::default(), Arc::default(), Some(validator()));
    let mut req = post_json(
        "/rate",
        json!({"dialog_id": "d-1", "rating": true, "request": "q", "response": "a"}),
    );
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", v2_token()).parse().unwrap(),
    );

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dialog_id"], "d-1");
}

#[tokio::test]
async fn test_health_is_public_when_auth_enabled() {
    let app = app(config(&[]), Arc::default(), Arc::default(), Some(validator()));
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
}
