use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while assembling the startup configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    pub chat: ChatOptions,
    pub retrieval: RetrievalOptions,
    pub openai: OpenAiConfig,
    pub search: SearchServiceConfig,
    /// Present when the deployment has a storage account for citation links.
    pub storage: Option<StorageConfig>,
    pub auth: AuthConfig,
    pub timeouts: TimeoutConfig,
    pub limits: LimitConfig,
}

/// Prompting and routing behaviour of the chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    /// System instructions. A `{context}` placeholder is replaced with the formatted documents.
    pub system_prompt: String,
    /// Answer returned verbatim when no document survives the merge step.
    pub default_return_message: String,
    /// Constrain the model to the structured cited-answer tool.
    pub cited_answers: bool,
    /// Emit TITLE/URL/CONTENT blocks with signed URLs instead of bare content.
    pub citations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOptions {
    pub primary_index_name: String,
    pub secondary_index_name: String,
    pub ratings_index_name: String,
    pub semantic_configuration_name: String,
    /// Results requested from each index before merging
    pub results_per_index: usize,
    pub top_k: usize,
    /// Minimum rerank score kept by the merge step (0 disables filtering)
    pub rerank_threshold: f64,
    pub deduplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    /// Chat model deployment name
    pub deployment: String,
    /// Embedding model deployment name
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Number of completions generated per prompt
    pub n: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchServiceConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub account_name: String,
    /// Shared key. When absent, SAS tokens are signed with a user delegation key.
    pub account_key: Option<String>,
    /// Base blob endpoint, e.g. `https://acct.blob.core.windows.net`
    pub url: String,
    pub sas_expiry_secs: u64,
}

impl StorageConfig {
    pub fn use_account_key(&self) -> bool {
        self.account_key.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Require a bearer JWT on /chat and /rate.
    pub enabled: bool,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    /// Used for client-credential tokens when signing with a user delegation key.
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for a whole /chat or /rate request
    pub request_secs: u64,
    /// Per-call HTTP timeout for model and search calls
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 90,
            upstream_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub max_concurrent_chats: usize,
    /// Longer dialogs are cut to this many characters.
    pub max_dialog_chars: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chats: 8,
            max_dialog_chars: 4000,
        }
    }
}

// ─── YAML file layout ────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatConfigFile {
    chat_approach: ChatApproachSection,
}

#[derive(Debug, Deserialize)]
struct ChatApproachSection {
    system_prompt: String,
    default_return_message: String,
    #[serde(default)]
    cited_answers: bool,
    #[serde(default)]
    citations: bool,
    documents: DocumentsSection,
    openai_settings: OpenAiSection,
}

#[derive(Debug, Deserialize)]
struct DocumentsSection {
    primary_index_name: String,
    secondary_index_name: String,
    semantic_configuration_name: String,
    #[serde(default = "default_ratings_index")]
    ratings_index_name: String,
    #[serde(default = "default_results_per_index")]
    results_per_index: usize,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    rerank_threshold: f64,
    #[serde(default)]
    deduplicate: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiSection {
    api_version: String,
    deployment: String,
    embedding_model: String,
    #[serde(default)]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_n")]
    n: u32,
}

fn default_ratings_index() -> String {
    "ratings".to_string()
}

fn default_results_per_index() -> usize {
    10
}

fn default_top_k() -> usize {
    3
}

fn default_max_tokens() -> u32 {
    800
}

fn default_n() -> u32 {
    1
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_SEARCH_API_VERSION: &str = "2023-11-01";
const DEFAULT_SAS_EXPIRY_SECS: u64 = 3600;
/// Longest lifetime Azure accepts for a user delegation SAS.
const MAX_SAS_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

impl Config {
    /// Load `.env`, the YAML file named by `CHAT_CONFIG_PATH` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside local development.
        let _ = dotenvy::dotenv();

        let path = std::env::var("CHAT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("chat_config.yaml"));
        Self::from_file(&path, |key| std::env::var(key).ok())
    }

    pub fn from_file(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml, env)
    }

    /// Build the configuration from YAML text and an environment lookup.
    pub fn from_yaml(yaml: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file: ChatConfigFile = serde_yaml::from_str(yaml)?;
        let approach = file.chat_approach;
        let docs = approach.documents;
        let ai = approach.openai_settings;

        let required = |key: &'static str| env(key).ok_or(ConfigError::MissingEnv(key));

        let openai = OpenAiConfig {
            endpoint: required("AZURE_OPENAI_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required("AZURE_OPENAI_API_KEY")?,
            api_version: ai.api_version,
            deployment: ai.deployment,
            embedding_model: ai.embedding_model,
            temperature: ai.temperature,
            max_tokens: ai.max_tokens,
            n: ai.n,
        };

        let search = SearchServiceConfig {
            endpoint: required("AZURE_SEARCH_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required("AZURE_AI_SEARCH_API_KEY")?,
            api_version: env("AZURE_SEARCH_API_VERSION")
                .unwrap_or_else(|| DEFAULT_SEARCH_API_VERSION.to_string()),
        };

        let storage = match env("STORAGE_ACCOUNT_NAME") {
            Some(account_name) => {
                let url = env("STORAGE_ACCOUNT_URL")
                    .unwrap_or_else(|| format!("https://{account_name}.blob.core.windows.net"));
                Some(StorageConfig {
                    account_key: env("STORAGE_ACCOUNT_KEY"),
                    url: url.trim_end_matches('/').to_string(),
                    sas_expiry_secs: parse_env(&env, "STORAGE_SAS_EXPIRY_SECS")?
                        .unwrap_or(DEFAULT_SAS_EXPIRY_SECS),
                    account_name,
                })
            }
            None => None,
        };

        let auth = AuthConfig {
            enabled: parse_env(&env, "AUTH_ENABLED")?.unwrap_or(false),
            tenant_id: env("AZURE_TENANT_ID"),
            client_id: env("AZURE_CLIENT_ID"),
            client_secret: env("AZURE_CLIENT_SECRET"),
        };

        let mut timeouts = TimeoutConfig::default();
        if let Some(v) = parse_env(&env, "CHAT_REQUEST_TIMEOUT_SECS")? {
            timeouts.request_secs = v;
        }
        if let Some(v) = parse_env(&env, "CHAT_LLM_TIMEOUT_SECS")? {
            timeouts.upstream_secs = v;
        }

        let mut limits = LimitConfig::default();
        if let Some(v) = parse_env(&env, "CHAT_MAX_CONCURRENT")? {
            limits.max_concurrent_chats = v;
        }

        let config = Self {
            bind_addr: env("CHAT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            chat: ChatOptions {
                system_prompt: approach.system_prompt,
                default_return_message: approach.default_return_message,
                cited_answers: approach.cited_answers,
                citations: approach.citations,
            },
            retrieval: RetrievalOptions {
                primary_index_name: docs.primary_index_name,
                secondary_index_name: docs.secondary_index_name,
                ratings_index_name: docs.ratings_index_name,
                semantic_configuration_name: docs.semantic_configuration_name,
                results_per_index: docs.results_per_index,
                top_k: docs.top_k,
                rerank_threshold: docs.rerank_threshold,
                deduplicate: docs.deduplicate,
            },
            openai,
            search,
            storage,
            auth,
            timeouts,
            limits,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "documents.top_k",
                reason: "must be greater than zero".into(),
            });
        }
        if self.retrieval.results_per_index == 0 {
            return Err(ConfigError::Invalid {
                key: "documents.results_per_index",
                reason: "must be greater than zero".into(),
            });
        }
        if self.limits.max_concurrent_chats == 0 {
            return Err(ConfigError::Invalid {
                key: "CHAT_MAX_CONCURRENT",
                reason: "must be greater than zero".into(),
            });
        }
        if self.chat.citations && self.storage.is_none() {
            return Err(ConfigError::Invalid {
                key: "chat_approach.citations",
                reason: "citations need STORAGE_ACCOUNT_NAME".into(),
            });
        }
        if let Some(storage) = &self.storage {
            if !(1..=MAX_SAS_EXPIRY_SECS).contains(&storage.sas_expiry_secs) {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_SAS_EXPIRY_SECS",
                    reason: format!("must be between 1 and {MAX_SAS_EXPIRY_SECS} seconds"),
                });
            }
        }
        if self.auth.enabled && (self.auth.tenant_id.is_none() || self.auth.client_id.is_none()) {
            return Err(ConfigError::Invalid {
                key: "AUTH_ENABLED",
                reason: "auth needs AZURE_TENANT_ID and AZURE_CLIENT_ID".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}
