use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::auth::{jwks_url, AzureAdValidator, JwksCache};
use crate::config::Config;
use crate::conversation::ChatConversation;
use crate::llm::{AzureChatModel, ChatModel};
use crate::search::{AzureSearchClient, DocumentSearch};
use crate::storage::{AzureCredential, BlobSigner, SasTokenService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversation: Arc<ChatConversation>,
    pub search: Arc<dyn DocumentSearch>,
    /// Present when bearer-token enforcement is on.
    pub validator: Option<Arc<AzureAdValidator>>,
    pub chat_semaphore: Arc<Semaphore>,
}

impl AppState {
    /// Build the Azure-backed clients from configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeouts.upstream_secs))
            .build()?;

        let search: Arc<dyn DocumentSearch> = Arc::new(AzureSearchClient::new(
            http_client.clone(),
            config.search.clone(),
            config.retrieval.semantic_configuration_name.clone(),
            config.openai.clone(),
        ));
        let model: Arc<dyn ChatModel> =
            Arc::new(AzureChatModel::new(http_client.clone(), config.openai.clone()));

        let signer: Option<Arc<dyn BlobSigner>> = match &config.storage {
            Some(storage) if config.chat.citations => {
                let credential = AzureCredential::from_parts(
                    config.auth.tenant_id.as_deref(),
                    config.auth.client_id.as_deref(),
                    config.auth.client_secret.as_deref(),
                );
                tracing::info!(
                    "Citations enabled for storage account {} ({})",
                    storage.account_name,
                    if storage.use_account_key() { "account key" } else { "user delegation" }
                );
                Some(Arc::new(SasTokenService::new(http_client.clone(), storage.clone(), credential)))
            }
            _ => None,
        };

        let validator = match (&config.auth.tenant_id, &config.auth.client_id) {
            (Some(tenant), Some(client)) if config.auth.enabled => {
                let keys = JwksCache::new(http_client.clone(), jwks_url(tenant));
                Some(Arc::new(AzureAdValidator::new(tenant.as_str(), client.as_str(), keys)))
            }
            _ => None,
        };

        Ok(Self::from_parts(config, search, model, signer, validator))
    }

    /// Assemble state around already-built collaborators.
    pub fn from_parts(
        config: Config,
        search: Arc<dyn DocumentSearch>,
        model: Arc<dyn ChatModel>,
        signer: Option<Arc<dyn BlobSigner>>,
        validator: Option<Arc<AzureAdValidator>>,
    ) -> Self {
        let conversation = ChatConversation::new(
            search.clone(),
            model,
            signer,
            config.chat.clone(),
            config.retrieval.clone(),
        );
        Self {
            chat_semaphore: Arc::new(Semaphore::new(config.limits.max_concurrent_chats)),
            conversation: Arc::new(conversation),
            search,
            validator,
            config: Arc::new(config),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.request_secs)
    }
}
