//! Entra ID access tokens for the storage data plane.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Public-cloud Entra ID authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// How the service authenticates to Entra ID when no account key is configured.
#[derive(Debug, Clone)]
pub enum AzureCredential {
    /// OAuth2 client-credentials grant for an app registration.
    ClientSecret {
        authority_host: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// Instance metadata endpoint of the hosting VM or App Service.
    ManagedIdentity { client_id: Option<String> },
}

impl AzureCredential {
    /// Client secret when the full triple is configured, managed identity otherwise.
    pub fn from_parts(
        tenant_id: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Self {
        match (tenant_id, client_id, client_secret) {
            (Some(tenant), Some(client), Some(secret)) => AzureCredential::ClientSecret {
                authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
                tenant_id: tenant.to_string(),
                client_id: client.to_string(),
                client_secret: secret.to_string(),
            },
            (_, client, _) => AzureCredential::ManagedIdentity {
                client_id: client.map(str::to_string),
            },
        }
    }

    pub async fn token(&self, client: &reqwest::Client, scope: &str) -> Result<AccessToken> {
        match self {
            AzureCredential::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                client_secret,
            } => {
                let url = format!("{authority_host}/{tenant_id}/oauth2/v2.0/token");
                let resp = client
                    .post(&url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("scope", scope),
                    ])
                    .send()
                    .await
                    .context("Failed to call Entra ID token endpoint")?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("Entra ID token endpoint returned {status}: {body}");
                }
                let body: ClientCredentialResponse = resp
                    .json()
                    .await
                    .context("Failed to parse Entra ID token response")?;
                let expires_at = TimeDelta::try_seconds(body.expires_in)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                    .context("Entra ID returned an out-of-range expires_in")?;
                Ok(AccessToken {
                    token: body.access_token,
                    expires_at,
                })
            }
            AzureCredential::ManagedIdentity { client_id } => {
                // IMDS wants the resource, not the `.default` scope.
                let resource = scope.trim_end_matches("/.default");
                let mut query = vec![("api-version", "2018-02-01"), ("resource", resource)];
                if let Some(id) = client_id {
                    query.push(("client_id", id.as_str()));
                }
                let resp = client
                    .get(IMDS_TOKEN_URL)
                    .header("Metadata", "true")
                    .query(&query)
                    .send()
                    .await
                    .context("Failed to call managed identity endpoint")?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("Managed identity endpoint returned {status}: {body}");
                }
                let body: ManagedIdentityResponse = resp
                    .json()
                    .await
                    .context("Failed to parse managed identity token response")?;
                let expires_on: i64 = body
                    .expires_on
                    .parse()
                    .context("Managed identity returned a non-numeric expires_on")?;
                Ok(AccessToken {
                    token: body.access_token,
                    expires_at: DateTime::from_timestamp(expires_on, 0)
                        .context("Managed identity returned an out-of-range expires_on")?,
                })
            }
        }
    }
}

#[derive(Deserialize)]
struct ClientCredentialResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ManagedIdentityResponse {
    access_token: String,
    /// Unix seconds, sent as a string
    expires_on: String,
}
