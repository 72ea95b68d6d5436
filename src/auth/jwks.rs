//! Entra ID signing keys, cached in-process.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use jsonwebtoken::DecodingKey;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

/// Minimum gap between two fetches triggered by unknown key ids.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

pub fn jwks_url(tenant_id: &str) -> String {
    format!("https://login.microsoftonline.com/{tenant_id}/discovery/v2.0/keys")
}

/// Decoding keys by `kid`.
///
/// Keys are fetched lazily; an unknown `kid` triggers a refresh (key rotation),
/// at most once per [`MIN_REFRESH_INTERVAL`].
pub struct JwksCache {
    keys: RwLock<HashMap<String, DecodingKey>>,
    jwks_uri: String,
    last_refresh: Mutex<Option<Instant>>,
    client: reqwest::Client,
}

impl JwksCache {
    pub fn new(client: reqwest::Client, jwks_uri: impl Into<String>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            jwks_uri: jwks_uri.into(),
            last_refresh: Mutex::new(None),
            client,
        }
    }

    /// A cache that starts with `keys` and counts as freshly refreshed.
    pub fn with_keys(
        client: reqwest::Client,
        jwks_uri: impl Into<String>,
        keys: HashMap<String, DecodingKey>,
    ) -> Self {
        Self {
            keys: RwLock::new(keys),
            jwks_uri: jwks_uri.into(),
            last_refresh: Mutex::new(Some(Instant::now())),
            client,
        }
    }

    /// `Ok(None)` when the key set is reachable but has no such `kid`.
    pub async fn get_key(&self, kid: &str) -> Result<Option<DecodingKey>> {
        let cached = self.keys.read().get(kid).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        self.refresh().await?;
        Ok(self.keys.read().get(kid).cloned())
    }

    pub async fn refresh(&self) -> Result<()> {
        {
            let last = self.last_refresh.lock();
            if matches!(*last, Some(at) if at.elapsed() < MIN_REFRESH_INTERVAL) {
                return Ok(());
            }
        }

        tracing::debug!("Fetching JWKS from {}", self.jwks_uri);
        let resp = self
            .client
            .get(&self.jwks_uri)
            .send()
            .await
            .context("Failed to fetch JWKS")?;
        if !resp.status().is_success() {
            anyhow::bail!("JWKS endpoint returned {}", resp.status());
        }
        let jwks: Jwks = resp.json().await.context("Failed to parse JWKS")?;

        let mut fresh = HashMap::new();
        for jwk in jwks.keys {
            match jwk.to_decoding_key() {
                Ok(Some((kid, key))) => {
                    fresh.insert(kid, key);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping malformed JWK: {e:#}"),
            }
        }

        let count = fresh.len();
        *self.keys.write() = fresh;
        *self.last_refresh.lock() = Some(Instant::now());
        tracing::info!("JWKS cache refreshed with {count} keys");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

impl Jwk {
    /// RSA keys with a `kid` only; anything else is ignored.
    fn to_decoding_key(&self) -> Result<Option<(String, DecodingKey)>> {
        let Some(kid) = &self.kid else {
            return Ok(None);
        };
        if self.kty != "RSA" {
            return Ok(None);
        }
        let n = self.n.as_deref().context("Missing 'n' in RSA key")?;
        let e = self.e.as_deref().context("Missing 'e' in RSA key")?;
        let key = DecodingKey::from_rsa_components(n, e)
            .with_context(|| format!("Invalid RSA components for kid {kid}"))?;
        Ok(Some((kid.clone(), key)))
    }
}
