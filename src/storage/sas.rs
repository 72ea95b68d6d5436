//! Read-only blob SAS URLs for citation links.
//!
//! With an account key the token is a service SAS. Without one, a user delegation key is
//! requested with an Entra ID token and cached until shortly before it expires; refreshes
//! are serialized behind a mutex so concurrent requests share one key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::storage::credential::{AzureCredential, STORAGE_SCOPE};

type HmacSha256 = Hmac<Sha256>;

pub const SAS_VERSION: &str = "2022-11-02";
const DELEGATION_KEY_LIFETIME_HOURS: i64 = 1;
/// Refresh the delegation key this long before it expires.
const DELEGATION_REFRESH_MARGIN_MINUTES: i64 = 5;

/// Issues time-limited read URLs for blobs.
#[async_trait]
pub trait BlobSigner: Send + Sync {
    async fn signed_url(&self, container: &str, blob_name: &str) -> Result<String>;
}

/// Key returned by `?restype=service&comp=userdelegationkey`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDelegationKey {
    pub signed_oid: String,
    pub signed_tid: String,
    pub signed_start: String,
    pub signed_expiry: String,
    pub signed_service: String,
    pub signed_version: String,
    pub value: String,
}

impl UserDelegationKey {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.signed_expiry)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .is_some_and(|exp| exp - Duration::minutes(DELEGATION_REFRESH_MARGIN_MINUTES) > now)
    }
}

pub struct SasTokenService {
    client: reqwest::Client,
    config: StorageConfig,
    credential: AzureCredential,
    delegation_key: Mutex<Option<UserDelegationKey>>,
}

impl SasTokenService {
    pub fn new(client: reqwest::Client, config: StorageConfig, credential: AzureCredential) -> Self {
        Self {
            client,
            config,
            credential,
            delegation_key: Mutex::new(None),
        }
    }

    /// SAS query string (without the leading `?`) granting read access to one blob.
    pub async fn sas_token_for_blob(&self, container: &str, blob_name: &str) -> Result<String> {
        let now = Utc::now();
        let expiry = i64::try_from(self.config.sas_expiry_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .with_context(|| {
                format!("SAS expiry of {}s is out of range", self.config.sas_expiry_secs)
            })?;
        let params = SasParams {
            account: &self.config.account_name,
            container,
            blob_name,
            start: now,
            expiry,
        };

        match &self.config.account_key {
            Some(key) => service_sas(&params, key),
            None => {
                let key = self.user_delegation_key().await?;
                user_delegation_sas(&params, &key)
            }
        }
    }

    async fn user_delegation_key(&self) -> Result<UserDelegationKey> {
        let mut cached = self.delegation_key.lock().await;
        let now = Utc::now();
        if let Some(key) = cached.as_ref().filter(|k| k.is_fresh(now)) {
            return Ok(key.clone());
        }

        tracing::info!("Requesting user delegation key for {}", self.config.account_name);
        let key = self.fetch_user_delegation_key(now).await?;
        *cached = Some(key.clone());
        Ok(key)
    }

    async fn fetch_user_delegation_key(&self, now: DateTime<Utc>) -> Result<UserDelegationKey> {
        let token = self.credential.token(&self.client, STORAGE_SCOPE).await?;
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><KeyInfo><Start>{}</Start><Expiry>{}</Expiry></KeyInfo>",
            sas_time(now),
            sas_time(now + Duration::hours(DELEGATION_KEY_LIFETIME_HOURS)),
        );

        let resp = self
            .client
            .post(format!("{}/?restype=service&comp=userdelegationkey", self.config.url))
            .bearer_auth(&token.token)
            .header("x-ms-version", SAS_VERSION)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .context("Failed to request user delegation key")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("User delegation key request returned {status}: {body}");
        }

        let xml = resp.text().await.context("Failed to read user delegation key")?;
        parse_user_delegation_key(&xml)
    }
}

#[async_trait]
impl BlobSigner for SasTokenService {
    async fn signed_url(&self, container: &str, blob_name: &str) -> Result<String> {
        let sas = self.sas_token_for_blob(container, blob_name).await?;
        Ok(format!(
            "{}/{}/{}?{sas}",
            self.config.url,
            container,
            urlencoding::encode(blob_name)
        ))
    }
}

pub fn parse_user_delegation_key(xml: &str) -> Result<UserDelegationKey> {
    quick_xml::de::from_str(xml).context("Malformed user delegation key response")
}

struct SasParams<'a> {
    account: &'a str,
    container: &'a str,
    blob_name: &'a str,
    start: DateTime<Utc>,
    expiry: DateTime<Utc>,
}

impl SasParams<'_> {
    fn canonical_resource(&self) -> String {
        format!("/blob/{}/{}/{}", self.account, self.container, self.blob_name)
    }
}

fn sas_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn sign(key_b64: &str, string_to_sign: &str) -> Result<String> {
    let key = BASE64.decode(key_b64).context("Signing key is not valid base64")?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("Invalid signing key: {e}"))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Service SAS signed with the storage account key.
fn service_sas(params: &SasParams<'_>, account_key: &str) -> Result<String> {
    let start = sas_time(params.start);
    let expiry = sas_time(params.expiry);
    let resource = params.canonical_resource();
    // sp, st, se, resource, si, sip, spr, sv, sr, snapshot, ses, rscc, rscd, rsce, rscl, rsct
    let fields: [&str; 16] = [
        "r",
        &start,
        &expiry,
        &resource,
        "",
        "",
        "https",
        SAS_VERSION,
        "b",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ];
    let string_to_sign = fields.join("\n");
    let sig = sign(account_key, &string_to_sign)?;

    Ok(format!(
        "sv={SAS_VERSION}&st={}&se={}&sr=b&sp=r&spr=https&sig={}",
        urlencoding::encode(&start),
        urlencoding::encode(&expiry),
        urlencoding::encode(&sig)
    ))
}

/// User delegation SAS signed with a delegation key.
fn user_delegation_sas(params: &SasParams<'_>, key: &UserDelegationKey) -> Result<String> {
    let start = sas_time(params.start);
    let expiry = sas_time(params.expiry);
    let resource = params.canonical_resource();
    // sp, st, se, resource, skoid, sktid, skt, ske, sks, skv, saoid, suoid, scid,
    // sip, spr, sv, sr, snapshot, ses, rscc, rscd, rsce, rscl, rsct
    let fields: [&str; 24] = [
        "r",
        &start,
        &expiry,
        &resource,
        &key.signed_oid,
        &key.signed_tid,
        &key.signed_start,
        &key.signed_expiry,
        &key.signed_service,
        &key.signed_version,
        "",
        "",
        "",
        "",
        "https",
        SAS_VERSION,
        "b",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ];
    let string_to_sign = fields.join("\n");
    let sig = sign(&key.value, &string_to_sign)?;

    Ok(format!(
        "sv={SAS_VERSION}&st={}&se={}&sr=b&sp=r&spr=https&skoid={}&sktid={}&skt={}&ske={}&sks={}&skv={}&sig={}",
        urlencoding::encode(&start),
        urlencoding::encode(&expiry),
        urlencoding::encode(&key.signed_oid),
        urlencoding::encode(&key.signed_tid),
        urlencoding::encode(&key.signed_start),
        urlencoding::encode(&key.signed_expiry),
        urlencoding::encode(&key.signed_service),
        urlencoding::encode(&key.signed_version),
        urlencoding::encode(&sig)
    ))
}
