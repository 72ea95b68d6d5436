//! Bearer-token validation for Entra ID (Azure AD) access tokens.
//!
//! Both v1 and v2 tokens are accepted; the unverified `ver` claim selects the
//! expected issuer and audience before the signature is checked.

pub mod jwks;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

pub use jwks::{jwks_url, JwksCache};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication error: Authorization header is missing")]
    MissingHeader,
    #[error("Authentication error: Authorization header must start with 'Bearer'")]
    NotBearer,
    #[error("Authentication error: Token not found")]
    TokenNotFound,
    #[error("Authentication error: Authorization header must be 'Bearer <token>'")]
    TooManyParts,
    #[error("Invalid_header: Unable to parse authentication")]
    InvalidHeader,
    #[error("Invalid_header: Unable to fetch signing keys")]
    JwksUnavailable(#[source] anyhow::Error),
    #[error("Invalid header error: Unable to find appropriate key")]
    UnknownKey,
    #[error("Missing version claim from token. Unable to validate")]
    MissingVersion,
    #[error("Token error: The token has expired")]
    Expired,
    #[error("Token error: Please check the audience and issuer")]
    BadAudienceOrIssuer,
    #[error("Token error: Unable to parse authentication")]
    Unparseable,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingVersion => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => AuthError::BadAudienceOrIssuer,
            _ => AuthError::Unparseable,
        }
    }
}

/// Validated claims, inserted into request extensions for downstream handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Split an `Authorization` header value into its bearer token.
pub fn extract_bearer(value: Option<&str>) -> Result<&str, AuthError> {
    let value = value.filter(|v| !v.is_empty()).ok_or(AuthError::MissingHeader)?;
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [scheme, ..] if !scheme.eq_ignore_ascii_case("bearer") => Err(AuthError::NotBearer),
        [] => Err(AuthError::NotBearer),
        [_] => Err(AuthError::TokenNotFound),
        [_, token] => Ok(*token),
        _ => Err(AuthError::TooManyParts),
    }
}

/// Reads `ver` from the payload without verifying anything.
fn unverified_version(token: &str) -> Result<String, AuthError> {
    let payload = token.split('.').nth(1).ok_or(AuthError::Unparseable)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthError::Unparseable)?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).map_err(|_| AuthError::Unparseable)?;
    match claims.get("ver") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AuthError::MissingVersion),
    }
}

pub struct AzureAdValidator {
    tenant_id: String,
    client_id: String,
    keys: JwksCache,
}

impl AzureAdValidator {
    pub fn new(tenant_id: impl Into<String>, client_id: impl Into<String>, keys: JwksCache) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            keys,
        }
    }

    /// Expected `(issuer, audience)` for a token version.
    pub fn expectations(&self, version: &str) -> (String, String) {
        if version == "1.0" {
            (
                format!("https://sts.windows.net/{}/", self.tenant_id),
                format!("api://{}", self.client_id),
            )
        } else {
            (
                format!("https://login.microsoftonline.com/{}/v2.0", self.tenant_id),
                self.client_id.clone(),
            )
        }
    }

    pub async fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::InvalidHeader)?;
        let kid = header.kid.ok_or(AuthError::UnknownKey)?;
        let key = self
            .keys
            .get_key(&kid)
            .await
            .map_err(AuthError::JwksUnavailable)?
            .ok_or(AuthError::UnknownKey)?;

        let version = unverified_version(token)?;
        let (issuer, audience) = self.expectations(&version);

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        let data = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)?;
        Ok(data.claims)
    }
}

/// Middleware: reject requests without a valid bearer token.
pub async fn require_bearer(
    State(validator): State<Arc<AzureAdValidator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| AuthError::InvalidHeader))
        .transpose()?;
    let token = extract_bearer(value)?;
    let claims = validator.validate(token).await?;
    tracing::debug!("Authenticated subject {:?}", claims.sub);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, EncodingKey, Header};
    use serde_json::json;

    pub(crate) const TENANT: &str = "tenant-123";
    pub(crate) const CLIENT: &str = "client-456";
    pub(crate) const KID: &str = "test-kid";
    const SIGNING_KEY: &[u8] = include_bytes!("../../tests/fixtures/test_signing_key.pem");
    const N: &str = "ruA0z6UrdxGhEAtEWyEfKBnWq2HHstfSigXYerCJvq3NxFMeeMAPuGJAr1WTIjW26-HtwIQEiH0js7UcA9OOn6Mmvzeq4fITE7RBlSyhaWzK67Ccxh-iZwMCnaL_yRahHOg3MGolMwWlswJRqkcqoMkSQPf-6CmVgVTkTSYOkLGzTMUW1cEVbPLFEiVyEuOhu-iGt72vlunQDhC3eU7-5DsqH7aZhMVRORvgOxSVgAnAhEZReUDLwS87erEne8ZD4Cu7IVaTvCXKvd76oxKRzEvNVcYE_J4wIHAb_sAXXO46TzEr8exs7FhfdZaRLDMvmdvBXxEHNE73L8sTDeAZxQ";
    const E: &str = "AQAB";

    pub(crate) fn validator() -> AzureAdValidator {
        let mut keys = HashMap::new();
        keys.insert(KID.to_string(), DecodingKey::from_rsa_components(N, E).unwrap());
        let cache = JwksCache::with_keys(reqwest::Client::new(), "http://127.0.0.1:9/keys", keys);
        AzureAdValidator::new(TENANT, CLIENT, cache)
    }

    pub(crate) fn mint(kid: &str, claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(SIGNING_KEY).unwrap();
        jsonwebtoken::encode(&header, &claims, &key).unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    pub(crate) fn v2_token() -> String {
        mint(
            KID,
            json!({
                "iss": format!("https://login.microsoftonline.com/{TENANT}/v2.0"),
                "aud": CLIENT,
                "exp": in_an_hour(),
                "ver": "2.0",
                "sub": "user-1",
            }),
        )
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(extract_bearer(Some("bearer abc")).unwrap(), "abc");
        assert!(matches!(extract_bearer(None), Err(AuthError::MissingHeader)));
        assert!(matches!(extract_bearer(Some("")), Err(AuthError::MissingHeader)));
        assert!(matches!(extract_bearer(Some("Basic xyz")), Err(AuthError::NotBearer)));
        assert!(matches!(extract_bearer(Some("   ")), Err(AuthError::NotBearer)));
        assert!(matches!(extract_bearer(Some("Bearer")), Err(AuthError::TokenNotFound)));
        assert!(matches!(extract_bearer(Some("Bearer a b")), Err(AuthError::TooManyParts)));
    }

    #[test]
    fn test_error_messages_and_status() {
        assert_eq!(
            AuthError::NotBearer.to_string(),
            "Authentication error: Authorization header must start with 'Bearer'"
        );
        assert_eq!(AuthError::MissingVersion.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::Expired.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_expectations_by_version() {
        let v = validator();
        assert_eq!(
            v.expectations("1.0"),
            (
                format!("https://sts.windows.net/{TENANT}/"),
                format!("api://{CLIENT}")
            )
        );
        assert_eq!(
            v.expectations("2.0"),
            (
                format!("https://login.microsoftonline.com/{TENANT}/v2.0"),
                CLIENT.to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_valid_v2_token() {
        let claims = validator().validate(&v2_token()).await.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.extra["ver"], "2.0");
    }

    #[tokio::test]
    async fn test_valid_v1_token() {
        let token = mint(
            KID,
            json!({
                "iss": format!("https://sts.windows.net/{TENANT}/"),
                "aud": format!("api://{CLIENT}"),
                "exp": in_an_hour(),
                "ver": "1.0",
            }),
        );
        assert!(validator().validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_v1_token_with_v2_audience_is_rejected() {
        let token = mint(
            KID,
            json!({
                "iss": format!("https://sts.windows.net/{TENANT}/"),
                "aud": CLIENT,
                "exp": in_an_hour(),
                "ver": "1.0",
            }),
        );
        let err = validator().validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::BadAudienceOrIssuer));
    }

    #[tokio::test]
    async fn test_wrong_issuer_is_rejected() {
        let token = mint(
            KID,
            json!({
                "iss": "https://login.microsoftonline.com/other/v2.0",
                "aud": CLIENT,
                "exp": in_an_hour(),
                "ver": "2.0",
            }),
        );
        let err = validator().validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::BadAudienceOrIssuer));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let token = mint(
            KID,
            json!({
                "iss": format!("https://login.microsoftonline.com/{TENANT}/v2.0"),
                "aud": CLIENT,
                "exp": chrono::Utc::now().timestamp() - 3600,
                "ver": "2.0",
            }),
        );
        let err = validator().validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired));
        assert_eq!(err.to_string(), "Token error: The token has expired");
    }

    #[tokio::test]
    async fn test_missing_version_is_forbidden() {
        let token = mint(
            KID,
            json!({
                "iss": format!("https://login.microsoftonline.com/{TENANT}/v2.0"),
                "aud": CLIENT,
                "exp": in_an_hour(),
            }),
        );
        let err = validator().validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingVersion));
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let token = mint("rotated-away", json!({"exp": in_an_hour(), "ver": "2.0"}));
        let err = validator().validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownKey));
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid_header() {
        let err = validator().validate("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidHeader));
    }

    #[tokio::test]
    async fn test_unreachable_jwks_endpoint() {
        let cache = JwksCache::new(reqwest::Client::new(), "http://127.0.0.1:9/keys");
        let validator = AzureAdValidator::new(TENANT, CLIENT, cache);
        let err = validator.validate(&v2_token()).await.unwrap_err();
        assert!(matches!(err, AuthError::JwksUnavailable(_)));
    }
}
