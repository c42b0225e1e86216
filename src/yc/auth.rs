//! IAM authentication
//!
//! Both credential kinds are exchanged for a short-lived IAM token at the
//! IAM tokens endpoint. The token is cached and refreshed once less than
//! five minutes of validity remain.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cloudnap_core::{Error, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const JWT_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Authorized key of a service account, as exported by `yc iam key create`
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Key ID, sent as the JWT `kid`
    pub id: String,
    /// Service account the key belongs to
    pub service_account_id: String,
    /// PEM private key, possibly preceded by a comment line
    pub private_key: String,
}

impl ServiceAccountKey {
    /// Read a key JSON file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account key {}", path.display()))?;
        let key: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid service account key {}", path.display()))?;
        if key.id.is_empty() || key.service_account_id.is_empty() {
            bail!("service account key {} is missing id or service_account_id", path.display());
        }
        Ok(key)
    }

    /// Private key PEM without any leading comment lines
    fn pem(&self) -> &str {
        match self.private_key.find("-----BEGIN") {
            Some(start) => &self.private_key[start..],
            None => &self.private_key,
        }
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("id", &self.id)
            .field("service_account_id", &self.service_account_id)
            .finish_non_exhaustive()
    }
}

/// Credentials exchanged for IAM tokens
#[derive(Clone)]
pub enum Credentials {
    /// Service account authorized key
    ServiceAccountKey(ServiceAccountKey),
    /// Yandex Passport OAuth token
    OAuthToken(String),
}

impl Credentials {
    /// Pick credentials, service account key first
    pub fn resolve(sa_key_file: Option<&Path>, token: Option<&str>) -> anyhow::Result<Self> {
        if let Some(path) = sa_key_file {
            return Ok(Self::ServiceAccountKey(ServiceAccountKey::from_file(path)?));
        }
        match token.map(str::trim) {
            Some(token) if !token.is_empty() => Ok(Self::OAuthToken(token.to_string())),
            _ => bail!(
                "no credentials: pass --sa-key (YC_SERVICE_ACCOUNT_KEY_FILE) or --token (YC_TOKEN)"
            ),
        }
    }

    /// Credential kind for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceAccountKey(_) => "service_account_key",
            Self::OAuthToken(_) => "oauth_token",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccountKey(key) => f.debug_tuple("ServiceAccountKey").field(key).finish(),
            Self::OAuthToken(_) => f.write_str("OAuthToken(***)"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Sign the PS256 JWT exchanged for an IAM token
pub fn sign_jwt(key: &ServiceAccountKey, audience: &str, now: DateTime<Utc>) -> anyhow::Result<String> {
    let mut header = Header::new(Algorithm::PS256);
    header.kid = Some(key.id.clone());

    let iat = now.timestamp();
    let claims = JwtClaims {
        iss: key.service_account_id.clone(),
        aud: audience.to_string(),
        iat,
        exp: iat + JWT_LIFETIME_SECS,
    };

    let signing_key =
        EncodingKey::from_rsa_pem(key.pem().as_bytes()).context("Invalid service account private key")?;
    Ok(encode(&header, &claims, &signing_key)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
    expires_at: DateTime<Utc>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Caching IAM token source
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: Credentials,
    iam_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider exchanging `credentials` at `iam_url`
    pub fn new(http: reqwest::Client, credentials: Credentials, iam_url: impl Into<String>) -> Self {
        Self {
            http,
            credentials,
            iam_url: iam_url.into(),
            cached: Mutex::new(None),
        }
    }

    /// Current IAM token, exchanging credentials when needed
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - now > ChronoDuration::minutes(REFRESH_MARGIN_MINUTES) {
                return Ok(token.token.clone());
            }
            debug!(expires_at = %token.expires_at, "IAM token close to expiry, refreshing");
        }

        let fresh = self.exchange(now).await?;
        info!(
            credentials = self.credentials.kind(),
            expires_at = %fresh.expires_at,
            "IAM token obtained"
        );
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let body = match &self.credentials {
            Credentials::ServiceAccountKey(key) => {
                let jwt = sign_jwt(key, &self.iam_url, now)
                    .map_err(|e| Error::Cloud(format!("sign iam jwt: {e:#}")))?;
                json!({ "jwt": jwt })
            }
            Credentials::OAuthToken(token) => json!({ "yandexPassportOauthToken": token }),
        };

        let response = self
            .http
            .post(&self.iam_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Cloud(format!("iam token request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Cloud(format!("iam token request: {status}: {text}")));
        }

        let parsed: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Cloud(format!("iam token response: {e}")))?;
        Ok(CachedToken {
            token: parsed.iam_token,
            expires_at: parsed.expires_at,
        })
    }
}
