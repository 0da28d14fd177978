//! GCP authentication using a service account
//!
//! Signs an RS256 JWT with the service account key and exchanges it for an
//! OAuth2 access token, cached until shortly before expiry.

use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(serde::Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Service-account token source for Vertex AI and GCS calls
pub struct GcpAuth {
    key_path: PathBuf,
    project_id: String,
    http: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl GcpAuth {
    /// Create from a service account JSON key file
    pub fn from_service_account(key_path: impl AsRef<Path>, project_id: String) -> Result<Self> {
        let key_path = key_path.as_ref().to_path_buf();
        if !key_path.exists() {
            return Err(Error::Config(format!(
                "Service account key not found: {}",
                key_path.display()
            )));
        }

        Ok(Self {
            key_path,
            project_id,
            http: reqwest::Client::new(),
            token: RwLock::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// A valid access token, refreshed when close to expiry
    pub async fn get_token(&self) -> Result<String> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let (access_token, lifetime) = self.fetch_token().await?;
        *slot = Some(CachedToken {
            access_token: access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        });

        tracing::debug!("Refreshed GCP access token for project {}", self.project_id);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<(String, Duration)> {
        let content = tokio::fs::read_to_string(&self.key_path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read service account key {}: {}",
                self.key_path.display(),
                e
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid service account key format: {}", e)))?;

        let assertion = sign_assertion(&key, chrono::Utc::now().timestamp())?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Config(format!("Token exchange request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Config(format!(
                "Token exchange failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Config(format!("Failed to parse token response: {}", e)))?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(TOKEN_LIFETIME);
        Ok((token.access_token, lifetime))
    }

    /// HTTP client carrying a bearer token
    pub async fn authorized_client(&self) -> Result<reqwest::Client> {
        let token = self.get_token().await?;
        let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::Config(format!("Invalid access token: {}", e)))?;
        value.set_sensitive(true);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, value);

        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))
    }
}

/// RS256-signed JWT bearer assertion
fn sign_assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String> {
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let claims = serde_json::json!({
        "iss": key.client_email,
        "scope": SCOPE,
        "aud": key.token_uri,
        "iat": issued_at,
        "exp": issued_at + TOKEN_LIFETIME.as_secs() as i64,
    });
    let signing_input = format!(
        "{}.{}",
        b64.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        b64.encode(claims.to_string().as_bytes())
    );

    let pem = pem::parse(key.private_key.replace("\\n", "\n"))
        .map_err(|e| Error::Config(format!("Failed to parse private key PEM: {}", e)))?;
    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(pem.contents())
        .map_err(|e| Error::Config(format!("Failed to parse private key: {:?}", e)))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            signing_input.as_bytes(),
            &mut signature,
        )
        .map_err(|e| Error::Config(format!("Failed to sign JWT: {:?}", e)))?;

    Ok(format!("{}.{}", signing_input, b64.encode(&signature)))
}
