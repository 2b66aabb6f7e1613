//! Bearer-token provider for the remote biometric backend.
//!
//! Signs short-lived HS512 tokens with the configured client key, caches the
//! current token, and renews it proactively before expiry. Concurrent callers
//! hitting a stale cache coalesce behind a single renewal so the backend never
//! sees a thundering herd of signings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha512};
use tokio::sync::{Mutex, RwLock};

use crate::error::AdminError;

/// Renew this long before actual expiry.
pub const DEFAULT_RENEWAL_BUFFER_MINS: u64 = 5;
/// Default token lifetime.
pub const DEFAULT_TOKEN_LIFETIME_MINS: u64 = 60;

const TOKEN_AUDIENCE: &str = "bws";

#[derive(Debug, Serialize)]
struct Claims<'a> {
    sub: &'a str,
    iss: &'a str,
    aud: &'static str,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Thread-safe provider of signed bearer tokens with proactive renewal.
pub struct TokenProvider {
    client_id: String,
    encoding_key: EncodingKey,
    lifetime: Duration,
    renewal_buffer: Duration,
    cached: RwLock<Option<CachedToken>>,
    renew_lock: Mutex<()>,
    issued: AtomicU64,
}

impl TokenProvider {
    /// Build a provider from the base64-encoded client key.
    ///
    /// Keys shorter than 64 bytes are stretched with SHA-512 to meet the
    /// HS512 key-length floor; portal-issued keys are often 24 bytes.
    pub fn new(
        client_id: &str,
        base64_key: &str,
        lifetime_mins: u64,
        renewal_buffer_mins: u64,
    ) -> Result<Self, AdminError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(AdminError::Configuration(
                "client id must be non-empty".to_string(),
            ));
        }
        if lifetime_mins == 0 {
            return Err(AdminError::Configuration(
                "token lifetime must be positive".to_string(),
            ));
        }
        let mut key_bytes = BASE64.decode(base64_key.trim()).map_err(|error| {
            AdminError::Configuration(format!(
                "signing key is not valid base64 as issued by the portal: {error}"
            ))
        })?;
        if key_bytes.is_empty() {
            return Err(AdminError::Configuration(
                "signing key decodes to zero bytes".to_string(),
            ));
        }
        if key_bytes.len() < 64 {
            key_bytes = Sha512::digest(&key_bytes).to_vec();
        }

        Ok(Self {
            client_id: client_id.to_string(),
            encoding_key: EncodingKey::from_secret(&key_bytes),
            lifetime: Duration::from_secs(lifetime_mins * 60),
            renewal_buffer: Duration::from_secs(renewal_buffer_mins * 60),
            cached: RwLock::new(None),
            renew_lock: Mutex::new(()),
            issued: AtomicU64::new(0),
        })
    }

    /// Return a token valid for at least the renewal buffer, renewing at most
    /// once across concurrent callers.
    pub async fn get_token(&self) -> Result<String, AdminError> {
        if let Some(token) = self.cached_valid_token().await {
            return Ok(token);
        }

        let _renewing = self.renew_lock.lock().await;
        // Another caller may have renewed while we waited.
        if let Some(token) = self.cached_valid_token().await {
            return Ok(token);
        }

        let now = Utc::now();
        let expires_at = now
            + chrono::TimeDelta::from_std(self.lifetime).map_err(|error| {
                AdminError::Configuration(format!("token lifetime out of range: {error}"))
            })?;
        let claims = Claims {
            sub: &self.client_id,
            iss: &self.client_id,
            aud: TOKEN_AUDIENCE,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS512), &claims, &self.encoding_key)
            .map_err(|error| {
                AdminError::Configuration(format!("token signing failed: {error}"))
            })?;
        self.issued.fetch_add(1, Ordering::Relaxed);

        let mut cached = self.cached.write().await;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        drop(cached);

        tracing::debug!(
            event = "auth.token.issued",
            client_id = %self.client_id,
            expires_at = %expires_at,
            "issued bearer token"
        );
        Ok(token)
    }

    /// Drop the cached token so the next call re-signs. Called when the
    /// backend rejects the current token.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
        drop(cached);
        tracing::debug!(
            event = "auth.token.invalidated",
            client_id = %self.client_id,
            "invalidated cached bearer token"
        );
    }

    /// Cumulative number of signing operations performed.
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Configured client identity (used as `sub`/`iss`).
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn cached_valid_token(&self) -> Option<String> {
        let cached = self.cached.read().await;
        let entry = cached.as_ref()?;
        let renewal_threshold = Utc::now()
            + chrono::TimeDelta::from_std(self.renewal_buffer).unwrap_or_default();
        if entry.expires_at > renewal_threshold {
            return Some(entry.token.clone());
        }
        None
    }
}
