//! OAuth2 client-credentials token cache.
//!
//! Tokens are cached per `(provider, base URL, client id, realm|tenant|org)`
//! key and served while at least [`EXPIRY_BUFFER`] of lifetime remains. Each
//! key has its own async lock, so concurrent callers for the same provider
//! share one in-flight fetch instead of stampeding the token endpoint.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::IdpConfig;
use crate::error::{IdpError, IdpResult};
use crate::types::IdpType;

/// Remaining lifetime in seconds below which a cached token is stale.
pub const EXPIRY_BUFFER_SECS: i64 = 30;

/// Cache key per the provider identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    idp_type: IdpType,
    base_url: String,
    client_id: String,
    scope_discriminator: String,
}

impl TokenKey {
    fn for_config(config: &IdpConfig) -> Self {
        Self {
            idp_type: config.idp_type,
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            scope_discriminator: config.scope_discriminator(),
        }
    }
}

/// A cached access token.
#[derive(Debug, Clone)]
struct TokenEntry {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenEntry {
    fn is_fresh(&self) -> bool {
        self.expires_at - Utc::now() >= ChronoDuration::seconds(EXPIRY_BUFFER_SECS)
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Process-wide token cache. Entries never persist across restarts.
#[derive(Debug)]
pub struct TokenCache {
    http: reqwest::Client,
    slots: Mutex<HashMap<TokenKey, Arc<Mutex<Option<TokenEntry>>>>>,
}

impl TokenCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a valid bearer token, fetching one when the cache is cold or
    /// the entry is inside the expiry buffer.
    #[instrument(skip_all, fields(idp = %config.idp_type))]
    pub async fn get_token(&self, config: &IdpConfig) -> IdpResult<String> {
        let slot = self.slot(config).await;
        let mut entry = slot.lock().await;
        if let Some(token) = entry.as_ref().filter(|token| token.is_fresh()) {
            debug!("using cached token");
            return Ok(token.access_token.clone());
        }

        debug!("acquiring client-credentials token");
        let fresh = self.acquire(config).await?;
        let token = fresh.access_token.clone();
        *entry = Some(fresh);
        Ok(token)
    }

    /// Drops the cached token for this provider, forcing the next
    /// [`get_token`](Self::get_token) to hit the token endpoint.
    pub async fn invalidate(&self, config: &IdpConfig) {
        let slot = self.slot(config).await;
        *slot.lock().await = None;
    }

    async fn slot(&self, config: &IdpConfig) -> Arc<Mutex<Option<TokenEntry>>> {
        let key = TokenKey::for_config(config);
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(key).or_default())
    }

    async fn acquire(&self, config: &IdpConfig) -> IdpResult<TokenEntry> {
        let params = [
            ("grant_type", "client_credentials".to_string()),
            ("client_id", config.client_id.clone()),
            (
                "client_secret",
                config.client_secret.expose_secret().clone(),
            ),
            ("scope", config.token_scope()),
        ];

        let response = self
            .http
            .post(config.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|err| IdpError::TokenEndpoint(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdpError::TokenEndpoint(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| IdpError::TokenEndpoint(format!("bad token payload: {err}")))?;

        let expires_at = Utc::now() + ChronoDuration::seconds(token.expires_in.max(0));
        debug!(%expires_at, "token acquired");
        Ok(TokenEntry {
            access_token: token.access_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_freshness_respects_buffer() {
        let fresh = TokenEntry {
            access_token: "t".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
        };
        assert!(fresh.is_fresh());

        let nearly_expired = TokenEntry {
            access_token: "t".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(10),
        };
        assert!(!nearly_expired.is_fresh());

        let expired = TokenEntry {
            access_token: "t".into(),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        };
        assert!(!expired.is_fresh());
    }
}
