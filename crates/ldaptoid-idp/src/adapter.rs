//! Adapter dispatch and the retry-once-on-token-rejection entry point.

use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};

use crate::config::IdpConfig;
use crate::entra::EntraAdapter;
use crate::error::{IdpError, IdpResult};
use crate::keycloak::KeycloakAdapter;
use crate::token::TokenCache;
use crate::types::{AdapterOutput, IdpType};
use crate::zitadel::ZitadelAdapter;

/// One identity provider behind a uniform fetch. A tagged variant rather
/// than a trait object: the set of providers is closed and small.
#[derive(Debug)]
pub enum IdpAdapter {
    Keycloak(KeycloakAdapter),
    Entra(EntraAdapter),
    Zitadel(ZitadelAdapter),
}

impl IdpAdapter {
    pub fn from_config(http: reqwest::Client, config: IdpConfig) -> IdpResult<Self> {
        config.validate()?;
        Ok(match config.idp_type {
            IdpType::Keycloak => IdpAdapter::Keycloak(KeycloakAdapter::new(http, config)),
            IdpType::Entra => IdpAdapter::Entra(EntraAdapter::new(http, config)),
            IdpType::Zitadel => IdpAdapter::Zitadel(ZitadelAdapter::new(http, config)),
        })
    }

    pub async fn fetch(&self, token: &str) -> IdpResult<AdapterOutput> {
        match self {
            IdpAdapter::Keycloak(adapter) => adapter.fetch(token).await,
            IdpAdapter::Entra(adapter) => adapter.fetch(token).await,
            IdpAdapter::Zitadel(adapter) => adapter.fetch(token).await,
        }
    }
}

/// The authenticated fetch pipeline: token cache in front of the adapter,
/// with one forced re-acquire when the provider rejects the bearer token.
#[derive(Debug)]
pub struct IdpClient {
    adapter: IdpAdapter,
    tokens: TokenCache,
    config: IdpConfig,
}

impl IdpClient {
    /// Builds the HTTP client, adapter, and token cache for `config`.
    pub fn new(config: IdpConfig) -> IdpResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| IdpError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            adapter: IdpAdapter::from_config(http.clone(), config.clone())?,
            tokens: TokenCache::new(http),
            config,
        })
    }

    /// Fetches the full user/group listing from the provider.
    #[instrument(skip_all, fields(idp = %self.config.idp_type))]
    pub async fn fetch_users_and_groups(&self) -> IdpResult<AdapterOutput> {
        let token = self.tokens.get_token(&self.config).await?;
        match self.adapter.fetch(&token).await {
            Err(IdpError::TokenRejected { status }) => {
                warn!(status, "bearer token rejected, re-acquiring once");
                self.tokens.invalidate(&self.config).await;
                let token = self.tokens.get_token(&self.config).await?;
                let output = self.adapter.fetch(&token).await?;
                info!("fetch succeeded after token refresh");
                Ok(output)
            }
            other => other,
        }
    }
}

/// Classifies a provider response: 2xx passes through, 401/403 signals
/// token rejection, anything else is transient.
pub(crate) async fn check_status(response: reqwest::Response) -> IdpResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(IdpError::TokenRejected {
            status: status.as_u16(),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(IdpError::Transient(format!(
        "HTTP {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}

/// Bearer-authenticated GET returning a JSON payload.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    token: &str,
    extra_headers: &[(&str, &str)],
) -> IdpResult<T> {
    let mut request = http
        .get(url)
        .bearer_auth(token)
        .header("Accept", "application/json");
    for (name, value) in extra_headers {
        request = request.header(*name, *value);
    }
    let response = check_status(request.send().await?).await?;
    response
        .json()
        .await
        .map_err(|err| IdpError::Payload(err.to_string()))
}
