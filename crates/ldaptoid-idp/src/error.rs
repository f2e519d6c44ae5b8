//! Error types for IdP ingestion.

use thiserror::Error;

/// Result type alias using [`IdpError`].
pub type IdpResult<T> = Result<T, IdpError>;

/// Errors that can occur while talking to the identity provider.
#[derive(Debug, Error)]
pub enum IdpError {
    /// Provider configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The token endpoint refused the client-credentials request.
    #[error("token endpoint error: {0}")]
    TokenEndpoint(String),

    /// The IdP rejected our bearer token; the cache entry should be
    /// evicted and the fetch retried once with a fresh token.
    #[error("bearer token rejected (HTTP {status})")]
    TokenRejected { status: u16 },

    /// Transient provider failure; the refresh scheduler backs off and
    /// retries on its own clock.
    #[error("transient IdP failure: {0}")]
    Transient(String),

    /// The provider answered 2xx with a payload we cannot interpret.
    #[error("unexpected IdP payload: {0}")]
    Payload(String),
}

impl IdpError {
    /// True when retrying later could succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IdpError::Transient(_) | IdpError::TokenEndpoint(_) | IdpError::TokenRejected { .. }
        )
    }
}

impl From<reqwest::Error> for IdpError {
    fn from(err: reqwest::Error) -> Self {
        IdpError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IdpError::Transient("socket closed".into()).is_transient());
        assert!(IdpError::TokenRejected { status: 401 }.is_transient());
        assert!(!IdpError::Config("missing realm".into()).is_transient());
        assert!(!IdpError::Payload("not json".into()).is_transient());
    }
}
