//! # IdP Ingestion
//!
//! Pulls users and groups out of an OpenID Connect identity provider and
//! normalizes them into the canonical records the snapshot builder consumes.
//!
//! Three providers are supported behind one sum type: Keycloak, Microsoft
//! Entra ID, and Zitadel v2. Authentication is the OAuth2 client-credentials
//! grant, with tokens cached per provider key and renewed ahead of expiry.
//!
//! ## Crate Organization
//!
//! - [`config`] - Provider connection settings and validation
//! - [`token`] - Client-credentials token cache
//! - [`adapter`] - [`IdpAdapter`] dispatch and the [`IdpClient`] entry point
//! - [`keycloak`] / [`entra`] / [`zitadel`] - Per-provider fetch and mapping
//! - [`types`] - Canonical `IdpUser`/`IdpGroup` records
//! - [`error`] - Error classification driving the refresh scheduler's retry

pub mod adapter;
pub mod config;
pub mod entra;
pub mod error;
pub mod keycloak;
pub mod token;
pub mod types;
pub mod zitadel;

pub use adapter::{IdpAdapter, IdpClient};
pub use config::IdpConfig;
pub use error::{IdpError, IdpResult};
pub use token::TokenCache;
pub use types::{AdapterOutput, IdpGroup, IdpType, IdpUser};
