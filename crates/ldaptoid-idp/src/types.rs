//! Canonical records produced by every adapter, and the provider enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which identity provider an instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdpType {
    Keycloak,
    Entra,
    Zitadel,
}

impl IdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdpType::Keycloak => "keycloak",
            IdpType::Entra => "entra",
            IdpType::Zitadel => "zitadel",
        }
    }
}

impl fmt::Display for IdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing an [`IdpType`] from a string.
#[derive(Debug, Clone)]
pub struct ParseIdpTypeError(String);

impl fmt::Display for ParseIdpTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid IdP type '{}', expected one of: keycloak, entra, zitadel",
            self.0
        )
    }
}

impl std::error::Error for ParseIdpTypeError {}

impl FromStr for IdpType {
    type Err = ParseIdpTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keycloak" => Ok(IdpType::Keycloak),
            "entra" => Ok(IdpType::Entra),
            "zitadel" => Ok(IdpType::Zitadel),
            _ => Err(ParseIdpTypeError(s.to_string())),
        }
    }
}

/// A provider user, normalized. POSIX ids are assigned later by the
/// snapshot builder; only active users ever leave an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpUser {
    /// Stable opaque provider id.
    pub id: String,
    /// POSIX-safe login name (see [`posix_safe_name`]).
    pub username: String,
    /// Human-readable name; falls back to the username.
    pub display_name: String,
    /// Primary email address, when the provider has one.
    pub email: Option<String>,
}

/// A provider group, normalized. Membership may be empty when the provider
/// only exposes it through per-group calls this phase does not make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpGroup {
    /// Stable opaque provider id.
    pub id: String,
    /// POSIX-safe group name.
    pub name: String,
    pub description: Option<String>,
    /// Provider ids of member users, as carried by the group listing.
    pub member_user_ids: Vec<String>,
}

/// One adapter fetch: every active user plus every group the provider
/// listed, in provider order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterOutput {
    pub users: Vec<IdpUser>,
    pub groups: Vec<IdpGroup>,
}

/// Collapses a provider login name into the POSIX-safe alphabet
/// `[a-z0-9._-]`. Uppercase folds to lowercase; every other byte becomes an
/// underscore. Never returns an empty string.
pub fn posix_safe_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => out.push(ch),
            'A'..='Z' => out.push(ch.to_ascii_lowercase()),
            _ => out.push('_'),
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Display-name fallback chain shared by the adapters: explicit display
/// name, given + family names, then the username.
pub(crate) fn display_name_or(
    display: Option<&str>,
    given: Option<&str>,
    family: Option<&str>,
    username: &str,
) -> String {
    if let Some(name) = display.map(str::trim).filter(|name| !name.is_empty()) {
        return name.to_string();
    }
    let joined = [given, family]
        .iter()
        .filter_map(|part| part.map(str::trim))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !joined.is_empty() {
        return joined;
    }
    username.to_string()
}
