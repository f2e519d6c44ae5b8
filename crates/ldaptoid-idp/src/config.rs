//! Provider connection settings.

use secrecy::SecretString;
use std::time::Duration;

use crate::error::{IdpError, IdpResult};
use crate::types::IdpType;

/// Default per-request timeout against the IdP.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default page size for user/group listings.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Connection settings for one identity provider.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub idp_type: IdpType,
    /// Provider API base URL, without a trailing slash.
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Keycloak realm; required for [`IdpType::Keycloak`].
    pub realm: Option<String>,
    /// Entra tenant id; required for [`IdpType::Entra`].
    pub tenant: Option<String>,
    /// Zitadel organization id; optional.
    pub organization: Option<String>,
    /// Override for the token authority. Defaults to the provider's public
    /// endpoint (only Entra has one distinct from `base_url`).
    pub auth_base_url: Option<String>,
    pub page_size: u32,
    pub request_timeout: Duration,
}

impl IdpConfig {
    pub fn new(
        idp_type: IdpType,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            idp_type,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret,
            realm: None,
            tenant: None,
            organization: None,
            auth_base_url: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_auth_base_url(mut self, url: impl Into<String>) -> Self {
        self.auth_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    /// Checks variant-specific required fields.
    pub fn validate(&self) -> IdpResult<()> {
        if self.base_url.is_empty() {
            return Err(IdpError::Config("idp base URL is required".into()));
        }
        if self.client_id.is_empty() {
            return Err(IdpError::Config("idp client id is required".into()));
        }
        match self.idp_type {
            IdpType::Keycloak if self.realm.as_deref().unwrap_or("").is_empty() => Err(
                IdpError::Config("realm is required for keycloak".into()),
            ),
            IdpType::Entra if self.tenant.as_deref().unwrap_or("").is_empty() => {
                Err(IdpError::Config("tenant is required for entra".into()))
            }
            _ => Ok(()),
        }
    }

    /// The token endpoint for this provider.
    pub fn token_url(&self) -> String {
        match self.idp_type {
            IdpType::Keycloak => format!(
                "{}/realms/{}/protocol/openid-connect/token",
                self.base_url,
                self.realm.as_deref().unwrap_or_default()
            ),
            IdpType::Entra => format!(
                "{}/{}/oauth2/v2.0/token",
                self.auth_base_url
                    .as_deref()
                    .unwrap_or("https://login.microsoftonline.com"),
                self.tenant.as_deref().unwrap_or_default()
            ),
            IdpType::Zitadel => format!("{}/oauth/v2/token", self.base_url),
        }
    }

    /// The scope string requested with the client-credentials grant.
    pub fn token_scope(&self) -> String {
        match self.idp_type {
            IdpType::Keycloak => "openid profile email".to_string(),
            IdpType::Entra => "https://graph.microsoft.com/.default".to_string(),
            IdpType::Zitadel => match &self.organization {
                Some(org) => format!(
                    "urn:zitadel:iam:org:projects:roles urn:zitadel:iam:org:id:{org}"
                ),
                None => "urn:zitadel:iam:org:projects:roles".to_string(),
            },
        }
    }

    /// The discriminator that separates token-cache entries for otherwise
    /// identical client ids: realm, tenant, or organization.
    pub fn scope_discriminator(&self) -> String {
        match self.idp_type {
            IdpType::Keycloak => self.realm.clone().unwrap_or_default(),
            IdpType::Entra => self.tenant.clone().unwrap_or_default(),
            IdpType::Zitadel => self.organization.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(idp_type: IdpType) -> IdpConfig {
        IdpConfig::new(
            idp_type,
            "https://idp.example.com/",
            "svc",
            SecretString::from("secret".to_string()),
        )
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(base(IdpType::Zitadel).base_url, "https://idp.example.com");
    }

    #[test]
    fn keycloak_requires_realm() {
        assert!(base(IdpType::Keycloak).validate().is_err());
        assert!(base(IdpType::Keycloak).with_realm("main").validate().is_ok());
    }

    #[test]
    fn entra_requires_tenant() {
        assert!(base(IdpType::Entra).validate().is_err());
        assert!(base(IdpType::Entra).with_tenant("t-1").validate().is_ok());
    }

    #[test]
    fn token_urls_per_variant() {
        assert_eq!(
            base(IdpType::Keycloak).with_realm("main").token_url(),
            "https://idp.example.com/realms/main/protocol/openid-connect/token"
        );
        assert_eq!(
            base(IdpType::Entra).with_tenant("t-1").token_url(),
            "https://login.microsoftonline.com/t-1/oauth2/v2.0/token"
        );
        assert_eq!(
            base(IdpType::Entra)
                .with_tenant("t-1")
                .with_auth_base_url("http://127.0.0.1:9999")
                .token_url(),
            "http://127.0.0.1:9999/t-1/oauth2/v2.0/token"
        );
        assert_eq!(
            base(IdpType::Zitadel).token_url(),
            "https://idp.example.com/oauth/v2/token"
        );
    }

    #[test]
    fn zitadel_scope_includes_org_when_configured() {
        assert_eq!(
            base(IdpType::Zitadel).token_scope(),
            "urn:zitadel:iam:org:projects:roles"
        );
        assert_eq!(
            base(IdpType::Zitadel).with_organization("org-7").token_scope(),
            "urn:zitadel:iam:org:projects:roles urn:zitadel:iam:org:id:org-7"
        );
    }
}
