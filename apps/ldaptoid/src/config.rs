//! Process configuration: CLI flags with environment fallbacks.

use clap::Parser;
use secrecy::SecretString;
use std::time::Duration;

use ldaptoid_idp::{IdpConfig, IdpType};
use ldaptoid_snapshot::{BuildConfig, Feature, SchedulerConfig};

/// Read-only LDAP projection of an OIDC identity provider.
#[derive(Debug, Parser)]
#[command(name = "ldaptoid", version, about)]
pub struct Config {
    /// Identity provider flavor: keycloak, entra, or zitadel.
    #[arg(long, env = "LDAPTOID_IDP_TYPE")]
    pub idp_type: IdpType,

    /// Provider API base URL.
    #[arg(long, env = "LDAPTOID_IDP_BASE_URL")]
    pub idp_base_url: String,

    /// OAuth2 client id for the client-credentials grant.
    #[arg(long, env = "LDAPTOID_IDP_CLIENT_ID")]
    pub idp_client_id: String,

    /// OAuth2 client secret.
    #[arg(long, env = "LDAPTOID_IDP_CLIENT_SECRET")]
    pub idp_client_secret: String,

    /// Keycloak realm (required for keycloak).
    #[arg(long, env = "LDAPTOID_IDP_REALM")]
    pub idp_realm: Option<String>,

    /// Entra tenant id (required for entra).
    #[arg(long, env = "LDAPTOID_IDP_TENANT")]
    pub idp_tenant: Option<String>,

    /// Zitadel organization id.
    #[arg(long, env = "LDAPTOID_IDP_ORGANIZATION")]
    pub idp_organization: Option<String>,

    /// TCP port for the LDAP listener.
    #[arg(long, env = "LDAPTOID_LDAP_PORT", default_value_t = 389)]
    pub ldap_port: u16,

    /// Suffix the directory is projected under, e.g. dc=example,dc=com.
    #[arg(long, env = "LDAPTOID_LDAP_BASE_DN")]
    pub ldap_base_dn: String,

    /// Optional service-account bind DN.
    #[arg(long, env = "LDAPTOID_LDAP_BIND_DN")]
    pub ldap_bind_dn: Option<String>,

    /// Service-account bind password.
    #[arg(long, env = "LDAPTOID_LDAP_BIND_PASSWORD")]
    pub ldap_bind_password: Option<String>,

    /// Permit Search without a prior Bind.
    #[arg(long, env = "LDAPTOID_ALLOW_ANONYMOUS_BIND", default_value_t = false)]
    pub allow_anonymous_bind: bool,

    /// Server-side cap on entries returned by one Search.
    #[arg(long, env = "LDAPTOID_LDAP_SIZE_LIMIT", default_value_t = 1000)]
    pub ldap_size_limit: u32,

    /// Milliseconds between successful refreshes.
    #[arg(long, env = "LDAPTOID_REFRESH_INTERVAL_MS", default_value_t = 300_000)]
    pub refresh_interval_ms: u64,

    /// Upper bound on the failure backoff delay, in milliseconds.
    #[arg(long, env = "LDAPTOID_MAX_BACKOFF_MS", default_value_t = 3_600_000)]
    pub max_backoff_ms: u64,

    /// Consecutive refresh failures before the scheduler halts.
    #[arg(long, env = "LDAPTOID_MAX_RETRIES", default_value_t = 10)]
    pub max_retries: u32,

    /// Persist id mappings to redis.
    #[arg(long, env = "LDAPTOID_MAPPING_STORE_ENABLED", default_value_t = false)]
    pub mapping_store_enabled: bool,

    #[arg(long, env = "LDAPTOID_MAPPING_STORE_HOST", default_value = "127.0.0.1")]
    pub mapping_store_host: String,

    #[arg(long, env = "LDAPTOID_MAPPING_STORE_PORT", default_value_t = 6379)]
    pub mapping_store_port: u16,

    #[arg(long, env = "LDAPTOID_MAPPING_STORE_PASSWORD")]
    pub mapping_store_password: Option<String>,

    #[arg(long, env = "LDAPTOID_MAPPING_STORE_DATABASE", default_value_t = 0)]
    pub mapping_store_database: i64,

    /// Comma-separated feature flags: synthetic_primary_group,
    /// mirror_nested_groups.
    #[arg(long, env = "LDAPTOID_ENABLED_FEATURES", value_delimiter = ',')]
    pub enabled_features: Vec<Feature>,

    /// Cap on a single group's member list.
    #[arg(long, env = "LDAPTOID_MAX_GROUP_MEMBERS", default_value_t = 5000)]
    pub max_group_members: usize,

    /// Minimum member count for a group to receive a mirror group.
    #[arg(long, env = "LDAPTOID_MIRROR_MIN_MEMBERS", default_value_t = 2)]
    pub mirror_min_members: usize,

    /// Port for the health and metrics HTTP endpoints.
    #[arg(long, env = "LDAPTOID_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,
}

impl Config {
    /// Provider settings for the idp crate; variant-specific requirements
    /// are validated there.
    pub fn idp_config(&self) -> IdpConfig {
        let mut config = IdpConfig::new(
            self.idp_type,
            self.idp_base_url.clone(),
            self.idp_client_id.clone(),
            SecretString::from(self.idp_client_secret.clone()),
        );
        if let Some(realm) = &self.idp_realm {
            config = config.with_realm(realm.clone());
        }
        if let Some(tenant) = &self.idp_tenant {
            config = config.with_tenant(tenant.clone());
        }
        if let Some(organization) = &self.idp_organization {
            config = config.with_organization(organization.clone());
        }
        config
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: 2.0,
            max_retries: self.max_retries,
        }
    }

    pub fn build_config(&self) -> BuildConfig {
        BuildConfig {
            features: self.enabled_features.clone(),
            max_group_members: self.max_group_members,
            mirror_min_members: self.mirror_min_members,
        }
    }

    pub fn session_config(&self) -> ldaptoid_server::SessionConfig {
        ldaptoid_server::SessionConfig {
            bind_dn: self.ldap_bind_dn.clone(),
            bind_password: self.ldap_bind_password.clone(),
            allow_anonymous_bind: self.allow_anonymous_bind,
            size_limit: self.ldap_size_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        let mut full = vec![
            "ldaptoid",
            "--idp-type",
            "keycloak",
            "--idp-base-url",
            "https://idp.example.com",
            "--idp-client-id",
            "svc",
            "--idp-client-secret",
            "secret",
            "--idp-realm",
            "main",
            "--ldap-base-dn",
            "dc=example,dc=com",
        ];
        full.extend_from_slice(args);
        Config::try_parse_from(full)
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.ldap_port, 389);
        assert_eq!(config.ldap_size_limit, 1000);
        assert_eq!(config.refresh_interval_ms, 300_000);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.max_group_members, 5000);
        assert!(!config.allow_anonymous_bind);
        assert!(config.enabled_features.is_empty());
    }

    #[test]
    fn features_parse_from_comma_list() {
        let config = parse(&[
            "--enabled-features",
            "synthetic_primary_group,mirror_nested_groups",
        ])
        .unwrap();
        assert_eq!(
            config.enabled_features,
            vec![Feature::SyntheticPrimaryGroup, Feature::MirrorNestedGroups]
        );
    }

    #[test]
    fn invalid_idp_type_is_a_parse_error() {
        let result = Config::try_parse_from([
            "ldaptoid",
            "--idp-type",
            "okta",
            "--idp-base-url",
            "x",
            "--idp-client-id",
            "x",
            "--idp-client-secret",
            "x",
            "--ldap-base-dn",
            "dc=example,dc=com",
        ]);
        assert!(result.is_err());
    }
}
