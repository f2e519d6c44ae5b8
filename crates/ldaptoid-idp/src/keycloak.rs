//! Keycloak admin API adapter.

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::adapter::fetch_json;
use crate::config::IdpConfig;
use crate::error::IdpResult;
use crate::types::{display_name_or, posix_safe_name, AdapterOutput, IdpGroup, IdpUser};

#[derive(Debug, Deserialize)]
struct KeycloakUser {
    id: String,
    username: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "firstName")]
    first_name: Option<String>,
    #[serde(default, rename = "lastName")]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeycloakGroup {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
}

/// Fetches users and groups through the Keycloak admin REST API.
///
/// Group membership needs a per-group `/members` call Keycloak does not
/// inline, so groups come back with empty member lists in this phase.
#[derive(Debug)]
pub struct KeycloakAdapter {
    http: reqwest::Client,
    config: IdpConfig,
}

impl KeycloakAdapter {
    pub fn new(http: reqwest::Client, config: IdpConfig) -> Self {
        Self { http, config }
    }

    #[instrument(skip_all)]
    pub async fn fetch(&self, token: &str) -> IdpResult<AdapterOutput> {
        let users = self.fetch_users(token).await?;
        let groups = self.fetch_groups(token).await?;
        debug!(users = users.len(), groups = groups.len(), "keycloak fetch complete");
        Ok(AdapterOutput { users, groups })
    }

    /// Pages through `/users` with `first`/`max` offsets until a short page.
    async fn fetch_users(&self, token: &str) -> IdpResult<Vec<IdpUser>> {
        let page_size = self.config.page_size;
        let mut users = Vec::new();
        let mut first = 0u32;
        loop {
            let url = format!(
                "{}/users?first={first}&max={page_size}",
                self.config.base_url
            );
            let page: Vec<KeycloakUser> = fetch_json(&self.http, &url, token, &[]).await?;
            let page_len = page.len() as u32;
            users.extend(page.into_iter().filter(|user| user.enabled).map(|user| {
                let username = posix_safe_name(&user.username);
                let display_name = display_name_or(
                    None,
                    user.first_name.as_deref(),
                    user.last_name.as_deref(),
                    &username,
                );
                IdpUser {
                    id: user.id,
                    username,
                    display_name,
                    email: user.email.filter(|email| !email.is_empty()),
                }
            }));
            if page_len < page_size {
                return Ok(users);
            }
            first += page_size;
        }
    }

    async fn fetch_groups(&self, token: &str) -> IdpResult<Vec<IdpGroup>> {
        let url = format!("{}/groups", self.config.base_url);
        let groups: Vec<KeycloakGroup> = fetch_json(&self.http, &url, token, &[]).await?;
        Ok(groups
            .into_iter()
            .map(|group| IdpGroup {
                id: group.id,
                name: posix_safe_name(&group.name),
                description: group.description.filter(|text| !text.is_empty()),
                member_user_ids: Vec::new(),
            })
            .collect())
    }
}
