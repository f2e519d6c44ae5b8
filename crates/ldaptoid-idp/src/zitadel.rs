//! Zitadel v2 user API adapter.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::adapter::check_status;
use crate::config::IdpConfig;
use crate::error::{IdpError, IdpResult};
use crate::types::{display_name_or, posix_safe_name, AdapterOutput, IdpUser};

/// The only user state that gets projected; `INITIAL`, `LOCKED` and the
/// rest are all treated as inactive.
const STATE_ACTIVE: &str = "USER_STATE_ACTIVE";

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    #[serde(default)]
    result: Vec<ZitadelUser>,
}

#[derive(Debug, Deserialize)]
struct ZitadelUser {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "preferredLoginName")]
    preferred_login_name: Option<String>,
    #[serde(default, rename = "loginNames")]
    login_names: Vec<String>,
    #[serde(default)]
    human: Option<ZitadelHuman>,
}

#[derive(Debug, Default, Deserialize)]
struct ZitadelHuman {
    #[serde(default)]
    profile: Option<ZitadelProfile>,
    #[serde(default)]
    email: Option<ZitadelEmail>,
}

#[derive(Debug, Default, Deserialize)]
struct ZitadelProfile {
    #[serde(default, rename = "givenName")]
    given_name: Option<String>,
    #[serde(default, rename = "familyName")]
    family_name: Option<String>,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ZitadelEmail {
    #[serde(default)]
    email: Option<String>,
}

/// Fetches users through the Zitadel v2 search API. Zitadel has no group
/// listing in this phase, so the group half of the output is always empty.
#[derive(Debug)]
pub struct ZitadelAdapter {
    http: reqwest::Client,
    config: IdpConfig,
}

impl ZitadelAdapter {
    pub fn new(http: reqwest::Client, config: IdpConfig) -> Self {
        Self { http, config }
    }

    #[instrument(skip_all)]
    pub async fn fetch(&self, token: &str) -> IdpResult<AdapterOutput> {
        let mut body = json!({
            "query": { "limit": self.config.page_size, "asc": true },
        });
        if let Some(org) = &self.config.organization {
            body["queries"] = json!([
                { "organizationIdQuery": { "organizationId": org } }
            ]);
        }

        let mut request = self
            .http
            .post(format!("{}/v2/users", self.config.base_url))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(&body);
        if let Some(org) = &self.config.organization {
            request = request.header("x-zitadel-orgid", org);
        }

        let response = check_status(request.send().await?).await?;
        let listing: ListUsersResponse = response
            .json()
            .await
            .map_err(|err| IdpError::Payload(err.to_string()))?;

        let users: Vec<IdpUser> = listing
            .result
            .into_iter()
            .filter(|user| user.state == STATE_ACTIVE)
            .map(|user| {
                let login = user
                    .preferred_login_name
                    .or(user.username)
                    .or_else(|| user.login_names.into_iter().next())
                    .unwrap_or_else(|| user.user_id.clone());
                let username = posix_safe_name(&login);
                let (profile, email) = match user.human {
                    Some(human) => (
                        human.profile.unwrap_or_default(),
                        human.email.and_then(|email| email.email),
                    ),
                    None => (ZitadelProfile::default(), None),
                };
                let display_name = display_name_or(
                    profile.display_name.as_deref(),
                    profile.given_name.as_deref(),
                    profile.family_name.as_deref(),
                    &username,
                );
                IdpUser {
                    id: user.user_id,
                    username,
                    display_name,
                    email: email.filter(|email| !email.is_empty()),
                }
            })
            .collect();

        debug!(users = users.len(), "zitadel fetch complete");
        Ok(AdapterOutput {
            users,
            groups: Vec::new(),
        })
    }
}
