//! Microsoft Entra ID (Graph API) adapter.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::adapter::fetch_json;
use crate::config::IdpConfig;
use crate::error::IdpResult;
use crate::types::{display_name_or, posix_safe_name, AdapterOutput, IdpGroup, IdpUser};

/// Paginated Graph response wrapper.
#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    value: Vec<T>,
    #[serde(default, rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
    #[serde(rename = "userPrincipalName")]
    user_principal_name: String,
    #[serde(default, rename = "accountEnabled")]
    account_enabled: bool,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
    #[serde(default, rename = "givenName")]
    given_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default)]
    mail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphGroup {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    members: Vec<GraphMemberRef>,
}

#[derive(Debug, Deserialize)]
struct GraphMemberRef {
    id: String,
    #[serde(default, rename = "@odata.type")]
    odata_type: Option<String>,
}

/// Fetches users and groups from Microsoft Graph.
///
/// Membership rides along on the group listing via `$expand=members`, so no
/// per-group calls are made; Graph caps the expansion, which is acceptable
/// since oversized groups get clipped downstream anyway.
#[derive(Debug)]
pub struct EntraAdapter {
    http: reqwest::Client,
    config: IdpConfig,
}

impl EntraAdapter {
    pub fn new(http: reqwest::Client, config: IdpConfig) -> Self {
        Self { http, config }
    }

    #[instrument(skip_all)]
    pub async fn fetch(&self, token: &str) -> IdpResult<AdapterOutput> {
        let users: Vec<GraphUser> = self
            .fetch_all_pages(format!(
                "{}/v1.0/users?$select=id,userPrincipalName,displayName,givenName,surname,mail,accountEnabled&$top={}",
                self.config.base_url, self.config.page_size
            ), token)
            .await?;
        let groups: Vec<GraphGroup> = self
            .fetch_all_pages(format!(
                "{}/v1.0/groups?$select=id,displayName,description&$expand=members($select=id)&$top={}",
                self.config.base_url, self.config.page_size
            ), token)
            .await?;

        let users: Vec<IdpUser> = users
            .into_iter()
            .filter(|user| user.account_enabled)
            .map(|user| {
                let username = posix_safe_name(&user.user_principal_name);
                let display_name = display_name_or(
                    user.display_name.as_deref(),
                    user.given_name.as_deref(),
                    user.surname.as_deref(),
                    &username,
                );
                IdpUser {
                    id: user.id,
                    username,
                    display_name,
                    email: user.mail.filter(|mail| !mail.is_empty()),
                }
            })
            .collect();

        let groups = groups
            .into_iter()
            .map(|group| IdpGroup {
                id: group.id,
                name: posix_safe_name(&group.display_name),
                description: group.description.filter(|text| !text.is_empty()),
                member_user_ids: group
                    .members
                    .into_iter()
                    .filter(|member| {
                        member
                            .odata_type
                            .as_deref()
                            .map_or(true, |kind| kind.ends_with("user"))
                    })
                    .map(|member| member.id)
                    .collect(),
            })
            .collect();

        debug!(users = users.len(), "entra fetch complete");
        Ok(AdapterOutput { users, groups })
    }

    /// Follows `@odata.nextLink` until the listing is exhausted.
    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        token: &str,
    ) -> IdpResult<Vec<T>> {
        let mut items = Vec::new();
        let mut url = Some(first_url);
        while let Some(current) = url.take() {
            let page: ODataPage<T> = fetch_json(&self.http, &current, token, &[]).await?;
            items.extend(page.value);
            url = page.next_link;
        }
        Ok(items)
    }
}
