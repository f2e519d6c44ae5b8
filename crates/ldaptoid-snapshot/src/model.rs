//! Directory records and the immutable snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Group id users point at when synthetic primary groups are disabled.
pub const SENTINEL_PRIMARY_GROUP_ID: &str = "users";

/// Optional snapshot behaviors, switchable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// One single-member group per user, giving each user a private
    /// primary GID.
    SyntheticPrimaryGroup,
    /// For each real group, a group-of-groups over its members' primary
    /// groups.
    MirrorNestedGroups,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::SyntheticPrimaryGroup => "synthetic_primary_group",
            Feature::MirrorNestedGroups => "mirror_nested_groups",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing a [`Feature`] from a string.
#[derive(Debug, Clone)]
pub struct ParseFeatureError(String);

impl fmt::Display for ParseFeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown feature '{}', expected one of: synthetic_primary_group, mirror_nested_groups",
            self.0
        )
    }
}

impl std::error::Error for ParseFeatureError {}

impl FromStr for Feature {
    type Err = ParseFeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "synthetic_primary_group" => Ok(Feature::SyntheticPrimaryGroup),
            "mirror_nested_groups" => Ok(Feature::MirrorNestedGroups),
            other => Err(ParseFeatureError(other.to_string())),
        }
    }
}

/// A projected user. Only active principals make it into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable opaque IdP id.
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub uid_number: u32,
    /// Id of the group providing the POSIX primary GID. Always resolvable
    /// inside the same snapshot.
    pub primary_group_id: String,
    /// Ids of groups this user is a supplementary member of, sorted.
    pub member_group_ids: Vec<String>,
}

/// A projected group: real (from the IdP) or synthetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// User ids, sorted for stable output.
    pub member_user_ids: Vec<String>,
    /// Nested group ids (mirror groups only), sorted.
    pub member_group_ids: Vec<String>,
    pub gid_number: u32,
    pub is_synthetic: bool,
    /// True when the membership list was clipped at the configured cap.
    pub truncated: bool,
}

/// An immutable publication unit. Built once per refresh, then only ever
/// read; readers hold an `Arc<Snapshot>` for the duration of a response.
///
/// Equality covers the projected content (users, groups, feature flags) and
/// deliberately ignores `sequence` and `generated_at`, which differ between
/// otherwise identical builds.
#[derive(Debug)]
pub struct Snapshot {
    users: Vec<User>,
    groups: Vec<Group>,
    pub generated_at: DateTime<Utc>,
    pub sequence: u64,
    pub feature_flags: Vec<Feature>,
    users_by_id: HashMap<String, usize>,
    users_by_username: HashMap<String, usize>,
    groups_by_id: HashMap<String, usize>,
    groups_by_name: HashMap<String, usize>,
}

impl Snapshot {
    /// Freezes users and groups into a snapshot. Callers pass content
    /// already sorted; indexes are derived here so they cannot drift.
    pub fn new(
        users: Vec<User>,
        groups: Vec<Group>,
        sequence: u64,
        feature_flags: Vec<Feature>,
    ) -> Self {
        let users_by_id = users
            .iter()
            .enumerate()
            .map(|(idx, user)| (user.id.clone(), idx))
            .collect();
        let users_by_username = users
            .iter()
            .enumerate()
            .map(|(idx, user)| (user.username.clone(), idx))
            .collect();
        let groups_by_id = groups
            .iter()
            .enumerate()
            .map(|(idx, group)| (group.id.clone(), idx))
            .collect();
        let groups_by_name = groups
            .iter()
            .enumerate()
            .map(|(idx, group)| (group.name.clone(), idx))
            .collect();
        Self {
            users,
            groups,
            generated_at: Utc::now(),
            sequence,
            feature_flags,
            users_by_id,
            users_by_username,
            groups_by_id,
            groups_by_name,
        }
    }

    /// Users sorted by username.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Groups sorted by name.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn user_by_id(&self, id: &str) -> Option<&User> {
        self.users_by_id.get(id).map(|&idx| &self.users[idx])
    }

    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users_by_username
            .get(&username.to_ascii_lowercase())
            .map(|&idx| &self.users[idx])
    }

    pub fn group_by_id(&self, id: &str) -> Option<&Group> {
        self.groups_by_id.get(id).map(|&idx| &self.groups[idx])
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups_by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.groups[idx])
    }

    /// The numeric GID behind a user's primary group.
    pub fn primary_gid(&self, user: &User) -> Option<u32> {
        self.group_by_id(&user.primary_group_id)
            .map(|group| group.gid_number)
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.feature_flags.contains(&feature)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.users == other.users
            && self.groups == other.groups
            && self.feature_flags == other.feature_flags
    }
}

impl Eq for Snapshot {}
