//! Snapshot assembly.
//!
//! Pure with respect to its inputs: the same adapter output, allocator
//! state, and configuration always produce an equal snapshot. All iteration
//! runs over sorted keys so output ordering never depends on map order.

use metrics::counter;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use ldaptoid_idp::AdapterOutput;

use crate::alloc::IdAllocator;
use crate::model::{Feature, Group, Snapshot, User, SENTINEL_PRIMARY_GROUP_ID};

/// Default cap on a single group's member list.
pub const DEFAULT_MAX_GROUP_MEMBERS: usize = 5_000;

/// Build-time settings.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub features: Vec<Feature>,
    /// Member-list cap; overflow is clipped and the group marked truncated.
    pub max_group_members: usize,
    /// Minimum user-member count for a group to get a mirror. Zero mirrors
    /// every non-synthetic group.
    pub mirror_min_members: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            max_group_members: DEFAULT_MAX_GROUP_MEMBERS,
            mirror_min_members: 2,
        }
    }
}

impl BuildConfig {
    fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// An id assignment made during this build, to be persisted by the caller.
/// The key is already namespaced (`user:`/`group:`/`synthetic:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMapping {
    pub key: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Assembles an immutable snapshot from adapter output.
///
/// `sequence` is the value for the new snapshot; the scheduler passes its
/// monotonic counter. Returns the snapshot plus every fresh allocation so
/// the caller can persist them.
pub fn build_snapshot(
    output: &AdapterOutput,
    uid_alloc: &mut IdAllocator,
    gid_alloc: &mut IdAllocator,
    config: &BuildConfig,
    sequence: u64,
) -> (Snapshot, Vec<NewMapping>) {
    let mut new_mappings = Vec::new();
    let mut used_usernames = HashSet::new();
    let mut used_group_names = HashSet::new();

    // Users first, in stable (username, id) order so collision suffixes and
    // everything derived from them are deterministic.
    let mut source_users: Vec<_> = output.users.iter().collect();
    source_users.sort_by(|a, b| (&a.username, &a.id).cmp(&(&b.username, &b.id)));

    let mut users: Vec<User> = Vec::with_capacity(source_users.len());
    for source in &source_users {
        let key = format!("user:{}", source.id);
        let allocation = uid_alloc.allocate(&key);
        if allocation.fresh {
            new_mappings.push(NewMapping {
                key,
                uid: Some(allocation.id),
                gid: None,
            });
        }
        users.push(User {
            id: source.id.clone(),
            username: unique_name(&source.username, &mut used_usernames),
            display_name: source.display_name.clone(),
            email: source.email.clone(),
            uid_number: allocation.id,
            primary_group_id: SENTINEL_PRIMARY_GROUP_ID.to_string(),
            member_group_ids: Vec::new(),
        });
    }
    let user_ids: HashSet<&str> = users.iter().map(|user| user.id.as_str()).collect();
    let mut membership: HashMap<String, BTreeSet<String>> = HashMap::new();

    // Real groups, again in stable order.
    let mut source_groups: Vec<_> = output.groups.iter().collect();
    source_groups.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    let mut groups: Vec<Group> = Vec::new();
    for source in &source_groups {
        let key = format!("group:{}", source.id);
        let allocation = gid_alloc.allocate(&key);
        if allocation.fresh {
            new_mappings.push(NewMapping {
                key,
                uid: None,
                gid: Some(allocation.id),
            });
        }

        // Membership is restricted to users that survived the active
        // filter, deduplicated, sorted, then clipped.
        let mut members: Vec<String> = source
            .member_user_ids
            .iter()
            .filter(|id| user_ids.contains(id.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut truncated = false;
        if members.len() > config.max_group_members {
            warn!(
                group = %source.name,
                members = members.len(),
                cap = config.max_group_members,
                "clipping oversized group membership"
            );
            members.truncate(config.max_group_members);
            truncated = true;
            counter!("ldaptoid_group_truncated_total").increment(1);
        }

        let group_id = source.id.clone();
        for member in &members {
            membership
                .entry(member.clone())
                .or_default()
                .insert(group_id.clone());
        }

        groups.push(Group {
            id: group_id,
            name: unique_name(&source.name, &mut used_group_names),
            description: source.description.clone(),
            member_user_ids: members,
            member_group_ids: Vec::new(),
            gid_number: allocation.id,
            is_synthetic: false,
            truncated,
        });
    }

    // Synthetic primaries: one single-member group per user, or one shared
    // sentinel group everybody points at.
    if config.has(Feature::SyntheticPrimaryGroup) {
        for user in &mut users {
            let key = format!("synthetic:{}", user.id);
            let allocation = gid_alloc.allocate(&key);
            if allocation.fresh {
                new_mappings.push(NewMapping {
                    key,
                    uid: None,
                    gid: Some(allocation.id),
                });
            }
            let group_id = format!("synthetic:{}", user.id);
            groups.push(Group {
                id: group_id.clone(),
                name: unique_name(&format!("{}-primary", user.username), &mut used_group_names),
                description: None,
                member_user_ids: vec![user.id.clone()],
                member_group_ids: Vec::new(),
                gid_number: allocation.id,
                is_synthetic: true,
                truncated: false,
            });
            user.primary_group_id = group_id;
        }
    } else {
        let key = format!("synthetic:{SENTINEL_PRIMARY_GROUP_ID}");
        let allocation = gid_alloc.allocate(&key);
        if allocation.fresh {
            new_mappings.push(NewMapping {
                key,
                uid: None,
                gid: Some(allocation.id),
            });
        }
        groups.push(Group {
            id: SENTINEL_PRIMARY_GROUP_ID.to_string(),
            name: unique_name(SENTINEL_PRIMARY_GROUP_ID, &mut used_group_names),
            description: Some("shared primary group".to_string()),
            member_user_ids: Vec::new(),
            member_group_ids: Vec::new(),
            gid_number: allocation.id,
            is_synthetic: true,
            truncated: false,
        });
    }

    // Mirrors: a group-of-groups over each qualifying real group's member
    // primaries. Mirror members are synthetic primaries, which themselves
    // contain no groups, so the result is always a DAG.
    if config.has(Feature::MirrorNestedGroups) {
        let primary_by_user: HashMap<&str, &str> = users
            .iter()
            .map(|user| (user.id.as_str(), user.primary_group_id.as_str()))
            .collect();
        let sources: Vec<(String, String, Vec<String>)> = groups
            .iter()
            .filter(|group| !group.is_synthetic)
            .filter(|group| group.member_user_ids.len() >= config.mirror_min_members)
            .map(|group| {
                let member_group_ids: Vec<String> = group
                    .member_user_ids
                    .iter()
                    .filter_map(|user_id| primary_by_user.get(user_id.as_str()))
                    .map(|primary| primary.to_string())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                (group.id.clone(), group.name.clone(), member_group_ids)
            })
            .collect();
        for (source_id, source_name, member_group_ids) in sources {
            let key = format!("synthetic:mirror:{source_id}");
            let allocation = gid_alloc.allocate(&key);
            if allocation.fresh {
                new_mappings.push(NewMapping {
                    key,
                    uid: None,
                    gid: Some(allocation.id),
                });
            }
            groups.push(Group {
                id: format!("mirror:{source_id}"),
                name: unique_name(&format!("{source_name}-mirror"), &mut used_group_names),
                description: None,
                member_user_ids: Vec::new(),
                member_group_ids,
                gid_number: allocation.id,
                is_synthetic: true,
                truncated: false,
            });
        }
    }

    // Supplementary membership back onto the users.
    for user in &mut users {
        if let Some(group_ids) = membership.remove(&user.id) {
            user.member_group_ids = group_ids.into_iter().collect();
        }
    }

    // Stable output order.
    users.sort_by(|a, b| a.username.cmp(&b.username));
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    debug!(
        users = users.len(),
        groups = groups.len(),
        sequence,
        "snapshot assembled"
    );

    let mut features = config.features.clone();
    features.sort();
    features.dedup();
    (
        Snapshot::new(users, groups, sequence, features),
        new_mappings,
    )
}

/// Returns `base`, or `base-2`, `base-3`, ... when already used.
fn unique_name(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
