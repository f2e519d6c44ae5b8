//! The projected entry tree: suffix layout, DN construction, and typed
//! attribute projection per entry kind.
//!
//! Entries are views over snapshot records, never materialized copies; the
//! same projection feeds both the filter evaluator and result assembly, so
//! what you can match on is exactly what you get back.

use ldaptoid_proto::dn::{
    escape_rdn_value, is_under_suffix, parse_distinguished_name, DnError, DnParts,
};
use ldaptoid_proto::{PartialAttribute, SearchResultEntry};
use ldaptoid_snapshot::{Group, Snapshot, User};

/// Object classes per entry kind.
pub const USER_OBJECT_CLASSES: [&str; 5] = [
    "top",
    "person",
    "organizationalPerson",
    "inetOrgPerson",
    "posixAccount",
];
pub const GROUP_OBJECT_CLASSES: [&str; 3] = ["top", "groupOfNames", "posixGroup"];

/// The suffix and the fixed OU skeleton underneath it.
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    suffix: String,
    suffix_parts: DnParts,
}

impl DirectoryTree {
    /// Parses and adopts the configured suffix, e.g. `dc=example,dc=com`.
    pub fn new(base_dn: &str) -> Result<Self, DnError> {
        let suffix_parts = parse_distinguished_name(base_dn)?;
        if suffix_parts.is_empty() {
            return Err(DnError::Invalid("suffix must not be empty"));
        }
        Ok(Self {
            suffix: base_dn.trim().to_string(),
            suffix_parts,
        })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn suffix_parts(&self) -> &DnParts {
        &self.suffix_parts
    }

    pub fn users_ou_dn(&self) -> String {
        format!("ou=users,{}", self.suffix)
    }

    pub fn groups_ou_dn(&self) -> String {
        format!("ou=groups,{}", self.suffix)
    }

    pub fn user_dn(&self, username: &str) -> String {
        format!("uid={},{}", escape_rdn_value(username), self.users_ou_dn())
    }

    pub fn group_dn(&self, name: &str) -> String {
        format!("cn={},{}", escape_rdn_value(name), self.groups_ou_dn())
    }

    /// True when `dn` (parsed) sits at or below the suffix.
    pub fn contains(&self, dn: &DnParts) -> bool {
        is_under_suffix(dn, &self.suffix_parts)
    }
}

/// One addressable entry.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    RootDse,
    /// The suffix entry itself.
    Domain,
    UsersOu,
    GroupsOu,
    User(&'a User),
    Group(&'a Group),
}

impl<'a> Entry<'a> {
    pub fn dn(&self, tree: &DirectoryTree) -> String {
        match self {
            Entry::RootDse => String::new(),
            Entry::Domain => tree.suffix().to_string(),
            Entry::UsersOu => tree.users_ou_dn(),
            Entry::GroupsOu => tree.groups_ou_dn(),
            Entry::User(user) => tree.user_dn(&user.username),
            Entry::Group(group) => tree.group_dn(&group.name),
        }
    }

    /// Attribute names this entry kind exposes, in projection order.
    pub fn attribute_names(&self) -> &'static [&'static str] {
        match self {
            Entry::RootDse => &[
                "objectClass",
                "namingContexts",
                "supportedLDAPVersion",
                "supportedControl",
                "vendorName",
                "vendorVersion",
            ],
            Entry::Domain => &["objectClass", "dc"],
            Entry::UsersOu | Entry::GroupsOu => &["objectClass", "ou", "description"],
            Entry::User(_) => &[
                "objectClass",
                "uid",
                "cn",
                "sn",
                "givenName",
                "displayName",
                "mail",
                "uidNumber",
                "gidNumber",
                "homeDirectory",
                "loginShell",
                "memberOf",
            ],
            Entry::Group(_) => &[
                "objectClass",
                "cn",
                "gidNumber",
                "description",
                "member",
                "memberUid",
            ],
        }
    }

    /// Values for one attribute, case-insensitive on the name. Unknown
    /// attributes project to no values.
    pub fn attribute(
        &self,
        name: &str,
        tree: &DirectoryTree,
        snapshot: Option<&'a Snapshot>,
    ) -> Vec<String> {
        let name = name.to_ascii_lowercase();
        match self {
            Entry::RootDse => match name.as_str() {
                "objectclass" => vec!["top".into(), "rootDSE".into()],
                "namingcontexts" => vec![tree.suffix().to_string()],
                "supportedldapversion" => vec!["3".into()],
                "supportedcontrol" => vec![ldaptoid_proto::PAGED_RESULTS_OID.to_string()],
                "vendorname" => vec!["ldaptoid".into()],
                "vendorversion" => vec![env!("CARGO_PKG_VERSION").to_string()],
                _ => Vec::new(),
            },
            Entry::Domain => match name.as_str() {
                "objectclass" => vec!["top".into(), "domain".into()],
                "dc" => tree
                    .suffix_parts()
                    .first()
                    .map(|(_, value)| vec![value.clone()])
                    .unwrap_or_default(),
                _ => Vec::new(),
            },
            Entry::UsersOu | Entry::GroupsOu => {
                let (ou, description) = match self {
                    Entry::UsersOu => ("users", "projected user accounts"),
                    _ => ("groups", "projected groups"),
                };
                match name.as_str() {
                    "objectclass" => vec!["top".into(), "organizationalUnit".into()],
                    "ou" => vec![ou.into()],
                    "description" => vec![description.into()],
                    _ => Vec::new(),
                }
            }
            Entry::User(user) => user_attribute(user, &name, tree, snapshot),
            Entry::Group(group) => group_attribute(group, &name, tree, snapshot),
        }
    }

    /// Assembles the wire entry, honoring attribute selection and
    /// `typesOnly`.
    pub fn to_result_entry(
        &self,
        requested: &[String],
        types_only: bool,
        tree: &DirectoryTree,
        snapshot: Option<&'a Snapshot>,
    ) -> SearchResultEntry {
        let all = requested.is_empty() || requested.iter().any(|attr| attr == "*");
        let names: Vec<&str> = if all {
            self.attribute_names().to_vec()
        } else {
            // Echo the projection's canonical spelling for known names.
            self.attribute_names()
                .iter()
                .copied()
                .filter(|name| {
                    requested
                        .iter()
                        .any(|requested| requested.eq_ignore_ascii_case(name))
                })
                .collect()
        };

        let attributes = names
            .into_iter()
            .filter_map(|name| {
                let values = self.attribute(name, tree, snapshot);
                if values.is_empty() {
                    return None;
                }
                Some(PartialAttribute::text(
                    name,
                    if types_only { Vec::new() } else { values },
                ))
            })
            .collect();

        SearchResultEntry {
            dn: self.dn(tree),
            attributes,
        }
    }
}

fn user_attribute(
    user: &User,
    name: &str,
    tree: &DirectoryTree,
    snapshot: Option<&Snapshot>,
) -> Vec<String> {
    match name {
        "objectclass" => USER_OBJECT_CLASSES.iter().map(|s| s.to_string()).collect(),
        "uid" => vec![user.username.clone()],
        "cn" | "displayname" => vec![user.display_name.clone()],
        "sn" => vec![user
            .display_name
            .split_whitespace()
            .last()
            .unwrap_or(&user.username)
            .to_string()],
        "givenname" => {
            let words: Vec<&str> = user.display_name.split_whitespace().collect();
            if words.len() > 1 {
                vec![words[..words.len() - 1].join(" ")]
            } else {
                Vec::new()
            }
        }
        "mail" => user.email.clone().into_iter().collect(),
        "uidnumber" => vec![user.uid_number.to_string()],
        "gidnumber" => snapshot
            .and_then(|snapshot| snapshot.primary_gid(user))
            .map(|gid| vec![gid.to_string()])
            .unwrap_or_default(),
        "homedirectory" => vec![format!("/home/{}", user.username)],
        "loginshell" => vec!["/bin/bash".to_string()],
        "memberof" => snapshot
            .map(|snapshot| {
                user.member_group_ids
                    .iter()
                    .filter_map(|group_id| snapshot.group_by_id(group_id))
                    .map(|group| tree.group_dn(&group.name))
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn group_attribute(
    group: &Group,
    name: &str,
    tree: &DirectoryTree,
    snapshot: Option<&Snapshot>,
) -> Vec<String> {
    match name {
        "objectclass" => GROUP_OBJECT_CLASSES.iter().map(|s| s.to_string()).collect(),
        "cn" => vec![group.name.clone()],
        "gidnumber" => vec![group.gid_number.to_string()],
        "description" => group.description.clone().into_iter().collect(),
        "member" => snapshot
            .map(|snapshot| {
                let users = group
                    .member_user_ids
                    .iter()
                    .filter_map(|user_id| snapshot.user_by_id(user_id))
                    .map(|user| tree.user_dn(&user.username));
                let groups = group
                    .member_group_ids
                    .iter()
                    .filter_map(|group_id| snapshot.group_by_id(group_id))
                    .map(|nested| tree.group_dn(&nested.name));
                users.chain(groups).collect()
            })
            .unwrap_or_default(),
        "memberuid" => snapshot
            .map(|snapshot| {
                group
                    .member_user_ids
                    .iter()
                    .filter_map(|user_id| snapshot.user_by_id(user_id))
                    .map(|user| user.username.clone())
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
