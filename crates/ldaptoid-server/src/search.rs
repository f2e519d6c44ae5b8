//! Search execution: scope resolution, candidate enumeration, limits.

use std::time::{Duration, Instant};

use ldaptoid_proto::dn::parse_distinguished_name;
use ldaptoid_proto::{
    Control, LdapResult, ResultCode, SearchRequest, SearchResultEntry, SearchScope,
    PAGED_RESULTS_OID,
};
use ldaptoid_snapshot::Snapshot;
use tracing::debug;

use crate::filter::evaluate;
use crate::tree::{DirectoryTree, Entry};

/// Server-side default cap on returned entries.
pub const DEFAULT_SIZE_LIMIT: u32 = 1000;

/// Applied when the client sends `timeLimit=0`.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30);

/// The complete answer to one search: zero or more entries and the final
/// result, plus whether a paged-results acknowledgement belongs on the Done.
#[derive(Debug)]
pub struct SearchOutcome {
    pub entries: Vec<SearchResultEntry>,
    pub result: LdapResult,
    pub acknowledge_paging: bool,
}

impl SearchOutcome {
    fn done(code: ResultCode, message: &str, acknowledge_paging: bool) -> Self {
        Self {
            entries: Vec::new(),
            result: LdapResult::new(code, message),
            acknowledge_paging,
        }
    }
}

/// Where the base lands in the projected tree.
#[derive(Debug)]
enum BaseTarget {
    RootDse,
    Suffix,
    UsersOu,
    GroupsOu,
    User(String),
    Group(String),
    /// Inside the suffix but naming nothing we serve, or outside entirely.
    Nothing,
}

/// Executes one search against a single snapshot reference, held for the
/// whole traversal so a concurrent publication never tears the result.
pub fn execute(
    request: &SearchRequest,
    controls: &[Control],
    snapshot: Option<&Snapshot>,
    tree: &DirectoryTree,
    server_size_limit: u32,
) -> SearchOutcome {
    let acknowledge_paging = controls
        .iter()
        .any(|control| control.oid == PAGED_RESULTS_OID);
    // Unknown critical controls fail the operation; anything non-critical
    // is ignored.
    if let Some(control) = controls
        .iter()
        .find(|control| control.criticality && control.oid != PAGED_RESULTS_OID)
    {
        return SearchOutcome::done(
            ResultCode::UnavailableCriticalExtension,
            &format!("unsupported critical control {}", control.oid),
            acknowledge_paging,
        );
    }

    if request.filter.contains_extensible() {
        return SearchOutcome::done(
            ResultCode::UnwillingToPerform,
            "extensibleMatch filters are not supported",
            acknowledge_paging,
        );
    }

    // The RootDSE answers before any snapshot exists.
    let base_is_root = request.base.trim().is_empty();
    if base_is_root && request.scope == SearchScope::BaseObject {
        let mut outcome = SearchOutcome::done(ResultCode::Success, "", acknowledge_paging);
        let entry = Entry::RootDse;
        if evaluate(&request.filter, &entry, tree, snapshot) {
            outcome.entries.push(entry.to_result_entry(
                &request.attributes,
                request.types_only,
                tree,
                snapshot,
            ));
        }
        return outcome;
    }

    let Some(snapshot) = snapshot else {
        return SearchOutcome::done(
            ResultCode::Unavailable,
            "no snapshot has been published yet",
            acknowledge_paging,
        );
    };

    let target = resolve_base(&request.base, tree);
    let candidates = enumerate(&target, request.scope, snapshot);

    let effective_size_limit = if request.size_limit > 0 {
        server_size_limit.min(request.size_limit)
    } else {
        server_size_limit
    };
    let time_limit = if request.time_limit > 0 {
        Duration::from_secs(request.time_limit as u64)
    } else {
        DEFAULT_TIME_LIMIT
    };
    let started = Instant::now();

    let mut entries = Vec::new();
    for entry in candidates {
        if started.elapsed() > time_limit {
            debug!(base = %request.base, "search aborted by time limit");
            return SearchOutcome {
                entries,
                result: LdapResult::new(ResultCode::TimeLimitExceeded, ""),
                acknowledge_paging,
            };
        }
        if !evaluate(&request.filter, &entry, tree, Some(snapshot)) {
            continue;
        }
        if entries.len() as u32 >= effective_size_limit {
            debug!(
                base = %request.base,
                limit = effective_size_limit,
                "search truncated by size limit"
            );
            return SearchOutcome {
                entries,
                result: LdapResult::new(ResultCode::SizeLimitExceeded, ""),
                acknowledge_paging,
            };
        }
        entries.push(entry.to_result_entry(
            &request.attributes,
            request.types_only,
            tree,
            Some(snapshot),
        ));
    }

    SearchOutcome {
        entries,
        result: LdapResult::success(),
        acknowledge_paging,
    }
}

/// Classifies the base DN against the fixed tree shape. Leaf RDN values
/// come out of the parser unescaped, matching how snapshot lookups store
/// them.
fn resolve_base(base: &str, tree: &DirectoryTree) -> BaseTarget {
    if base.trim().is_empty() {
        return BaseTarget::RootDse;
    }
    let Ok(mut parts) = parse_distinguished_name(base) else {
        return BaseTarget::Nothing;
    };
    if !tree.contains(&parts) {
        return BaseTarget::Nothing;
    }
    let suffix_len = tree.suffix_parts().len();
    match parts.len() - suffix_len {
        0 => BaseTarget::Suffix,
        1 if rdn_is(&parts[0], "ou", "users") => BaseTarget::UsersOu,
        1 if rdn_is(&parts[0], "ou", "groups") => BaseTarget::GroupsOu,
        2 if parts[0].0 == "uid" && rdn_is(&parts[1], "ou", "users") => {
            BaseTarget::User(std::mem::take(&mut parts[0].1))
        }
        2 if parts[0].0 == "cn" && rdn_is(&parts[1], "ou", "groups") => {
            BaseTarget::Group(std::mem::take(&mut parts[0].1))
        }
        _ => BaseTarget::Nothing,
    }
}

fn rdn_is(rdn: &(String, String), attribute: &str, value: &str) -> bool {
    rdn.0 == attribute && rdn.1.trim().eq_ignore_ascii_case(value)
}

/// Candidate entries for the scope, in the observable order: base and OUs
/// first, then users ascending by uid, then groups ascending by cn.
fn enumerate<'a>(
    target: &BaseTarget,
    scope: SearchScope,
    snapshot: &'a Snapshot,
) -> Vec<Entry<'a>> {
    let users = || snapshot.users().iter().map(Entry::User);
    let groups = || snapshot.groups().iter().map(Entry::Group);

    match (target, scope) {
        (BaseTarget::RootDse, _) | (BaseTarget::Nothing, _) => Vec::new(),

        (BaseTarget::Suffix, SearchScope::BaseObject) => vec![Entry::Domain],
        (BaseTarget::Suffix, SearchScope::SingleLevel) => {
            vec![Entry::UsersOu, Entry::GroupsOu]
        }
        (BaseTarget::Suffix, SearchScope::WholeSubtree) => {
            let mut entries = vec![Entry::Domain, Entry::UsersOu, Entry::GroupsOu];
            entries.extend(users());
            entries.extend(groups());
            entries
        }

        (BaseTarget::UsersOu, SearchScope::BaseObject) => vec![Entry::UsersOu],
        (BaseTarget::UsersOu, SearchScope::SingleLevel) => users().collect(),
        (BaseTarget::UsersOu, SearchScope::WholeSubtree) => {
            let mut entries = vec![Entry::UsersOu];
            entries.extend(users());
            entries
        }

        (BaseTarget::GroupsOu, SearchScope::BaseObject) => vec![Entry::GroupsOu],
        (BaseTarget::GroupsOu, SearchScope::SingleLevel) => groups().collect(),
        (BaseTarget::GroupsOu, SearchScope::WholeSubtree) => {
            let mut entries = vec![Entry::GroupsOu];
            entries.extend(groups());
            entries
        }

        (BaseTarget::User(_), SearchScope::SingleLevel)
        | (BaseTarget::Group(_), SearchScope::SingleLevel) => Vec::new(),
        (BaseTarget::User(username), _) => snapshot
            .user_by_username(username)
            .map(|user| vec![Entry::User(user)])
            .unwrap_or_default(),
        (BaseTarget::Group(name), _) => snapshot
            .group_by_name(name)
            .map(|group| vec![Entry::Group(group)])
            .unwrap_or_default(),
    }
}
