//! Filter evaluation against projected entries.
//!
//! Pure functions over the same attribute projection the result assembler
//! uses. String matching is case-insensitive per the LDAP default syntaxes;
//! attribute names and assertion values are scrubbed of stray framing bytes
//! some client stacks leak into the assertion.

use ldaptoid_proto::{Filter, SubstringFilter};
use ldaptoid_snapshot::Snapshot;

use crate::tree::{DirectoryTree, Entry};

/// Evaluates `filter` against one entry.
///
/// Unknown attributes and unrecognized filter nodes evaluate to false;
/// extensibleMatch is rejected before evaluation by the search executor and
/// evaluates to false here as well.
pub fn evaluate(
    filter: &Filter,
    entry: &Entry<'_>,
    tree: &DirectoryTree,
    snapshot: Option<&Snapshot>,
) -> bool {
    match filter {
        Filter::And(children) => children
            .iter()
            .all(|child| evaluate(child, entry, tree, snapshot)),
        Filter::Or(children) => children
            .iter()
            .any(|child| evaluate(child, entry, tree, snapshot)),
        Filter::Not(child) => !evaluate(child, entry, tree, snapshot),
        Filter::Equality { attribute, value } | Filter::Approx { attribute, value } => {
            let assertion = clean(value);
            values(entry, attribute, tree, snapshot)
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&assertion))
        }
        Filter::Substrings(substrings) => eval_substrings(substrings, entry, tree, snapshot),
        Filter::GreaterOrEqual { attribute, value } => {
            let assertion = clean(value).to_ascii_lowercase();
            values(entry, attribute, tree, snapshot)
                .iter()
                .any(|candidate| candidate.to_ascii_lowercase() >= assertion)
        }
        Filter::LessOrEqual { attribute, value } => {
            let assertion = clean(value).to_ascii_lowercase();
            values(entry, attribute, tree, snapshot)
                .iter()
                .any(|candidate| candidate.to_ascii_lowercase() <= assertion)
        }
        Filter::Present(attribute) => values(entry, attribute, tree, snapshot)
            .iter()
            .any(|candidate| !candidate.is_empty()),
        Filter::Extensible | Filter::Unrecognized { .. } => false,
    }
}

fn values(
    entry: &Entry<'_>,
    attribute: &str,
    tree: &DirectoryTree,
    snapshot: Option<&Snapshot>,
) -> Vec<String> {
    entry.attribute(&clean(attribute), tree, snapshot)
}

/// Multi-valued attributes are joined with a single space before substring
/// matching.
fn eval_substrings(
    substrings: &SubstringFilter,
    entry: &Entry<'_>,
    tree: &DirectoryTree,
    snapshot: Option<&Snapshot>,
) -> bool {
    let joined = values(entry, &substrings.attribute, tree, snapshot)
        .join(" ")
        .to_ascii_lowercase();
    if joined.is_empty() {
        return false;
    }

    let mut position = 0;
    if let Some(initial) = &substrings.initial {
        let initial = clean(initial).to_ascii_lowercase();
        if !joined.starts_with(&initial) {
            return false;
        }
        position = initial.len();
    }
    for any in &substrings.any {
        let any = clean(any).to_ascii_lowercase();
        match joined[position..].find(&any) {
            Some(found) => position += found + any.len(),
            None => return false,
        }
    }
    if let Some(r#final) = &substrings.r#final {
        let r#final = clean(r#final).to_ascii_lowercase();
        if !joined[position..].ends_with(&r#final) {
            return false;
        }
    }
    true
}

/// Strips leading/trailing control bytes that BER framing occasionally
/// leaks into attribute names and assertion values.
fn clean(raw: &str) -> String {
    raw.trim_matches(char::is_control).to_string()
}
