//! Distinguished-name parsing, comparison, and RFC 4514 escaping.
//!
//! DNs are modeled as ordered `(attribute, value)` pairs, leftmost RDN
//! first. Attribute types are lowercased during parsing; values keep their
//! case and are compared case-insensitively, with surrounding whitespace
//! collapsed, which matches how directory clients expect suffix matching
//! to behave.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnError {
    #[error("invalid distinguished name: {0}")]
    Invalid(&'static str),
}

/// Parsed RDN sequence, leftmost first. The empty DN parses to an empty
/// vector (the RootDSE).
pub type DnParts = Vec<(String, String)>;

/// Parses a DN string into `(type, value)` pairs.
///
/// Multi-valued RDNs (`+`) are not part of the projected tree and are
/// rejected.
pub fn parse_distinguished_name(dn: &str) -> Result<DnParts, DnError> {
    let trimmed = dn.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut parts = Vec::new();
    for rdn in split_unescaped(trimmed, ',') {
        let mut halves = split_unescaped(&rdn, '=');
        let attribute = halves.next().ok_or(DnError::Invalid("empty RDN"))?;
        let value = halves.next().ok_or(DnError::Invalid("RDN without '='"))?;
        if halves.next().is_some() {
            return Err(DnError::Invalid("RDN with multiple '='"));
        }
        if split_unescaped(&rdn, '+').count() > 1 {
            return Err(DnError::Invalid("multi-valued RDN"));
        }
        let attribute = attribute.trim().to_ascii_lowercase();
        if attribute.is_empty() {
            return Err(DnError::Invalid("empty attribute type"));
        }
        let value = unescape_value(trim_unescaped(&value))?;
        if value.is_empty() {
            return Err(DnError::Invalid("empty attribute value"));
        }
        parts.push((attribute, value));
    }
    Ok(parts)
}

/// Splits on `sep` outside of backslash escapes. Yields raw (still escaped)
/// segments.
fn split_unescaped(input: &str, sep: char) -> impl Iterator<Item = String> + '_ {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if escaped {
        current.push('\\');
    }
    segments.push(current);
    segments.into_iter()
}

/// Trims decorative whitespace around a still-escaped value. A trailing
/// space survives when it is escaped (`\ `).
fn trim_unescaped(value: &str) -> &str {
    let mut trimmed = value.trim_start();
    while trimmed.ends_with(' ') && !trimmed.ends_with("\\ ") {
        trimmed = &trimmed[..trimmed.len() - 1];
    }
    trimmed
}

fn unescape_value(value: &str) -> Result<String, DnError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            return Err(DnError::Invalid("trailing backslash"));
        };
        if next.is_ascii_hexdigit() {
            let Some(second) = chars.next().filter(char::is_ascii_hexdigit) else {
                return Err(DnError::Invalid("bad hex escape"));
            };
            let byte = (next.to_digit(16).unwrap() * 16 + second.to_digit(16).unwrap()) as u8;
            out.push(byte as char);
        } else {
            out.push(next);
        }
    }
    Ok(out)
}

/// Escapes an attribute value for inclusion in a DN per RFC 4514.
pub fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, ch) in value.chars().enumerate() {
        let leading = i == 0 && (ch == ' ' || ch == '#');
        let trailing = i == last && ch == ' ';
        if leading || trailing || matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Case-insensitive equality of two parsed DNs.
pub fn dn_equal(a: &[(String, String)], b: &[(String, String)]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|((at, av), (bt, bv))| {
            at == bt && av.trim().eq_ignore_ascii_case(bv.trim())
        })
}

/// True when `dn` sits at or below `suffix` (both parsed, leftmost first).
pub fn is_under_suffix(dn: &[(String, String)], suffix: &[(String, String)]) -> bool {
    if dn.len() < suffix.len() {
        return false;
    }
    dn_equal(&dn[dn.len() - suffix.len()..], suffix)
}

/// Parses and normalizes a DN for comparisons: lowercased types and values,
/// single separators, no decorative whitespace.
pub fn normalize(dn: &str) -> Result<String, DnError> {
    let parts = parse_distinguished_name(dn)?;
    Ok(parts
        .iter()
        .map(|(attribute, value)| format!("{attribute}={}", value.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_lowercases_types() {
        let parts = parse_distinguished_name("UID=Alice, OU=users , DC=Example,DC=com").unwrap();
        assert_eq!(
            parts,
            vec![
                ("uid".to_string(), "Alice".to_string()),
                ("ou".to_string(), "users".to_string()),
                ("dc".to_string(), "Example".to_string()),
                ("dc".to_string(), "com".to_string()),
            ]
        );
    }

    #[test]
    fn empty_dn_is_root_dse() {
        assert!(parse_distinguished_name("").unwrap().is_empty());
        assert!(parse_distinguished_name("   ").unwrap().is_empty());
    }

    #[test]
    fn escapes_round_trip() {
        let value = "Smith, John+#1 <x>=y; \\z ";
        let escaped = escape_rdn_value(value);
        let dn = format!("cn={escaped},dc=example");
        let parts = parse_distinguished_name(&dn).unwrap();
        assert_eq!(parts[0].1, value);
    }

    #[test]
    fn hex_escapes_decode() {
        let parts = parse_distinguished_name(r"cn=a\2cb,dc=example").unwrap();
        assert_eq!(parts[0].1, "a,b");
    }

    #[test]
    fn multi_valued_rdn_is_rejected() {
        assert!(parse_distinguished_name("cn=a+sn=b,dc=example").is_err());
        // ...but an escaped plus is just data.
        assert!(parse_distinguished_name(r"cn=a\+b,dc=example").is_ok());
    }

    #[test]
    fn suffix_matching_is_case_insensitive() {
        let suffix = parse_distinguished_name("dc=example,dc=com").unwrap();
        let user = parse_distinguished_name("uid=alice,ou=users,DC=EXAMPLE,dc=Com").unwrap();
        let outside = parse_distinguished_name("uid=alice,dc=other,dc=com").unwrap();
        assert!(is_under_suffix(&user, &suffix));
        assert!(is_under_suffix(&suffix, &suffix));
        assert!(!is_under_suffix(&outside, &suffix));
        assert!(!is_under_suffix(&[], &suffix));
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("CN=Svc , DC=Example, DC=COM").unwrap(),
            "cn=svc,dc=example,dc=com"
        );
    }
}
