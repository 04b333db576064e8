//! Domain model over the directory: users, groups, and the lookups and
//! write-back that move them in and out of entries.

pub mod attributes;
pub mod group;
pub mod groups;
pub mod provider;
pub mod user;
pub mod users;

pub use attributes::Attributes;
pub use group::Group;
pub use groups::GroupRepository;
pub use provider::{Credentials, UserProvider};
pub use user::User;
pub use users::UserRepository;

use tracing::warn;

use crate::directory::{AttributeValues, DirectorySession};
use crate::errors::DirectoryError;

/// Attribute names for a search request, without case-insensitive duplicates.
fn requested_attributes<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    out
}

/// Append `attr: value` unless the payload already sets `attr`.
fn push_unique(payload: &mut Vec<AttributeValues>, attr: &str, value: &str) {
    if !payload.iter().any(|(n, _)| n.eq_ignore_ascii_case(attr)) {
        payload.push((attr.to_string(), vec![value.to_string()]));
    }
}

/// `max + 1` over the numeric values of `attr` in matching entries, or
/// `first_id` when none parse. A maximum of `u64::MAX` is a validation
/// error.
fn next_numeric_id(
    session: &mut DirectorySession,
    base: &str,
    filter: &str,
    attr: &str,
    first_id: u64,
) -> Result<u64, DirectoryError> {
    let entries = session.search(base, filter, &[attr.to_string()])?;
    let max = entries
        .iter()
        .filter_map(|e| {
            let raw = e.first(attr)?;
            match raw.trim().parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(dn = %e.dn, attr, value = raw, "skipping non-numeric id");
                    None
                }
            }
        })
        .max();
    match max {
        None => Ok(first_id),
        Some(m) => m.checked_add(1).ok_or_else(|| {
            DirectoryError::Validation(format!(
                "no id left above {} in '{}' under '{}'",
                m, attr, base
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_attributes_dedup_ignores_case() {
        assert_eq!(
            requested_attributes(["uid", "uidNumber", "UID", "cn", "uidnumber"]),
            vec!["uid", "uidNumber", "cn"]
        );
    }

    #[test]
    fn test_push_unique_keeps_first() {
        let mut payload = Vec::new();
        push_unique(&mut payload, "cn", "Alice");
        push_unique(&mut payload, "CN", "Other");
        assert_eq!(payload, vec![("cn".to_string(), vec!["Alice".to_string()])]);
    }
}
