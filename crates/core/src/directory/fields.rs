//! Logical-to-physical attribute mapping.
//!
//! Each entity kind has a fixed set of logical fields ([`UserField`],
//! [`GroupField`]). A [`FieldMap`] translates them to the attribute names of
//! the configured directory schema, e.g. `realname -> cn`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DirectoryError;

/// A logical attribute key of an entity kind.
pub trait LogicalField:
    Copy + Ord + fmt::Debug + fmt::Display + FromStr<Err = DirectoryError> + 'static
{
    /// Entity kind name used in messages (`user`, `group`).
    const ENTITY: &'static str;

    /// Every key, in declaration order.
    const ALL: &'static [Self];

    /// Keys that must be mapped for the repositories to work.
    const REQUIRED: &'static [Self];

    /// Keys whose attribute holds a list; these never live in the scalar
    /// attribute bag.
    const MULTI_VALUED: &'static [Self] = &[];

    /// Name used in configuration and in serialized output.
    fn as_str(self) -> &'static str;
}

fn parse_field<K: LogicalField>(s: &str) -> Result<K, DirectoryError> {
    K::ALL
        .iter()
        .copied()
        .find(|k| k.as_str() == s)
        .ok_or_else(|| DirectoryError::Validation(format!("unknown {} field '{}'", K::ENTITY, s)))
}

// ---------------------------------------------------------------------------
// User fields
// ---------------------------------------------------------------------------

/// Logical attributes of a [`User`](crate::identity::User).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    /// Stable key used in filters and as a map key.
    UniqueId,
    /// Numeric account id (`uidNumber`).
    Id,
    /// Login name; substituted into the bind DN template.
    Username,
    /// Display name; the sort key for user lists.
    Realname,
    Email,
}

impl LogicalField for UserField {
    const ENTITY: &'static str = "user";
    const ALL: &'static [Self] = &[
        Self::UniqueId,
        Self::Id,
        Self::Username,
        Self::Realname,
        Self::Email,
    ];
    const REQUIRED: &'static [Self] = &[Self::UniqueId, Self::Id, Self::Username, Self::Realname];

    fn as_str(self) -> &'static str {
        match self {
            Self::UniqueId => "unique_id",
            Self::Id => "id",
            Self::Username => "username",
            Self::Realname => "realname",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for UserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserField {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s)
    }
}

// ---------------------------------------------------------------------------
// Group fields
// ---------------------------------------------------------------------------

/// Logical attributes of a [`Group`](crate::identity::Group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    UniqueId,
    /// Numeric group id (`gidNumber`).
    Id,
    Name,
    Description,
    /// Multi-valued member references (`memberUid`).
    Members,
}

impl LogicalField for GroupField {
    const ENTITY: &'static str = "group";
    const ALL: &'static [Self] = &[
        Self::UniqueId,
        Self::Id,
        Self::Name,
        Self::Description,
        Self::Members,
    ];
    const REQUIRED: &'static [Self] = &[Self::UniqueId, Self::Id, Self::Name, Self::Members];
    const MULTI_VALUED: &'static [Self] = &[Self::Members];

    fn as_str(self) -> &'static str {
        match self {
            Self::UniqueId => "unique_id",
            Self::Id => "id",
            Self::Name => "name",
            Self::Description => "description",
            Self::Members => "members",
        }
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupField {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s)
    }
}

// ---------------------------------------------------------------------------
// Field map
// ---------------------------------------------------------------------------

/// Ordered mapping from logical field to physical attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap<K: Ord> {
    map: BTreeMap<K, String>,
}

impl<K: LogicalField> FieldMap<K> {
    /// Build a map from `(logical, physical)` pairs.
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        S: Into<String>,
    {
        Self {
            map: pairs.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }

    /// Physical attribute for `field`, if mapped.
    pub fn get(&self, field: K) -> Option<&str> {
        self.map.get(&field).map(String::as_str)
    }

    /// Physical attribute for `field`, or a validation error naming it.
    pub fn require(&self, field: K) -> Result<&str, DirectoryError> {
        self.get(field).ok_or_else(|| {
            DirectoryError::Validation(format!(
                "no directory attribute mapped for {} field '{}'",
                K::ENTITY,
                field
            ))
        })
    }

    /// Copy with every physical name lowercased, for matching search
    /// results (the protocol layer normalizes returned names).
    pub fn lowercased(&self) -> Self {
        Self {
            map: self
                .map
                .iter()
                .map(|(k, v)| (*k, v.to_lowercase()))
                .collect(),
        }
    }

    /// Logical fields whose physical attribute equals `attr`, ignoring case.
    pub fn fields_for(&self, attr: &str) -> impl Iterator<Item = K> + '_ {
        let attr = attr.to_lowercase();
        self.map
            .iter()
            .filter(move |(_, v)| v.to_lowercase() == attr)
            .map(|(k, _)| *k)
    }

    /// Required fields that are not mapped.
    pub fn missing_required(&self) -> Vec<K> {
        K::REQUIRED
            .iter()
            .copied()
            .filter(|k| !self.map.contains_key(k))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &str)> {
        self.map.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl Default for FieldMap<UserField> {
    fn default() -> Self {
        Self::new([
            (UserField::UniqueId, "uid"),
            (UserField::Id, "uidNumber"),
            (UserField::Username, "uid"),
            (UserField::Realname, "cn"),
            (UserField::Email, "mail"),
        ])
    }
}

impl Default for FieldMap<GroupField> {
    fn default() -> Self {
        Self::new([
            (GroupField::UniqueId, "cn"),
            (GroupField::Id, "gidNumber"),
            (GroupField::Name, "cn"),
            (GroupField::Description, "description"),
            (GroupField::Members, "memberUid"),
        ])
    }
}
