//! Dirty-tracking attribute bag shared by [`User`](super::User) and
//! [`Group`](super::Group).

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::directory::fields::{FieldMap, LogicalField};
use crate::directory::RawEntry;

/// Logical field values plus the set of fields changed since the last
/// successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes<K: Ord> {
    values: BTreeMap<K, String>,
    dirty: BTreeSet<K>,
    is_new: bool,
}

impl<K: LogicalField> Default for Attributes<K> {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl<K: LogicalField> Attributes<K> {
    /// An empty bag marks an entity that does not exist in the directory yet.
    /// Multi-valued keys are dropped.
    pub fn new(mut values: BTreeMap<K, String>) -> Self {
        values.retain(|k, _| !K::MULTI_VALUED.contains(k));
        let is_new = values.is_empty();
        Self {
            values,
            dirty: BTreeSet::new(),
            is_new,
        }
    }

    /// Hydrate from a search result. `fields` must be lowercased; only the
    /// first value of each scalar attribute is kept.
    pub(crate) fn from_entry(entry: &RawEntry, fields: &FieldMap<K>) -> Self {
        Self::new(
            fields
                .iter()
                .filter(|(key, _)| !K::MULTI_VALUED.contains(key))
                .filter_map(|(key, attr)| entry.first(attr).map(|v| (key, v.to_string())))
                .collect(),
        )
    }

    pub fn get(&self, key: K) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Store a scalar value. Multi-valued keys are only marked dirty; their
    /// lists are owned by the entity.
    pub fn set(&mut self, key: K, value: impl Into<String>) {
        if !K::MULTI_VALUED.contains(&key) {
            self.values.insert(key, value.into());
        }
        self.dirty.insert(key);
    }

    /// Remove a value; the next write deletes the attribute.
    pub fn clear(&mut self, key: K) {
        self.values.remove(&key);
        self.dirty.insert(key);
    }

    pub fn mark_dirty(&mut self, key: K) {
        self.dirty.insert(key);
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_dirty(&self, key: K) -> bool {
        self.dirty.contains(&key)
    }

    pub fn dirty(&self) -> impl Iterator<Item = K> + '_ {
        self.dirty.iter().copied()
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Record a successful create: `sent` values are now stored, and every
    /// field mapped to one of the sent physical attributes is clean.
    pub(crate) fn mark_created(&mut self, fields: &FieldMap<K>, sent: &[(String, Vec<String>)]) {
        for (attr, values) in sent {
            for key in fields.fields_for(attr) {
                if K::MULTI_VALUED.contains(&key) {
                    continue;
                }
                if let Some(first) = values.first() {
                    self.values.insert(key, first.clone());
                }
                self.dirty.remove(&key);
            }
        }
        self.is_new = false;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// Logical fields as a JSON object; absent values are `null`.
    pub fn to_json(&self, except: &[&str]) -> Map<String, Value> {
        K::ALL
            .iter()
            .filter(|k| !except.contains(&k.as_str()))
            .map(|k| {
                let value = self
                    .get(*k)
                    .map_or(Value::Null, |v| Value::String(v.to_string()));
                (k.as_str().to_string(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{GroupField, UserField};

    #[test]
    fn test_new_when_empty() {
        assert!(Attributes::<UserField>::default().is_new());
        let existing = Attributes::new(BTreeMap::from([(UserField::Username, "alice".to_string())]));
        assert!(!existing.is_new());
    }

    #[test]
    fn test_set_and_clear_mark_dirty() {
        let mut attrs = Attributes::<UserField>::default();
        attrs.set(UserField::Email, "a@example.com");
        attrs.clear(UserField::Realname);
        assert_eq!(
            attrs.dirty().collect::<Vec<_>>(),
            vec![UserField::Realname, UserField::Email]
        );
        assert_eq!(attrs.get(UserField::Realname), None);
    }

    #[test]
    fn test_mark_created_cleans_fields_sharing_an_attribute() {
        let fields = FieldMap::<UserField>::default();
        let mut attrs = Attributes::<UserField>::default();
        attrs.set(UserField::Username, "alice");
        attrs.set(UserField::Email, "alice@example.com");

        attrs.mark_created(
            &fields,
            &[
                ("uid".into(), vec!["alice".into()]),
                ("uidNumber".into(), vec!["1001".into()]),
            ],
        );

        assert!(!attrs.is_new());
        assert_eq!(attrs.get(UserField::UniqueId), Some("alice"));
        assert_eq!(attrs.get(UserField::Id), Some("1001"));
        assert_eq!(attrs.dirty().collect::<Vec<_>>(), vec![UserField::Email]);
    }

    #[test]
    fn test_hydrate_first_value_and_absent_fields() {
        let entry = RawEntry::new(
            "uid=bob,ou=People",
            [
                ("uid", vec!["bob".to_string()]),
                ("cn", vec!["Bob".to_string(), "Robert".to_string()]),
            ],
        );
        let attrs = Attributes::from_entry(&entry, &FieldMap::<UserField>::default().lowercased());
        assert_eq!(attrs.get(UserField::Realname), Some("Bob"));
        assert_eq!(attrs.get(UserField::Email), None);
        assert!(!attrs.has_changes());
    }

    #[test]
    fn test_multi_valued_keys_stay_out_of_the_bag() {
        let entry = RawEntry::new(
            "cn=staff,ou=Groups",
            [
                ("cn", vec!["staff".to_string()]),
                ("memberUid", vec!["alice".to_string(), "bob".to_string()]),
            ],
        );
        let mut attrs =
            Attributes::from_entry(&entry, &FieldMap::<GroupField>::default().lowercased());
        assert_eq!(attrs.get(GroupField::Name), Some("staff"));
        assert_eq!(attrs.get(GroupField::Members), None);

        attrs.set(GroupField::Members, "carol");
        assert_eq!(attrs.get(GroupField::Members), None);
        assert!(attrs.is_dirty(GroupField::Members));
    }

    #[test]
    fn test_to_json_nulls_and_except() {
        let attrs = Attributes::new(BTreeMap::from([(UserField::Username, "alice".to_string())]));
        let json = attrs.to_json(&["id"]);
        assert_eq!(json["username"], "alice");
        assert!(json["email"].is_null());
        assert!(!json.contains_key("id"));
    }
}
