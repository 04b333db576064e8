//! Group entity.

use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::info;

use super::attributes::Attributes;
use super::push_unique;
use super::user::User;
use crate::config::LdapConfig;
use crate::directory::fields::{FieldMap, GroupField};
use crate::directory::{AttributeValues, DirectorySession, RawEntry};
use crate::errors::DirectoryError;

/// A group in the directory.
///
/// Membership is held at two levels: the raw member identifiers stored on
/// the entry, and the resolved [`User`] objects. Either may be unknown
/// (`None`) independently of the other.
#[derive(Debug, Clone, Default)]
pub struct Group {
    attrs: Attributes<GroupField>,
    members: Option<Vec<String>>,
    member_objects: Option<Vec<User>>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from field values. `Members` entries become the raw member
    /// list, one identifier each.
    pub fn with_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (GroupField, S)>,
        S: Into<String>,
    {
        let mut scalars = std::collections::BTreeMap::new();
        let mut members: Option<Vec<String>> = None;
        for (field, value) in values {
            match field {
                GroupField::Members => members.get_or_insert_with(Vec::new).push(value.into()),
                _ => {
                    scalars.insert(field, value.into());
                }
            }
        }
        Self {
            attrs: Attributes::new(scalars),
            members,
            member_objects: None,
        }
    }

    /// Hydrate from a search result. With `with_members`, a missing member
    /// attribute gives an empty list rather than `None`.
    pub(crate) fn from_entry(entry: &RawEntry, fields: &FieldMap<GroupField>, with_members: bool) -> Self {
        let members = with_members.then(|| {
            fields
                .get(GroupField::Members)
                .and_then(|attr| entry.values(attr))
                .map(<[String]>::to_vec)
                .unwrap_or_default()
        });
        Self {
            attrs: Attributes::from_entry(entry, fields),
            members,
            member_objects: None,
        }
    }

    /// Single-valued field. Always `None` for `Members`; see
    /// [`members`](Self::members).
    pub fn get(&self, field: GroupField) -> Option<&str> {
        self.attrs.get(field)
    }

    pub fn get_by_name(&self, field: &str) -> Result<Option<&str>, DirectoryError> {
        Ok(self.get(field.parse()?))
    }

    /// Set a single-valued field. `Members` replaces the member list with
    /// the one identifier given.
    pub fn set(&mut self, field: GroupField, value: impl Into<String>) {
        match field {
            GroupField::Members => self.set_members(vec![value.into()]),
            _ => self.attrs.set(field, value),
        }
    }

    pub fn set_by_name(&mut self, field: &str, value: impl Into<String>) -> Result<(), DirectoryError> {
        self.set(field.parse()?, value);
        Ok(())
    }

    /// Remove a value. `Members` empties the member list.
    pub fn clear(&mut self, field: GroupField) {
        match field {
            GroupField::Members => self.set_members(Vec::new()),
            _ => self.attrs.clear(field),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.get(GroupField::Name)
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.get(GroupField::UniqueId)
    }

    pub fn description(&self) -> Option<&str> {
        self.get(GroupField::Description)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(GroupField::Id)
    }

    pub fn is_new(&self) -> bool {
        self.attrs.is_new()
    }

    pub fn attributes(&self) -> &Attributes<GroupField> {
        &self.attrs
    }

    /// Entry DN under the group base.
    pub fn dn(&self, config: &LdapConfig) -> Result<String, DirectoryError> {
        let name = self.require_name()?;
        let attr = config.groups.fields.require(GroupField::UniqueId)?;
        Ok(config.group_dn(attr, name))
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    /// Raw member identifiers, if known.
    pub fn members(&self) -> Option<&[String]> {
        self.members.as_deref()
    }

    /// Replace the member list. Resolved member objects are discarded.
    pub fn set_members(&mut self, members: Vec<String>) {
        self.members = Some(members);
        self.member_objects = None;
        self.attrs.mark_dirty(GroupField::Members);
    }

    /// Set resolved members. Raw identifiers are discarded.
    pub fn set_member_objects(&mut self, users: Vec<User>) {
        self.member_objects = Some(users);
        self.members = None;
    }

    /// Set both levels at once, keeping them consistent.
    pub fn set_members_with_objects(&mut self, members: Vec<String>, users: Vec<User>) {
        self.members = Some(members);
        self.member_objects = Some(users);
        self.attrs.mark_dirty(GroupField::Members);
    }

    pub(crate) fn resolve_members(&mut self, users: Vec<User>) {
        self.member_objects = Some(users);
    }

    pub(crate) fn set_loaded_members(&mut self, members: Vec<String>) {
        self.members = Some(members);
    }

    /// Resolved members, if already loaded.
    pub fn cached_member_objects(&self) -> Option<&[User]> {
        self.member_objects.as_deref()
    }

    /// Resolved members sorted by real name, loaded on first call.
    pub fn member_objects(&mut self, session: &mut DirectorySession) -> Result<&[User], DirectoryError> {
        if self.member_objects.is_none() {
            session.groups().load_members(std::slice::from_mut(self))?;
        }
        Ok(self.member_objects.as_deref().unwrap_or_default())
    }

    /// Member identifiers to write: raw ids when known, else the usernames
    /// of resolved members.
    fn member_values(&self) -> Option<Vec<String>> {
        self.members.clone().or_else(|| {
            self.member_objects.as_ref().map(|users| {
                users
                    .iter()
                    .filter_map(|u| u.username().map(String::from))
                    .collect()
            })
        })
    }

    // -----------------------------------------------------------------------
    // Write-back
    // -----------------------------------------------------------------------

    fn require_name(&self) -> Result<&str, DirectoryError> {
        self.name()
            .ok_or_else(|| DirectoryError::Validation("group has no name".into()))
    }

    /// Create the entry if this group is new. Fails with
    /// [`DirectoryError::Conflict`] when the name is taken.
    pub fn create(&mut self, session: &mut DirectorySession) -> Result<(), DirectoryError> {
        session.bind_privileged()?;
        let name = self.require_name()?.to_string();
        if !self.is_new() {
            return Ok(());
        }

        if session.groups().exists(&name)? {
            return Err(DirectoryError::Conflict {
                entity: "group",
                name,
            });
        }

        let id = session.groups().next_id()?;
        let payload = self.creation_payload(session.config(), &name, id)?;
        let dn = self.dn(session.config())?;
        session.add(&dn, &payload)?;

        self.attrs.mark_created(&session.config().groups.fields, &payload);
        info!(group = %name, id, "group created");
        Ok(())
    }

    fn creation_payload(
        &self,
        config: &LdapConfig,
        name: &str,
        id: u64,
    ) -> Result<Vec<AttributeValues>, DirectoryError> {
        let groups = &config.groups;
        let fields = &groups.fields;
        let description = self.description().unwrap_or(&groups.default_description);

        let mut payload: Vec<AttributeValues> =
            vec![("objectClass".into(), groups.create_object_classes.clone())];
        push_unique(&mut payload, fields.require(GroupField::UniqueId)?, name);
        push_unique(&mut payload, fields.require(GroupField::Name)?, name);
        push_unique(&mut payload, fields.require(GroupField::Id)?, &id.to_string());
        if let Some(attr) = fields.get(GroupField::Description) {
            push_unique(&mut payload, attr, description);
        }
        Ok(payload)
    }

    /// Write every changed field; `members` sends the whole member list.
    /// Fails with a validation error while the group is still new.
    pub fn apply_changes(&mut self, session: &mut DirectorySession) -> Result<(), DirectoryError> {
        if self.is_new() {
            return Err(DirectoryError::Validation(
                "group must be created before changes can be applied".into(),
            ));
        }
        let name = self.require_name()?.to_string();
        if !self.attrs.has_changes() {
            return Ok(());
        }
        session.bind_privileged()?;

        let fields = &session.config().groups.fields;
        let mut changes: Vec<AttributeValues> = Vec::new();
        for field in self.attrs.dirty() {
            let values = match field {
                GroupField::Members => self.member_values().ok_or_else(|| {
                    DirectoryError::Validation(format!("members of group '{}' are not loaded", name))
                })?,
                _ => self.get(field).map(|v| vec![v.to_string()]).unwrap_or_default(),
            };
            let attr = fields.require(field)?;
            if !changes.iter().any(|(n, _)| n.eq_ignore_ascii_case(attr)) {
                changes.push((attr.to_string(), values));
            }
        }

        let dn = self.dn(session.config())?;
        session.modify(&dn, &changes)?;
        self.attrs.mark_clean();
        info!(group = %name, fields = changes.len(), "group updated");
        Ok(())
    }

    /// [`create`](Self::create) then [`apply_changes`](Self::apply_changes).
    pub fn store(&mut self, session: &mut DirectorySession) -> Result<(), DirectoryError> {
        self.create(session)?;
        self.apply_changes(session)
    }

    /// Not supported.
    pub fn delete(&mut self, _session: &mut DirectorySession) -> Result<(), DirectoryError> {
        Err(DirectoryError::NotImplemented("deleting groups"))
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Logical fields as JSON. `members` holds resolved users when loaded,
    /// raw identifiers when only those are known, and `null` otherwise.
    pub fn to_map(&self, except: &[&str]) -> Value {
        let mut map = self.attrs.to_json(except);
        if !except.contains(&"members") {
            let members = match (&self.member_objects, &self.members) {
                (Some(users), _) => Value::Array(users.iter().map(|u| u.to_map(&[])).collect()),
                (None, Some(ids)) => Value::Array(ids.iter().cloned().map(Value::String).collect()),
                (None, None) => Value::Null,
            };
            map.insert("members".into(), members);
        }
        Value::Object(map)
    }
}

impl Serialize for Group {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map(&[]).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fields::UserField;

    fn staff() -> Group {
        Group::with_values([
            (GroupField::UniqueId, "staff"),
            (GroupField::Name, "staff"),
            (GroupField::Id, "2000"),
        ])
    }

    #[test]
    fn test_member_levels_are_exclusive_setters() {
        let mut group = staff();
        group.set_member_objects(vec![User::with_values([(UserField::Username, "bob")])]);
        assert!(group.members().is_none());

        group.set_members(vec!["alice".into()]);
        assert!(group.cached_member_objects().is_none());
        assert!(group.attributes().is_dirty(GroupField::Members));

        group.set_members_with_objects(
            vec!["carol".into()],
            vec![User::with_values([(UserField::Username, "carol")])],
        );
        assert_eq!(group.members().map(<[String]>::len), Some(1));
        assert_eq!(group.cached_member_objects().map(<[User]>::len), Some(1));
    }

    #[test]
    fn test_member_values_fall_back_to_objects() {
        let mut group = staff();
        group.set_member_objects(vec![
            User::with_values([(UserField::Username, "bob")]),
            User::with_values([(UserField::Realname, "No Login")]),
        ]);
        assert_eq!(group.member_values(), Some(vec!["bob".to_string()]));
    }

    #[test]
    fn test_members_field_routes_to_member_list() {
        let mut group = staff();
        group.set_by_name("members", "carol").unwrap();
        assert_eq!(group.get(GroupField::Members), None);
        assert_eq!(group.members(), Some(&["carol".to_string()][..]));
        assert_eq!(group.member_values(), Some(vec!["carol".to_string()]));

        group.clear(GroupField::Members);
        assert_eq!(group.members(), Some(&[][..]));
        assert!(group.attributes().is_dirty(GroupField::Members));

        let built = Group::with_values([
            (GroupField::Name, "ops"),
            (GroupField::Members, "alice"),
            (GroupField::Members, "bob"),
        ]);
        assert_eq!(built.members().map(<[String]>::len), Some(2));
        assert_eq!(built.get(GroupField::Members), None);
    }

    #[test]
    fn test_hydrate_members() {
        let fields = FieldMap::<GroupField>::default().lowercased();
        let entry = RawEntry::new(
            "cn=staff,ou=Groups",
            [
                ("cn", vec!["staff".to_string()]),
                ("gidNumber", vec!["2000".to_string()]),
            ],
        );
        let with = Group::from_entry(&entry, &fields, true);
        assert_eq!(with.members(), Some(&[][..]));
        assert_eq!(with.description(), None);

        let without = Group::from_entry(&entry, &fields, false);
        assert!(without.members().is_none());
    }

    #[test]
    fn test_to_map_members_variants() {
        let mut group = staff();
        assert!(group.to_map(&[])["members"].is_null());

        group.set_members(vec!["alice".into()]);
        assert_eq!(group.to_map(&[])["members"], serde_json::json!(["alice"]));

        group.set_member_objects(vec![User::with_values([(UserField::Username, "alice")])]);
        assert_eq!(group.to_map(&[])["members"][0]["username"], "alice");

        assert!(group.to_map(&["members"]).get("members").is_none());
    }

    #[test]
    fn test_dn() {
        let config = LdapConfig::new("ldap://x", "uid=USERNAME,ou=People,dc=test", "ou=People,dc=test", "ou=Groups,dc=test");
        assert_eq!(staff().dn(&config).unwrap(), "cn=staff,ou=Groups,dc=test");
        assert!(matches!(Group::new().dn(&config), Err(DirectoryError::Validation(_))));
    }
}
