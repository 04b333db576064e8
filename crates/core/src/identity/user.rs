//! User entity.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::info;

use super::attributes::Attributes;
use super::group::Group;
use super::push_unique;
use crate::config::LdapConfig;
use crate::directory::fields::{FieldMap, UserField};
use crate::directory::{AttributeValues, DirectorySession, RawEntry};
use crate::errors::DirectoryError;

/// A user account in the directory.
///
/// Field values are single strings (the first value the directory returned).
/// Group memberships are loaded on first access through [`User::groups`] and
/// cached until an explicit refresh.
#[derive(Debug, Clone, Default)]
pub struct User {
    attrs: Attributes<UserField>,
    /// Caller-requested attributes, keyed by lowercased physical name.
    extra: BTreeMap<String, Vec<String>>,
    groups: Option<Vec<Group>>,
}

impl User {
    /// A user that does not exist in the directory yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A user with the given field values. An empty iterator gives a new user.
    pub fn with_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (UserField, S)>,
        S: Into<String>,
    {
        Self {
            attrs: Attributes::new(values.into_iter().map(|(k, v)| (k, v.into())).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn from_entry(entry: &RawEntry, fields: &FieldMap<UserField>, extra: &[String]) -> Self {
        let extra = extra
            .iter()
            .filter_map(|name| {
                entry
                    .values(name)
                    .map(|values| (name.to_lowercase(), values.to_vec()))
            })
            .collect();
        Self {
            attrs: Attributes::from_entry(entry, fields),
            extra,
            groups: None,
        }
    }

    pub fn get(&self, field: UserField) -> Option<&str> {
        self.attrs.get(field)
    }

    /// Look up a field by its logical name, e.g. `"realname"`.
    pub fn get_by_name(&self, field: &str) -> Result<Option<&str>, DirectoryError> {
        Ok(self.get(field.parse()?))
    }

    pub fn set(&mut self, field: UserField, value: impl Into<String>) {
        self.attrs.set(field, value);
    }

    /// Set a field by its logical name. Unknown names are a validation error.
    pub fn set_by_name(&mut self, field: &str, value: impl Into<String>) -> Result<(), DirectoryError> {
        self.set(field.parse()?, value);
        Ok(())
    }

    /// Remove a value; the next write deletes the attribute.
    pub fn clear(&mut self, field: UserField) {
        self.attrs.clear(field);
    }

    pub fn username(&self) -> Option<&str> {
        self.get(UserField::Username)
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.get(UserField::UniqueId)
    }

    pub fn realname(&self) -> Option<&str> {
        self.get(UserField::Realname)
    }

    pub fn email(&self) -> Option<&str> {
        self.get(UserField::Email)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(UserField::Id)
    }

    /// Values of an extra attribute requested at search time.
    pub fn extra(&self, attr: &str) -> Option<&[String]> {
        self.extra.get(&attr.to_lowercase()).map(Vec::as_slice)
    }

    pub fn is_new(&self) -> bool {
        self.attrs.is_new()
    }

    pub fn attributes(&self) -> &Attributes<UserField> {
        &self.attrs
    }

    /// Entry DN derived from the bind template.
    pub fn dn(&self, config: &LdapConfig) -> Option<String> {
        self.username().map(|u| config.user_dn(u))
    }

    /// Same account, by username.
    pub fn is_same(&self, other: &User) -> bool {
        matches!((self.username(), other.username()), (Some(a), Some(b)) if a == b)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Groups this user belongs to, loaded on first call or when `refresh`
    /// is set.
    pub fn groups(
        &mut self,
        session: &mut DirectorySession,
        refresh: bool,
    ) -> Result<&[Group], DirectoryError> {
        if refresh || self.groups.is_none() {
            let username = self.require_username()?.to_string();
            self.groups = Some(session.groups().groups_of(&username)?);
        }
        Ok(self.groups.as_deref().unwrap_or_default())
    }

    /// Groups already loaded, without touching the directory.
    pub fn cached_groups(&self) -> Option<&[Group]> {
        self.groups.as_deref()
    }

    pub(crate) fn set_groups(&mut self, groups: Vec<Group>) {
        self.groups = Some(groups);
    }

    /// Whether the user is in `group`. With `allow_superadmin`, membership
    /// in the configured superadmin group also counts.
    pub fn in_group(
        &mut self,
        session: &mut DirectorySession,
        group: &str,
        allow_superadmin: bool,
    ) -> Result<bool, DirectoryError> {
        let superadmin = if allow_superadmin {
            session.config().groups.superadmin.clone()
        } else {
            None
        };
        Ok(self.groups(session, false)?.iter().any(|g| {
            g.name()
                .is_some_and(|n| n == group || superadmin.as_deref() == Some(n))
        }))
    }

    // -----------------------------------------------------------------------
    // Write-back
    // -----------------------------------------------------------------------

    fn require_username(&self) -> Result<&str, DirectoryError> {
        self.username()
            .ok_or_else(|| DirectoryError::Validation("user has no username".into()))
    }

    /// Create the entry if this user is new. Fails with
    /// [`DirectoryError::Conflict`] when the username is taken.
    pub fn create(&mut self, session: &mut DirectorySession) -> Result<(), DirectoryError> {
        session.bind_privileged()?;
        let username = self.require_username()?.to_string();
        if !self.is_new() {
            return Ok(());
        }

        if session.users().exists(&username)? {
            return Err(DirectoryError::Conflict {
                entity: "user",
                name: username,
            });
        }

        let id = session.users().next_id()?;
        let payload = self.creation_payload(session.config(), &username, id)?;
        let dn = session.config().user_dn(&username);
        session.add(&dn, &payload)?;

        self.attrs.mark_created(&session.config().users.fields, &payload);
        info!(username = %username, id, "user created");
        Ok(())
    }

    fn creation_payload(
        &self,
        config: &LdapConfig,
        username: &str,
        id: u64,
    ) -> Result<Vec<AttributeValues>, DirectoryError> {
        let users = &config.users;
        let fields = &users.fields;
        let realname = self.realname().unwrap_or(username);

        let mut payload: Vec<AttributeValues> =
            vec![("objectClass".into(), users.create_object_classes.clone())];
        push_unique(&mut payload, fields.require(UserField::UniqueId)?, username);
        push_unique(&mut payload, fields.require(UserField::Username)?, username);
        push_unique(&mut payload, fields.require(UserField::Id)?, &id.to_string());
        push_unique(&mut payload, fields.require(UserField::Realname)?, realname);
        push_unique(&mut payload, "cn", realname);
        push_unique(&mut payload, "sn", realname);
        push_unique(&mut payload, "gidNumber", &users.default_gid_number.to_string());
        push_unique(
            &mut payload,
            "homeDirectory",
            &format!("{}/{}", users.home_base.trim_end_matches('/'), username),
        );
        push_unique(&mut payload, "loginShell", &users.login_shell);
        Ok(payload)
    }

    /// Write every changed field. Fails with a validation error while the
    /// user is still new.
    pub fn apply_changes(&mut self, session: &mut DirectorySession) -> Result<(), DirectoryError> {
        if self.is_new() {
            return Err(DirectoryError::Validation(
                "user must be created before changes can be applied".into(),
            ));
        }
        let username = self.require_username()?.to_string();
        if !self.attrs.has_changes() {
            return Ok(());
        }
        session.bind_privileged()?;

        let fields = &session.config().users.fields;
        let mut changes: Vec<AttributeValues> = Vec::new();
        for field in self.attrs.dirty() {
            let values = self.get(field).map(|v| vec![v.to_string()]).unwrap_or_default();
            let attr = fields.require(field)?;
            if !changes.iter().any(|(n, _)| n.eq_ignore_ascii_case(attr)) {
                changes.push((attr.to_string(), values));
            }
        }

        let dn = session.config().user_dn(&username);
        session.modify(&dn, &changes)?;
        self.attrs.mark_clean();
        info!(username = %username, fields = changes.len(), "user updated");
        Ok(())
    }

    /// [`create`](Self::create) then [`apply_changes`](Self::apply_changes).
    pub fn store(&mut self, session: &mut DirectorySession) -> Result<(), DirectoryError> {
        self.create(session)?;
        self.apply_changes(session)
    }

    /// Not supported.
    pub fn delete(&mut self, _session: &mut DirectorySession) -> Result<(), DirectoryError> {
        Err(DirectoryError::NotImplemented("deleting users"))
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Logical fields as JSON, plus `groups` (names) when already loaded.
    /// Never triggers a directory lookup.
    pub fn to_map(&self, except: &[&str]) -> Value {
        let mut map = self.attrs.to_json(except);
        if let Some(ref groups) = self.groups {
            if !except.contains(&"groups") {
                let names = groups
                    .iter()
                    .filter_map(Group::name)
                    .map(|n| Value::String(n.to_string()))
                    .collect();
                map.insert("groups".into(), Value::Array(names));
            }
        }
        Value::Object(map)
    }
}

impl Serialize for User {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map(&[]).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fields::GroupField;

    fn alice() -> User {
        User::with_values([
            (UserField::UniqueId, "alice"),
            (UserField::Username, "alice"),
            (UserField::Realname, "Alice Liddell"),
        ])
    }

    #[test]
    fn test_with_values_is_not_new() {
        assert!(!alice().is_new());
        assert!(User::new().is_new());
        assert!(User::with_values(Vec::<(UserField, String)>::new()).is_new());
    }

    #[test]
    fn test_dynamic_field_access() {
        let mut user = alice();
        user.set_by_name("email", "alice@example.com").unwrap();
        assert_eq!(user.get_by_name("email").unwrap(), Some("alice@example.com"));
        assert!(user.attributes().is_dirty(UserField::Email));

        assert!(matches!(
            user.set_by_name("password", "x"),
            Err(DirectoryError::Validation(_))
        ));
    }

    #[test]
    fn test_to_map_without_groups() {
        let map = alice().to_map(&["id"]);
        assert_eq!(map["realname"], "Alice Liddell");
        assert!(map["email"].is_null());
        assert!(map.get("id").is_none());
        assert!(map.get("groups").is_none());
    }

    #[test]
    fn test_to_map_with_loaded_groups() {
        let mut user = alice();
        user.set_groups(vec![Group::with_values([(GroupField::Name, "staff")])]);
        assert_eq!(user.to_map(&[])["groups"], serde_json::json!(["staff"]));
        assert!(user.to_map(&["groups"]).get("groups").is_none());
    }

    #[test]
    fn test_serialize_matches_to_map() {
        let user = alice();
        assert_eq!(serde_json::to_value(&user).unwrap(), user.to_map(&[]));
    }

    #[test]
    fn test_is_same_compares_usernames() {
        let other = User::with_values([(UserField::Username, "alice")]);
        assert!(alice().is_same(&other));
        assert!(!alice().is_same(&User::new()));
        assert!(!User::new().is_same(&User::new()));
    }

    #[test]
    fn test_dn_uses_template() {
        let config = LdapConfig::new("ldap://x", "uid=USERNAME,ou=People,dc=test", "ou=People,dc=test", "ou=Groups,dc=test");
        assert_eq!(alice().dn(&config).as_deref(), Some("uid=alice,ou=People,dc=test"));
        assert_eq!(User::new().dn(&config), None);
    }
}
