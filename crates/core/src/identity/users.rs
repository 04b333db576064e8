//! User lookups.

use tracing::debug;

use super::groups::GroupRepository;
use super::user::User;
use super::{next_numeric_id, requested_attributes};
use crate::directory::fields::{FieldMap, GroupField, UserField};
use crate::directory::{filter, DirectorySession};
use crate::errors::DirectoryError;

/// Finds users under the configured user base.
pub struct UserRepository<'a> {
    session: &'a mut DirectorySession,
    /// Lowercased copy of the field map, for matching returned entries.
    fields: FieldMap<UserField>,
}

impl<'a> UserRepository<'a> {
    pub fn new(session: &'a mut DirectorySession) -> Self {
        let fields = session.config().users.fields.lowercased();
        Self { session, fields }
    }

    fn base_filter(&self) -> String {
        filter::object_class(&self.session.config().users.object_class)
    }

    fn unique_id_attr(&self) -> Result<String, DirectoryError> {
        Ok(self
            .session
            .config()
            .users
            .fields
            .require(UserField::UniqueId)?
            .to_string())
    }

    pub fn find_by_username(&mut self, username: &str) -> Result<Option<User>, DirectoryError> {
        let filter = filter::eq(&self.unique_id_attr()?, username);
        self.find_by_filter(&filter)
    }

    /// First user matching `filter`.
    pub fn find_by_filter(&mut self, filter: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self.search(Some(filter), &[])?.into_iter().next())
    }

    /// Users with any of the given names, in one search. Duplicate names are
    /// sent once; an empty list never reaches the directory.
    pub fn find_by_usernames<S: AsRef<str>>(&mut self, usernames: &[S]) -> Result<Vec<User>, DirectoryError> {
        let mut distinct: Vec<&str> = Vec::new();
        for name in usernames {
            if !distinct.contains(&name.as_ref()) {
                distinct.push(name.as_ref());
            }
        }
        if distinct.is_empty() {
            return Ok(Vec::new());
        }

        let attr = self.unique_id_attr()?;
        let filter = filter::or(distinct.iter().map(|n| filter::eq(&attr, n)));
        self.search(Some(&filter), &[])
    }

    /// Users matching the object class and, if given, `filter`, sorted by
    /// real name ignoring case. `extra_attrs` are fetched alongside the
    /// mapped fields and kept on each user.
    pub fn search(&mut self, filter: Option<&str>, extra_attrs: &[&str]) -> Result<Vec<User>, DirectoryError> {
        let config = self.session.config();
        let mapped = config.users.fields.iter().map(|(_, attr)| attr);
        let extra: Vec<String> = extra_attrs.iter().map(|a| a.to_string()).collect();
        let attrs = requested_attributes(mapped.chain(extra_attrs.iter().copied()));
        let base = config.users.base_dn.clone();
        let filter = filter::restrict(&self.base_filter(), filter);

        let entries = self.session.search(&base, &filter, &attrs)?;
        let mut users: Vec<User> = entries
            .iter()
            .map(|e| User::from_entry(e, &self.fields, &extra))
            .collect();
        users.sort_by_cached_key(|u| u.realname().unwrap_or_default().to_lowercase());

        debug!(count = users.len(), "users loaded");
        Ok(users)
    }

    /// Every user, optionally with group memberships loaded.
    pub fn all(&mut self, with_groups: bool) -> Result<Vec<User>, DirectoryError> {
        let mut users = self.search(None, &[])?;
        if with_groups {
            self.fetch_groups(&mut users)?;
        }
        Ok(users)
    }

    /// Load group memberships for many users with a single group search.
    /// Every user ends up with a (possibly empty) group list.
    pub fn fetch_groups(&mut self, users: &mut [User]) -> Result<(), DirectoryError> {
        let members_attr = self
            .session
            .config()
            .groups
            .fields
            .require(GroupField::Members)?
            .to_string();
        let clauses: Vec<String> = users
            .iter()
            .filter_map(User::username)
            .map(|u| filter::eq(&members_attr, u))
            .collect();

        let groups = if clauses.is_empty() {
            Vec::new()
        } else {
            GroupRepository::new(self.session).search(Some(&filter::or(clauses)), true)?
        };

        for user in users.iter_mut() {
            let mine = user
                .username()
                .map(|name| {
                    groups
                        .iter()
                        .filter(|g| g.members().is_some_and(|m| m.iter().any(|id| id == name)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            user.set_groups(mine);
        }
        Ok(())
    }

    /// Whether any user entry has this username, ignoring nothing.
    pub fn exists(&mut self, username: &str) -> Result<bool, DirectoryError> {
        let attr = self.unique_id_attr()?;
        let base = self.session.config().users.base_dn.clone();
        let filter = filter::and([self.base_filter(), filter::eq(&attr, username)]);
        Ok(!self.session.search(&base, &filter, &[attr])?.is_empty())
    }

    /// One more than the highest numeric user id, or the configured first
    /// id when there are none.
    ///
    /// Two callers can get the same value if neither has written yet.
    pub fn next_id(&mut self) -> Result<u64, DirectoryError> {
        let config = self.session.config();
        let attr = config.users.fields.require(UserField::Id)?.to_string();
        let base = config.users.base_dn.clone();
        let first_id = config.users.first_id;
        let filter = self.base_filter();
        next_numeric_id(self.session, &base, &filter, &attr, first_id)
    }
}
