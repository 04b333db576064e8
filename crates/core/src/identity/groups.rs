//! Group lookups and member resolution.

use std::collections::HashMap;

use tracing::debug;

use super::group::Group;
use super::users::UserRepository;
use super::{next_numeric_id, requested_attributes};
use crate::directory::fields::{FieldMap, GroupField};
use crate::directory::{filter, DirectorySession};
use crate::errors::DirectoryError;

/// Finds groups under the configured group base. Groups on the ignore list
/// are never returned.
pub struct GroupRepository<'a> {
    session: &'a mut DirectorySession,
    /// Lowercased copy of the field map, for matching returned entries.
    fields: FieldMap<GroupField>,
}

impl<'a> GroupRepository<'a> {
    pub fn new(session: &'a mut DirectorySession) -> Self {
        let fields = session.config().groups.fields.lowercased();
        Self { session, fields }
    }

    fn base_filter(&self) -> String {
        filter::object_class(&self.session.config().groups.object_class)
    }

    fn attr(&self, field: GroupField) -> Result<String, DirectoryError> {
        Ok(self.session.config().groups.fields.require(field)?.to_string())
    }

    /// The named group with its member identifiers.
    pub fn find_by_name(&mut self, name: &str) -> Result<Option<Group>, DirectoryError> {
        let filter = filter::eq(&self.attr(GroupField::UniqueId)?, name);
        Ok(self.search(Some(&filter), true)?.into_iter().next())
    }

    /// Groups with any of the given names, in one search.
    pub fn find_by_names<S: AsRef<str>>(
        &mut self,
        names: &[S],
        resolve_members: bool,
    ) -> Result<Vec<Group>, DirectoryError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let attr = self.attr(GroupField::UniqueId)?;
        let filter = filter::or(names.iter().map(|n| filter::eq(&attr, n.as_ref())));
        self.search(Some(&filter), resolve_members)
    }

    /// Every group, without member lists.
    pub fn all(&mut self) -> Result<Vec<Group>, DirectoryError> {
        self.search(None, false)
    }

    /// Groups matching the object class and, if given, `filter`, sorted by
    /// name ignoring case. With `resolve_members` each group carries its raw
    /// member list (empty when the entry has none).
    pub fn search(&mut self, filter: Option<&str>, resolve_members: bool) -> Result<Vec<Group>, DirectoryError> {
        let config = self.session.config();
        let fields = &config.groups.fields;
        let mut wanted = vec![GroupField::UniqueId, GroupField::Id, GroupField::Name, GroupField::Description];
        if resolve_members {
            wanted.push(GroupField::Members);
        }
        let attrs = requested_attributes(wanted.into_iter().filter_map(|f| fields.get(f)));
        let base = config.groups.base_dn.clone();
        let filter = filter::restrict(&self.base_filter(), filter);

        let entries = self.session.search(&base, &filter, &attrs)?;
        let config = self.session.config();
        let unique_id_attr = self.fields.get(GroupField::UniqueId).unwrap_or_default();

        let mut groups: Vec<Group> = entries
            .iter()
            .filter(|e| match e.first(unique_id_attr) {
                Some(id) if config.is_ignored_group(id) => {
                    debug!(group = id, "skipping ignored group");
                    false
                }
                _ => true,
            })
            .map(|e| Group::from_entry(e, &self.fields, resolve_members))
            .collect();
        groups.sort_by_cached_key(|g| g.name().unwrap_or_default().to_lowercase());

        debug!(count = groups.len(), "groups loaded");
        Ok(groups)
    }

    /// Groups listing `username` as a member.
    pub fn groups_of(&mut self, username: &str) -> Result<Vec<Group>, DirectoryError> {
        let filter = filter::eq(&self.attr(GroupField::Members)?, username);
        self.search(Some(&filter), false)
    }

    /// Resolve member objects for every group using one user search.
    ///
    /// Groups whose raw member list is unknown get it fetched first, also in
    /// a single search. Identifiers without a matching user are left out of
    /// the resolved list but stay in the raw one.
    pub fn load_members(&mut self, groups: &mut [Group]) -> Result<(), DirectoryError> {
        self.fill_member_lists(groups)?;

        let mut wanted: Vec<&str> = Vec::new();
        for id in groups.iter().filter_map(Group::members).flatten() {
            if !wanted.contains(&id.as_str()) {
                wanted.push(id);
            }
        }
        let users = UserRepository::new(self.session).find_by_usernames(&wanted)?;

        for group in groups.iter_mut() {
            let ids = group.members().unwrap_or_default();
            let resolved = users
                .iter()
                .filter(|u| {
                    [u.unique_id(), u.username()]
                        .into_iter()
                        .flatten()
                        .any(|key| ids.iter().any(|id| id == key))
                })
                .cloned()
                .collect();
            group.resolve_members(resolved);
        }
        Ok(())
    }

    fn fill_member_lists(&mut self, groups: &mut [Group]) -> Result<(), DirectoryError> {
        let unknown: Vec<String> = groups
            .iter()
            .filter(|g| g.members().is_none())
            .filter_map(|g| g.unique_id().map(String::from))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }

        let fetched: HashMap<String, Vec<String>> = self
            .find_by_names(&unknown, true)?
            .into_iter()
            .filter_map(|g| Some((g.unique_id()?.to_string(), g.members()?.to_vec())))
            .collect();
        for group in groups.iter_mut().filter(|g| g.members().is_none()) {
            let members = group
                .unique_id()
                .and_then(|id| fetched.get(id))
                .cloned()
                .unwrap_or_default();
            group.set_loaded_members(members);
        }
        Ok(())
    }

    /// Whether any group entry has this name, including ignored ones.
    pub fn exists(&mut self, name: &str) -> Result<bool, DirectoryError> {
        let attr = self.attr(GroupField::UniqueId)?;
        let base = self.session.config().groups.base_dn.clone();
        let filter = filter::and([self.base_filter(), filter::eq(&attr, name)]);
        Ok(!self.session.search(&base, &filter, &[attr])?.is_empty())
    }

    /// One more than the highest numeric group id, or the configured first
    /// id when there are none. Same race as
    /// [`UserRepository::next_id`].
    pub fn next_id(&mut self) -> Result<u64, DirectoryError> {
        let attr = self.attr(GroupField::Id)?;
        let base = self.session.config().groups.base_dn.clone();
        let first_id = self.session.config().groups.first_id;
        let filter = self.base_filter();
        next_numeric_id(self.session, &base, &filter, &attr, first_id)
    }
}
