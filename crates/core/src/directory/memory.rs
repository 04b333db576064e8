//! In-process directory implementing [`Connector`] and [`Transport`].
//!
//! Compiled for tests and with the `testing` feature. It evaluates real filter
//! strings, enforces bind credentials and write permissions the way a server
//! would, keeps entries in insertion order, and records every operation so
//! callers can assert on round trips.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::entry::RawEntry;
use super::filter::Filter;
use super::transport::{AttributeValues, Connector, Transport};
use crate::config::LdapConfig;
use crate::errors::DirectoryError;

/// One recorded directory operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Bind { dn: String },
    Search {
        base: String,
        filter: String,
        attrs: Vec<String>,
    },
    Add {
        dn: String,
        attrs: Vec<AttributeValues>,
    },
    Modify {
        dn: String,
        changes: Vec<AttributeValues>,
    },
    Unbind,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    dn: String,
    attrs: Vec<(String, Vec<String>)>,
}

impl StoredEntry {
    fn to_raw(&self, requested: &[String]) -> RawEntry {
        let all = requested.is_empty() || requested.iter().any(|a| a == "*");
        RawEntry::new(
            self.dn.clone(),
            self.attrs
                .iter()
                .filter(|(name, _)| all || requested.iter().any(|r| r.eq_ignore_ascii_case(name)))
                .map(|(name, values)| (name.as_str(), values.clone())),
        )
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<StoredEntry>,
    passwords: HashMap<String, String>,
    writers: HashSet<String>,
    log: Vec<Operation>,
    connections: usize,
    refuse_connections: bool,
    fail_starttls: bool,
    fail_searches: Option<String>,
    fail_next_write: Option<String>,
}

impl MemoryState {
    fn position(&self, dn: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.dn.eq_ignore_ascii_case(dn))
    }
}

/// Shared handle to an in-memory directory tree. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an entry.
    pub fn insert(&self, dn: &str, attrs: Vec<(&str, Vec<&str>)>) {
        let entry = StoredEntry {
            dn: dn.to_string(),
            attrs: attrs
                .into_iter()
                .map(|(name, values)| {
                    (
                        name.to_string(),
                        values.into_iter().map(String::from).collect(),
                    )
                })
                .collect(),
        };
        let mut state = self.state();
        match state.position(dn) {
            Some(idx) => state.entries[idx] = entry,
            None => state.entries.push(entry),
        }
    }

    /// Accept `secret` for binds as `dn`.
    pub fn set_password(&self, dn: &str, secret: &str) {
        self.state()
            .passwords
            .insert(dn.to_lowercase(), secret.to_string());
    }

    /// Allow sessions bound as `dn` to add and modify entries.
    pub fn grant_write(&self, dn: &str) {
        self.state().writers.insert(dn.to_lowercase());
    }

    /// Register a bindable account with write access.
    pub fn add_service_account(&self, dn: &str, secret: &str) {
        self.set_password(dn, secret);
        self.grant_write(dn);
    }

    /// Make every subsequent connection attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Make StartTLS negotiation fail.
    pub fn fail_starttls(&self, fail: bool) {
        self.state().fail_starttls = fail;
    }

    /// Make every search fail with `detail`, or stop failing with `None`.
    pub fn fail_searches(&self, detail: Option<&str>) {
        self.state().fail_searches = detail.map(String::from);
    }

    /// Reject the next add or modify with `detail`.
    pub fn fail_next_write(&self, detail: &str) {
        self.state().fail_next_write = Some(detail.to_string());
    }

    /// Current state of the entry at `dn`, all attributes.
    pub fn entry(&self, dn: &str) -> Option<RawEntry> {
        let state = self.state();
        state.position(dn).map(|idx| state.entries[idx].to_raw(&[]))
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every operation recorded since creation or the last `clear_log`.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().log.clone()
    }

    /// `(base, filter)` of every recorded search.
    pub fn searches(&self) -> Vec<(String, String)> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Search { base, filter, .. } => Some((base, filter)),
                _ => None,
            })
            .collect()
    }

    /// Recorded adds and modifies.
    pub fn writes(&self) -> Vec<Operation> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op, Operation::Add { .. } | Operation::Modify { .. }))
            .collect()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.state().connections
    }
}

impl Connector for MemoryDirectory {
    fn open(&self, config: &LdapConfig) -> Result<Box<dyn Transport>, DirectoryError> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(DirectoryError::Connection {
                server: config.server.clone(),
                detail: "connection refused".into(),
            });
        }
        if config.tls && state.fail_starttls {
            return Err(DirectoryError::Tls {
                server: config.server.clone(),
                detail: "StartTLS negotiation failed".into(),
            });
        }
        state.connections += 1;
        debug!(server = %config.server, "opened in-memory directory connection");

        Ok(Box::new(MemoryConnection {
            dir: self.clone(),
            bound: None,
        }))
    }
}

struct MemoryConnection {
    dir: MemoryDirectory,
    bound: Option<String>,
}

impl MemoryConnection {
    fn check_write(&self, state: &mut MemoryState, dn: &str) -> Result<(), DirectoryError> {
        let write_error = |detail: String| DirectoryError::Write {
            dn: dn.to_string(),
            detail,
        };
        let allowed = self
            .bound
            .as_ref()
            .is_some_and(|b| state.writers.contains(b));
        if !allowed {
            return Err(write_error("insufficient access rights".into()));
        }
        if let Some(detail) = state.fail_next_write.take() {
            return Err(write_error(detail));
        }
        Ok(())
    }
}

fn in_subtree(dn: &str, base: &str) -> bool {
    let dn = dn.to_lowercase();
    let base = base.to_lowercase();
    dn == base || dn.ends_with(&format!(",{}", base))
}

impl Transport for MemoryConnection {
    fn simple_bind(&mut self, dn: &str, secret: &str) -> Result<bool, DirectoryError> {
        let mut state = self.dir.state();
        state.log.push(Operation::Bind { dn: dn.to_string() });

        // An empty password is an unauthenticated bind, which servers accept.
        let accepted = secret.is_empty()
            || state
                .passwords
                .get(&dn.to_lowercase())
                .is_some_and(|p| p == secret);

        self.bound = (accepted && !secret.is_empty()).then(|| dn.to_lowercase());
        Ok(accepted)
    }

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        let mut state = self.dir.state();
        state.log.push(Operation::Search {
            base: base.to_string(),
            filter: filter.to_string(),
            attrs: attrs.to_vec(),
        });

        let search_error = |detail: String| DirectoryError::Search {
            base: base.to_string(),
            filter: filter.to_string(),
            detail,
        };
        if let Some(ref detail) = state.fail_searches {
            return Err(search_error(detail.clone()));
        }
        let parsed = Filter::parse(filter).map_err(|e| search_error(e.to_string()))?;

        Ok(state
            .entries
            .iter()
            .filter(|e| in_subtree(&e.dn, base))
            .filter(|e| parsed.matches(&e.to_raw(&[])))
            .map(|e| e.to_raw(attrs))
            .collect())
    }

    fn add(&mut self, dn: &str, attrs: &[AttributeValues]) -> Result<(), DirectoryError> {
        let mut state = self.dir.state();
        state.log.push(Operation::Add {
            dn: dn.to_string(),
            attrs: attrs.to_vec(),
        });
        self.check_write(&mut state, dn)?;

        if state.position(dn).is_some() {
            return Err(DirectoryError::Write {
                dn: dn.to_string(),
                detail: "entry already exists".into(),
            });
        }
        state.entries.push(StoredEntry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .filter(|(_, values)| !values.is_empty())
                .cloned()
                .collect(),
        });
        Ok(())
    }

    fn modify(&mut self, dn: &str, changes: &[AttributeValues]) -> Result<(), DirectoryError> {
        let mut state = self.dir.state();
        state.log.push(Operation::Modify {
            dn: dn.to_string(),
            changes: changes.to_vec(),
        });
        self.check_write(&mut state, dn)?;

        let idx = state.position(dn).ok_or_else(|| DirectoryError::Write {
            dn: dn.to_string(),
            detail: "no such object".into(),
        })?;
        let entry = &mut state.entries[idx];
        for (name, values) in changes {
            entry.attrs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            if !values.is_empty() {
                entry.attrs.push((name.clone(), values.clone()));
            }
        }
        Ok(())
    }

    fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.dir.state().log.push(Operation::Unbind);
        self.bound = None;
        Ok(())
    }
}
