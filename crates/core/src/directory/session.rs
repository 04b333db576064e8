//! A single logical conversation with the directory server.
//!
//! [`DirectorySession`] owns at most one live connection, opened on first use,
//! and remembers which identity that connection is bound as. Repositories
//! borrow the session mutably for the duration of an operation.

use tracing::{debug, info, instrument, warn};

use super::entry::RawEntry;
use super::transport::{AttributeValues, Connector, LdapConnector, Transport};
use crate::config::LdapConfig;
use crate::errors::DirectoryError;
use crate::identity::{GroupRepository, UserRepository};

/// Identity the session's connection is currently bound as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAs {
    Anonymous,
    /// Bound through the user DN template.
    User(String),
    /// Bound as the configured service account.
    Service,
}

enum State {
    Disconnected,
    Connected(Box<dyn Transport>),
    /// Connecting failed; the session cannot be reused.
    Failed(String),
}

/// Connection and bind state for one logical operation.
pub struct DirectorySession {
    config: LdapConfig,
    connector: Box<dyn Connector>,
    state: State,
    bound: BoundAs,
}

impl std::fmt::Debug for DirectorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Disconnected => "disconnected",
            State::Connected(_) => "connected",
            State::Failed(_) => "failed",
        };
        f.debug_struct("DirectorySession")
            .field("server", &self.config.server)
            .field("state", &state)
            .field("bound", &self.bound)
            .finish()
    }
}

impl DirectorySession {
    /// Session against a real server. Nothing is opened until first use.
    pub fn new(config: LdapConfig) -> Self {
        Self::with_connector(config, LdapConnector)
    }

    /// Session using a custom connector, such as the in-memory directory
    /// compiled with the `testing` feature.
    pub fn with_connector(config: LdapConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            state: State::Disconnected,
            bound: BoundAs::Anonymous,
        }
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed(_))
    }

    pub fn bound_as(&self) -> &BoundAs {
        &self.bound
    }

    /// Repository for user entries.
    pub fn users(&mut self) -> UserRepository<'_> {
        UserRepository::new(self)
    }

    /// Repository for group entries.
    pub fn groups(&mut self) -> GroupRepository<'_> {
        GroupRepository::new(self)
    }

    /// Open the connection if it is not open yet. StartTLS, when enabled,
    /// is negotiated here, before any bind.
    ///
    /// A failure moves the session to a terminal state: every later call
    /// returns [`DirectoryError::Connection`].
    pub fn connect(&mut self) -> Result<(), DirectoryError> {
        match self.state {
            State::Connected(_) => return Ok(()),
            State::Failed(ref detail) => {
                return Err(DirectoryError::Connection {
                    server: self.config.server.clone(),
                    detail: format!("session unusable after earlier failure: {}", detail),
                })
            }
            State::Disconnected => {}
        }

        match self.connector.open(&self.config) {
            Ok(transport) => {
                debug!(server = %self.config.server, tls = self.config.tls, "connected");
                self.state = State::Connected(transport);
                self.bound = BoundAs::Anonymous;
                Ok(())
            }
            Err(e) => {
                warn!(server = %self.config.server, error = %e, "connection failed");
                self.state = State::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn transport(&mut self) -> Result<&mut (dyn Transport + 'static), DirectoryError> {
        self.connect()?;
        match self.state {
            State::Connected(ref mut transport) => Ok(transport.as_mut()),
            _ => Err(DirectoryError::Connection {
                server: self.config.server.clone(),
                detail: "not connected".into(),
            }),
        }
    }

    /// Bind as `identity` through the DN template.
    ///
    /// Returns `Ok(false)` when the server rejects the credentials, leaving
    /// the session anonymous. An empty secret is refused without contacting
    /// the server.
    #[instrument(skip(self, secret), fields(server = %self.config.server))]
    pub fn bind(&mut self, identity: &str, secret: &str) -> Result<bool, DirectoryError> {
        if secret.is_empty() {
            debug!("refusing bind with empty secret");
            return Ok(false);
        }

        let dn = self.config.user_dn(identity);
        let accepted = self.transport()?.simple_bind(&dn, secret)?;
        self.bound = if accepted {
            BoundAs::User(identity.to_string())
        } else {
            BoundAs::Anonymous
        };
        debug!(dn = %dn, accepted, "bind");
        Ok(accepted)
    }

    /// Bind as the service account. No-op when already bound as it.
    ///
    /// A missing account or password, or a rejected bind, is a
    /// [`DirectoryError::Write`] since privilege is only needed for writes.
    #[instrument(skip(self), fields(server = %self.config.server))]
    pub fn bind_privileged(&mut self) -> Result<(), DirectoryError> {
        if self.bound == BoundAs::Service && self.is_connected() {
            return Ok(());
        }

        let dn = self
            .config
            .service
            .bind_dn
            .clone()
            .ok_or_else(|| DirectoryError::Write {
                dn: self.config.server.clone(),
                detail: "no service account configured".into(),
            })?;
        let password = self
            .config
            .service
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DirectoryError::Write {
                dn: dn.clone(),
                detail: "service account password is not set".into(),
            })?;

        if !self.transport()?.simple_bind(&dn, &password)? {
            self.bound = BoundAs::Anonymous;
            return Err(DirectoryError::Write {
                dn,
                detail: "service account bind rejected".into(),
            });
        }

        info!(dn = %dn, "bound as service account");
        self.bound = BoundAs::Service;
        Ok(())
    }

    /// Subtree search under `base`. Attribute names in the result are
    /// lowercased; an empty result is not an error.
    #[instrument(skip(self, attrs), fields(server = %self.config.server))]
    pub fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        let entries = self.transport()?.search(base, filter, attrs)?;
        debug!(count = entries.len(), "search complete");
        Ok(entries)
    }

    /// Create an entry.
    #[instrument(skip(self, attrs), fields(server = %self.config.server))]
    pub fn add(&mut self, dn: &str, attrs: &[AttributeValues]) -> Result<(), DirectoryError> {
        self.transport()?.add(dn, attrs)?;
        info!(attributes = attrs.len(), "entry added");
        Ok(())
    }

    /// Replace the listed attributes; an empty value list deletes one.
    #[instrument(skip(self, changes), fields(server = %self.config.server))]
    pub fn modify(&mut self, dn: &str, changes: &[AttributeValues]) -> Result<(), DirectoryError> {
        self.transport()?.modify(dn, changes)?;
        info!(attributes = changes.len(), "entry modified");
        Ok(())
    }

    /// Unbind and drop the connection. A later call reconnects.
    pub fn close(&mut self) -> Result<(), DirectoryError> {
        if !self.is_connected() {
            return Ok(());
        }
        if let State::Connected(mut transport) =
            std::mem::replace(&mut self.state, State::Disconnected)
        {
            self.bound = BoundAs::Anonymous;
            transport.unbind()?;
            debug!(server = %self.config.server, "session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::{MemoryDirectory, Operation};

    const ADMIN: &str = "cn=admin,dc=test";

    fn config() -> LdapConfig {
        let mut config = LdapConfig::new(
            "ldap://memory",
            "uid=USERNAME,ou=People,dc=test",
            "ou=People,dc=test",
            "ou=Groups,dc=test",
        );
        config.service.bind_dn = Some(ADMIN.into());
        config.service.password = Some("adminpw".into());
        config
    }

    fn directory() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.add_service_account(ADMIN, "adminpw");
        dir.set_password("uid=alice,ou=People,dc=test", "wonderland");
        dir
    }

    #[test]
    fn test_connect_is_lazy_and_idempotent() {
        let dir = directory();
        let mut session = DirectorySession::with_connector(config(), dir.clone());
        assert!(!session.is_connected());
        assert_eq!(dir.connection_count(), 0);

        session.connect().unwrap();
        session.connect().unwrap();
        assert!(session.is_connected());
        assert_eq!(dir.connection_count(), 1);
    }

    #[test]
    fn test_bind_records_identity() {
        let mut session = DirectorySession::with_connector(config(), directory());

        assert!(session.bind("alice", "wonderland").unwrap());
        assert_eq!(session.bound_as(), &BoundAs::User("alice".into()));

        assert!(!session.bind("alice", "wrong").unwrap());
        assert_eq!(session.bound_as(), &BoundAs::Anonymous);
    }

    #[test]
    fn test_empty_secret_never_reaches_server() {
        let dir = directory();
        let mut session = DirectorySession::with_connector(config(), dir.clone());
        assert!(!session.bind("alice", "").unwrap());
        assert!(dir.operations().is_empty());
    }

    #[test]
    fn test_bind_escapes_identity() {
        let dir = directory();
        let mut session = DirectorySession::with_connector(config(), dir.clone());
        assert!(!session.bind("a*", "x").unwrap());
        assert_eq!(
            dir.operations()[0],
            Operation::Bind {
                dn: r"uid=a\2a,ou=People,dc=test".into()
            }
        );
    }

    #[test]
    fn test_bind_privileged_is_idempotent() {
        let dir = directory();
        let mut session = DirectorySession::with_connector(config(), dir.clone());

        session.bind_privileged().unwrap();
        session.bind_privileged().unwrap();
        assert_eq!(session.bound_as(), &BoundAs::Service);

        let binds = dir
            .operations()
            .into_iter()
            .filter(|op| matches!(op, Operation::Bind { .. }))
            .count();
        assert_eq!(binds, 1);
    }

    #[test]
    fn test_bind_privileged_failures_are_write_errors() {
        let mut no_password = config();
        no_password.service.password = None;
        let mut session = DirectorySession::with_connector(no_password, directory());
        assert!(matches!(
            session.bind_privileged(),
            Err(DirectoryError::Write { .. })
        ));

        let mut wrong = config();
        wrong.service.password = Some("nope".into());
        let mut session = DirectorySession::with_connector(wrong, directory());
        assert!(matches!(
            session.bind_privileged(),
            Err(DirectoryError::Write { .. })
        ));
        assert_eq!(session.bound_as(), &BoundAs::Anonymous);
    }

    #[test]
    fn test_user_bind_drops_service_privilege() {
        let mut session = DirectorySession::with_connector(config(), directory());
        session.bind_privileged().unwrap();
        session.bind("alice", "wonderland").unwrap();
        assert_eq!(session.bound_as(), &BoundAs::User("alice".into()));
    }

    #[test]
    fn test_connection_failure_is_terminal() {
        let dir = directory();
        dir.refuse_connections(true);
        let mut session = DirectorySession::with_connector(config(), dir.clone());

        assert!(matches!(
            session.search("dc=test", "(objectClass=*)", &[]),
            Err(DirectoryError::Connection { .. })
        ));
        assert!(session.is_failed());

        dir.refuse_connections(false);
        assert!(matches!(
            session.bind("alice", "wonderland"),
            Err(DirectoryError::Connection { .. })
        ));
        assert_eq!(dir.connection_count(), 0);
    }

    #[test]
    fn test_tls_failure_is_terminal() {
        let dir = directory();
        dir.fail_starttls(true);
        let mut tls = config();
        tls.tls = true;
        let mut session = DirectorySession::with_connector(tls, dir);

        assert!(matches!(session.connect(), Err(DirectoryError::Tls { .. })));
        assert!(matches!(
            session.connect(),
            Err(DirectoryError::Connection { .. })
        ));
    }

    #[test]
    fn test_close_and_reconnect() {
        let dir = directory();
        let mut session = DirectorySession::with_connector(config(), dir.clone());
        session.bind_privileged().unwrap();
        session.close().unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.bound_as(), &BoundAs::Anonymous);

        session.search("dc=test", "(objectClass=*)", &[]).unwrap();
        assert_eq!(dir.connection_count(), 2);
        assert!(dir.operations().contains(&Operation::Unbind));
    }

    #[test]
    fn test_search_error_propagates() {
        let dir = directory();
        dir.fail_searches(Some("server busy"));
        let mut session = DirectorySession::with_connector(config(), dir);
        let err = session
            .search("ou=People,dc=test", "(uid=alice)", &[])
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Search { ref detail, .. } if detail == "server busy"));
        assert!(!session.is_failed());
    }
}
