//! Entry points for an authentication layer: credential checks, user
//! lookup, and group-membership checks.

use std::fmt;

use serde::Deserialize;
use tracing::{debug, info};

use super::user::User;
use crate::config::LdapConfig;
use crate::directory::DirectorySession;
use crate::errors::DirectoryError;

/// Username and password as submitted by a login form.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owns the session used to serve one authentication request.
#[derive(Debug)]
pub struct UserProvider {
    session: DirectorySession,
}

impl UserProvider {
    pub fn new(config: LdapConfig) -> Self {
        Self::with_session(DirectorySession::new(config))
    }

    pub fn with_session(session: DirectorySession) -> Self {
        Self { session }
    }

    pub fn session(&mut self) -> &mut DirectorySession {
        &mut self.session
    }

    /// Whether the directory accepts `secret` for `identifier`.
    pub fn validate(&mut self, identifier: &str, secret: &str) -> Result<bool, DirectoryError> {
        let accepted = self.session.bind(identifier, secret)?;
        info!(user = identifier, accepted, "credential check");
        Ok(accepted)
    }

    /// Check submitted credentials.
    pub fn validate_credentials(&mut self, credentials: &Credentials) -> Result<bool, DirectoryError> {
        self.validate(&credentials.username, &credentials.password)
    }

    /// The user with this stable identifier (username), if any.
    pub fn load_by_identifier(&mut self, identifier: &str) -> Result<Option<User>, DirectoryError> {
        let user = self.session.users().find_by_username(identifier)?;
        debug!(user = identifier, found = user.is_some(), "load by identifier");
        Ok(user)
    }

    /// The user named in `credentials`. The password is not checked here;
    /// use [`validate_credentials`](Self::validate_credentials).
    pub fn load_by_credentials(&mut self, credentials: &Credentials) -> Result<Option<User>, DirectoryError> {
        self.load_by_identifier(&credentials.username)
    }

    /// Whether `user` belongs to `group`; with `allow_superadmin`, members
    /// of the superadmin group pass too.
    pub fn is_member(
        &mut self,
        user: &mut User,
        group: &str,
        allow_superadmin: bool,
    ) -> Result<bool, DirectoryError> {
        user.in_group(&mut self.session, group, allow_superadmin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_credentials_deserialize() {
        let creds: Credentials =
            serde_json::from_str(r#"{"username":"alice","password":"pw"}"#).unwrap();
        assert_eq!(creds.username, "alice");
    }
}
