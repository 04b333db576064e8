//! Error types for the ldapauth core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.
//!
//! Rejected credentials are not errors: a failed bind returns `false`.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors from directory sessions, repositories, and entity write-back.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The connection to the server could not be established. Terminal for
    /// the session that produced it.
    #[error("cannot connect to {server}: {detail}")]
    Connection { server: String, detail: String },

    /// The StartTLS upgrade failed. Terminal for the session that produced it.
    #[error("could not start TLS to {server}: {detail}")]
    Tls { server: String, detail: String },

    /// A search failed at the transport or protocol level.
    #[error("search under '{base}' with filter '{filter}' failed: {detail}")]
    Search {
        base: String,
        filter: String,
        detail: String,
    },

    /// An add or modify was rejected, or the privileged bind needed for it
    /// could not be obtained.
    #[error("write to '{dn}' failed: {detail}")]
    Write { dn: String, detail: String },

    /// An entry with the same identifying attribute already exists.
    #[error("{entity} '{name}' already exists")]
    Conflict { entity: &'static str, name: String },

    /// Input rejected before talking to the directory.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unsupported operation.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl DirectoryError {
    /// Whether retrying the same operation on a fresh session could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Search { .. } | Self::Write { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = DirectoryError::Conflict {
            entity: "group",
            name: "engineering".into(),
        };
        assert_eq!(err.to_string(), "group 'engineering' already exists");

        let err = DirectoryError::Tls {
            server: "ldap://ldap.example.com".into(),
            detail: "handshake failed".into(),
        };
        assert!(err.to_string().contains("could not start TLS"));

        let err = ConfigError::InvalidValue {
            field: "ldap.bind_dn".into(),
            detail: "missing placeholder".into(),
        };
        assert!(err.to_string().contains("ldap.bind_dn"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err: CoreError = DirectoryError::NotImplemented("delete").into();
        assert!(matches!(err, CoreError::Directory(_)));

        let err: CoreError = ConfigError::FileNotFound("/etc/ldapauth.toml".into()).into();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::Search {
            base: "ou=People".into(),
            filter: "(uid=a)".into(),
            detail: "busy".into(),
        }
        .is_transient());
        assert!(!DirectoryError::Conflict {
            entity: "user",
            name: "alice".into(),
        }
        .is_transient());
        assert!(!DirectoryError::Tls {
            server: "x".into(),
            detail: "y".into(),
        }
        .is_transient());
    }
}
