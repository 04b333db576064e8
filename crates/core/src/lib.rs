//! ldapauth core library.
//!
//! This crate provides the directory access layer of the ldapauth identity
//! provider: configuration, sessions against an LDAP server, filter escaping
//! and attribute mapping, and the user/group domain model with lazy
//! relationship loading and write-back.

pub mod config;
pub mod directory;
pub mod errors;
pub mod identity;

// Re-exports for convenience.
pub use config::AppConfig;
pub use directory::{DirectorySession, GroupField, UserField};
#[cfg(any(test, feature = "testing"))]
pub use directory::MemoryDirectory;
pub use errors::{CoreError, DirectoryError};
pub use identity::{Credentials, Group, User, UserProvider};
