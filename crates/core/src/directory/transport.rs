//! The seam between [`DirectorySession`](super::DirectorySession) and the wire.
//!
//! [`Connector`] opens a [`Transport`]; the production pair is
//! [`LdapConnector`] over the synchronous `ldap3` client. The in-process
//! `MemoryDirectory` (feature `testing`) implements the same traits.

use std::collections::HashSet;
use std::time::Duration;

use ldap3::{LdapConn, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use tracing::{debug, warn};

use super::entry::RawEntry;
use crate::config::LdapConfig;
use crate::errors::DirectoryError;

/// An attribute name with the complete value set to write.
pub type AttributeValues = (String, Vec<String>);

/// An open connection to a directory server.
pub trait Transport: Send {
    /// Simple bind. `Ok(false)` when the server rejects the credentials;
    /// `Err` only when the exchange itself fails.
    fn simple_bind(&mut self, dn: &str, secret: &str) -> Result<bool, DirectoryError>;

    /// Subtree search. Attribute names in the returned entries are lowercased.
    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>, DirectoryError>;

    /// Create an entry.
    fn add(&mut self, dn: &str, attrs: &[AttributeValues]) -> Result<(), DirectoryError>;

    /// Replace each listed attribute's values; an empty list deletes it.
    fn modify(&mut self, dn: &str, changes: &[AttributeValues]) -> Result<(), DirectoryError>;

    /// Close the connection.
    fn unbind(&mut self) -> Result<(), DirectoryError>;
}

/// Opens transports for a configured server.
pub trait Connector: Send {
    fn open(&self, config: &LdapConfig) -> Result<Box<dyn Transport>, DirectoryError>;
}

// ---------------------------------------------------------------------------
// ldap3
// ---------------------------------------------------------------------------

/// Connector for real servers using `ldap3::LdapConn`.
///
/// `ldap3` always speaks protocol version 3 and never chases referrals, so
/// both are fixed properties of every connection it opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

impl Connector for LdapConnector {
    fn open(&self, config: &LdapConfig) -> Result<Box<dyn Transport>, DirectoryError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let settings = LdapConnSettings::new()
            .set_conn_timeout(timeout)
            .set_starttls(config.tls);

        debug!(server = %config.server, tls = config.tls, "opening LDAP connection");
        let conn = LdapConn::with_settings(settings, &config.server)
            .map_err(|e| classify_connect_error(config, e))?;

        Ok(Box::new(LdapTransport {
            conn,
            timeout,
            server: config.server.clone(),
        }))
    }
}

/// Only a failed TLS handshake, or the server refusing the StartTLS
/// extended operation, is a TLS error. Everything else raised while opening
/// (I/O, timeouts, bad URLs, a dropped stream) is a connection error.
fn classify_connect_error(config: &LdapConfig, err: LdapError) -> DirectoryError {
    let server = config.server.clone();
    let detail = err.to_string();
    match err {
        LdapError::NativeTLS { .. } => DirectoryError::Tls { server, detail },
        LdapError::LdapResult { .. } if config.tls => DirectoryError::Tls { server, detail },
        _ => DirectoryError::Connection { server, detail },
    }
}

struct LdapTransport {
    conn: LdapConn,
    timeout: Duration,
    server: String,
}

fn value_set(values: &[String]) -> HashSet<String> {
    values.iter().cloned().collect()
}

impl Transport for LdapTransport {
    fn simple_bind(&mut self, dn: &str, secret: &str) -> Result<bool, DirectoryError> {
        let result = self
            .conn
            .with_timeout(self.timeout)
            .simple_bind(dn, secret)
            .map_err(|e| DirectoryError::Connection {
                server: self.server.clone(),
                detail: e.to_string(),
            })?;

        if result.rc == 0 {
            Ok(true)
        } else {
            debug!(dn, rc = result.rc, text = %result.text, "bind rejected");
            Ok(false)
        }
    }

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        let search_error = |detail: String| DirectoryError::Search {
            base: base.to_string(),
            filter: filter.to_string(),
            detail,
        };

        let (entries, _) = self
            .conn
            .with_timeout(self.timeout)
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .map_err(|e| search_error(e.to_string()))?
            .success()
            .map_err(|e| search_error(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|e| {
                let entry = SearchEntry::construct(e);
                RawEntry::new(entry.dn, entry.attrs)
            })
            .collect())
    }

    fn add(&mut self, dn: &str, attrs: &[AttributeValues]) -> Result<(), DirectoryError> {
        let attrs: Vec<(String, HashSet<String>)> = attrs
            .iter()
            .map(|(name, values)| (name.clone(), value_set(values)))
            .collect();

        self.conn
            .with_timeout(self.timeout)
            .add(dn, attrs)
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| DirectoryError::Write {
                dn: dn.to_string(),
                detail: e.to_string(),
            })
    }

    fn modify(&mut self, dn: &str, changes: &[AttributeValues]) -> Result<(), DirectoryError> {
        let mods: Vec<Mod<String>> = changes
            .iter()
            .map(|(name, values)| Mod::Replace(name.clone(), value_set(values)))
            .collect();

        self.conn
            .with_timeout(self.timeout)
            .modify(dn, mods)
            .and_then(|r| r.success())
            .map(|_| ())
            .map_err(|e| DirectoryError::Write {
                dn: dn.to_string(),
                detail: e.to_string(),
            })
    }

    fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.conn.unbind().map_err(|e| {
            warn!(server = %self.server, error = %e, "unbind failed");
            DirectoryError::Connection {
                server: self.server.clone(),
                detail: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::LdapResult;

    fn config(server: &str, tls: bool) -> LdapConfig {
        let mut config = LdapConfig::new(
            server,
            "uid=USERNAME,ou=People,dc=test",
            "ou=People,dc=test",
            "ou=Groups,dc=test",
        );
        config.tls = tls;
        config
    }

    fn starttls_refused() -> LdapError {
        LdapError::LdapResult {
            result: LdapResult {
                rc: 2,
                matched: String::new(),
                text: "unsupported extended operation".into(),
                refs: Vec::new(),
                ctrls: Vec::new(),
            },
        }
    }

    #[test]
    fn test_connect_errors_are_connection_even_with_tls() {
        let config = config("ldap://ldap.test", true);
        let errors = [
            LdapError::Io {
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            },
            LdapError::UnknownScheme("foo".into()),
            LdapError::EndOfStream,
        ];
        for err in errors {
            let classified = classify_connect_error(&config, err);
            assert!(
                matches!(classified, DirectoryError::Connection { .. }),
                "{classified:?}"
            );
        }
    }

    #[test]
    fn test_refused_starttls_is_tls() {
        let classified = classify_connect_error(&config("ldap://ldap.test", true), starttls_refused());
        assert!(matches!(classified, DirectoryError::Tls { .. }));

        let classified = classify_connect_error(&config("ldap://ldap.test", false), starttls_refused());
        assert!(matches!(classified, DirectoryError::Connection { .. }));
    }

    #[test]
    fn test_open_rejects_bad_urls_as_connection_errors() {
        for server in ["foo://ldap.example.com", "not a url"] {
            let err = LdapConnector.open(&config(server, true)).err();
            match err {
                Some(DirectoryError::Connection { server: s, .. }) => assert_eq!(s, server),
                other => panic!("unexpected result for {server}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_value_set_collapses_duplicates() {
        let set = value_set(&["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("a") && set.contains("b"));
        assert!(value_set(&[]).is_empty());
    }
}
