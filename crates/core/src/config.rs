//! TOML-based configuration for ldapauth.
//!
//! The service-account password is never stored in the file: the file names
//! an environment variable (`password_env`) and the secret is resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::directory::escape::escape;
use crate::directory::fields::{FieldMap, GroupField, LogicalField, UserField};
use crate::errors::ConfigError;

/// Token in [`LdapConfig::bind_dn`] replaced by the escaped username.
pub const USERNAME_PLACEHOLDER: &str = "USERNAME";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory server, trees, and attribute mappings.
    pub ldap: LdapConfig,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or `EnvFilter` directive (default `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// LDAP
// ---------------------------------------------------------------------------

/// Directory server and schema settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Server URL (e.g. `ldap://ldap.example.com`).
    pub server: String,

    /// Upgrade the connection with StartTLS before any bind.
    #[serde(default)]
    pub tls: bool,

    /// Deadline in seconds for connect and for each operation (default 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// DN template for user entries, containing [`USERNAME_PLACEHOLDER`]
    /// (e.g. `uid=USERNAME,ou=People,dc=example,dc=com`).
    pub bind_dn: String,

    /// Privileged account used for writes.
    #[serde(default)]
    pub service: ServiceAccountConfig,

    /// User subtree settings.
    pub users: UserTreeConfig,

    /// Group subtree settings.
    pub groups: GroupTreeConfig,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Privileged service account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAccountConfig {
    /// Full DN of the service account.
    #[serde(default)]
    pub bind_dn: Option<String>,

    /// Environment variable holding the service account password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

/// User subtree: search base, object class, creation defaults, and field map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTreeConfig {
    /// Search base for users.
    pub base_dn: String,

    /// Object class selecting user entries in searches.
    #[serde(default = "default_user_object_class")]
    pub object_class: String,

    /// Object classes written when creating a user.
    #[serde(default = "default_user_create_classes")]
    pub create_object_classes: Vec<String>,

    /// Id returned by `next_id` when no user has one yet.
    #[serde(default = "default_first_id")]
    pub first_id: u64,

    /// Primary group number given to new users.
    #[serde(default = "default_gid_number")]
    pub default_gid_number: u64,

    /// Parent of new users' home directories.
    #[serde(default = "default_home_base")]
    pub home_base: String,

    /// Login shell given to new users.
    #[serde(default = "default_login_shell")]
    pub login_shell: String,

    /// Logical → physical attribute mapping.
    #[serde(default)]
    pub fields: FieldMap<UserField>,
}

fn default_user_object_class() -> String {
    "posixAccount".into()
}
fn default_user_create_classes() -> Vec<String> {
    [
        "top",
        "person",
        "organizationalPerson",
        "inetOrgPerson",
        "posixAccount",
        "shadowAccount",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_first_id() -> u64 {
    1000
}
fn default_gid_number() -> u64 {
    100
}
fn default_home_base() -> String {
    "/home".into()
}
fn default_login_shell() -> String {
    "/bin/bash".into()
}

/// Group subtree: search base, object class, ignore list, and field map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTreeConfig {
    /// Search base for groups.
    pub base_dn: String,

    /// Object class selecting group entries in searches.
    #[serde(default = "default_group_object_class")]
    pub object_class: String,

    /// Object classes written when creating a group.
    #[serde(default = "default_group_create_classes")]
    pub create_object_classes: Vec<String>,

    /// Id returned by `next_id` when no group has one yet.
    #[serde(default = "default_first_id")]
    pub first_id: u64,

    /// Description given to new groups that have none.
    #[serde(default = "default_group_description")]
    pub default_description: String,

    /// Group unique ids that never enter the domain model.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Members of this group pass every membership check that allows it.
    #[serde(default)]
    pub superadmin: Option<String>,

    /// Logical → physical attribute mapping.
    #[serde(default)]
    pub fields: FieldMap<GroupField>,
}

fn default_group_object_class() -> String {
    "posixGroup".into()
}
fn default_group_create_classes() -> Vec<String> {
    vec!["posixGroup".into()]
}
fn default_group_description() -> String {
    "Group account".into()
}

impl LdapConfig {
    /// Config with default schema settings for the given server and trees.
    pub fn new(
        server: impl Into<String>,
        bind_dn: impl Into<String>,
        users_base_dn: impl Into<String>,
        groups_base_dn: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            tls: false,
            timeout_secs: default_timeout_secs(),
            bind_dn: bind_dn.into(),
            service: ServiceAccountConfig::default(),
            users: UserTreeConfig {
                base_dn: users_base_dn.into(),
                object_class: default_user_object_class(),
                create_object_classes: default_user_create_classes(),
                first_id: default_first_id(),
                default_gid_number: default_gid_number(),
                home_base: default_home_base(),
                login_shell: default_login_shell(),
                fields: FieldMap::default(),
            },
            groups: GroupTreeConfig {
                base_dn: groups_base_dn.into(),
                object_class: default_group_object_class(),
                create_object_classes: default_group_create_classes(),
                first_id: default_first_id(),
                default_description: default_group_description(),
                ignore: Vec::new(),
                superadmin: None,
                fields: FieldMap::default(),
            },
        }
    }

    /// DN for `username`: the bind template with the escaped name substituted.
    pub fn user_dn(&self, username: &str) -> String {
        self.bind_dn.replace(USERNAME_PLACEHOLDER, &escape(username))
    }

    /// DN for a group named `name` under the group base.
    pub fn group_dn(&self, unique_id_attr: &str, name: &str) -> String {
        format!("{}={},{}", unique_id_attr, escape(name), self.groups.base_dn)
    }

    /// Whether `unique_id` is on the group ignore list.
    pub fn is_ignored_group(&self, unique_id: &str) -> bool {
        self.groups.ignore.iter().any(|g| g == unique_id)
    }

    /// Validate the LDAP section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(invalid("ldap.server", "server URL must not be empty"));
        }
        if !self.bind_dn.contains(USERNAME_PLACEHOLDER) {
            return Err(invalid(
                "ldap.bind_dn",
                &format!("bind DN template must contain '{}'", USERNAME_PLACEHOLDER),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("ldap.timeout_secs", "timeout must be > 0"));
        }
        if self.users.base_dn.trim().is_empty() {
            return Err(invalid("ldap.users.base_dn", "user base DN must not be empty"));
        }
        if self.groups.base_dn.trim().is_empty() {
            return Err(invalid("ldap.groups.base_dn", "group base DN must not be empty"));
        }
        check_required(&self.users.fields, "ldap.users.fields")?;
        check_required(&self.groups.fields, "ldap.groups.fields")?;
        if self.service.bind_dn.is_some() && self.service.password_env.is_none() {
            return Err(invalid(
                "ldap.service.password_env",
                "a service bind DN needs a password environment variable",
            ));
        }
        Ok(())
    }
}

fn check_required<K: LogicalField>(map: &FieldMap<K>, field: &str) -> Result<(), ConfigError> {
    let missing = map.missing_required();
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
    Err(invalid(field, &format!("missing mapping for {}", names.join(", "))))
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; the session
    /// reports it when a privileged bind is actually needed.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref env_name) = self.ldap.service.password_env {
            self.ldap.service.password =
                resolve_optional_env(env_name, "ldap.service.password_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ldap.validate()
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[logging]
level = "debug"

[ldap]
server = "ldap://ldap.example.com"
tls = true
timeout_secs = 5
bind_dn = "uid=USERNAME,ou=People,dc=example,dc=com"

[ldap.service]
bind_dn = "cn=admin,dc=example,dc=com"
password_env = "LDAPAUTH_TEST_ADMIN_PW"

[ldap.users]
base_dn = "ou=People,dc=example,dc=com"
home_base = "/srv/home"

[ldap.users.fields]
unique_id = "uid"
id = "uidNumber"
username = "uid"
realname = "displayName"
email = "mail"

[ldap.groups]
base_dn = "ou=Groups,dc=example,dc=com"
ignore = ["admins-internal", "nogroup"]
superadmin = "wheel"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.logging.level, "debug");
        assert!(config.ldap.tls);
        assert_eq!(config.ldap.timeout_secs, 5);
        assert_eq!(config.ldap.users.home_base, "/srv/home");
        assert_eq!(
            config.ldap.users.fields.get(UserField::Realname),
            Some("displayName")
        );
        assert_eq!(config.ldap.groups.superadmin.as_deref(), Some("wheel"));
        assert!(config.ldap.is_ignored_group("nogroup"));
        assert!(!config.ldap.is_ignored_group("engineering"));
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[ldap]
server = "ldap://localhost"
bind_dn = "uid=USERNAME,ou=People,dc=test"
[ldap.users]
base_dn = "ou=People,dc=test"
[ldap.groups]
base_dn = "ou=Groups,dc=test"
"#;
        let config = AppConfig::from_toml(minimal).unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(!config.ldap.tls);
        assert_eq!(config.ldap.timeout_secs, 10);
        assert_eq!(config.ldap.users.object_class, "posixAccount");
        assert_eq!(config.ldap.users.first_id, 1000);
        assert_eq!(config.ldap.groups.object_class, "posixGroup");
        assert_eq!(config.ldap.groups.default_description, "Group account");
        assert_eq!(config.ldap.groups.fields.get(GroupField::Members), Some("memberUid"));
        assert!(config.ldap.groups.ignore.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ldapauth.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.ldap.server, "ldap://ldap.example.com");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/ldapauth.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_unknown_field_key_is_parse_error() {
        let bad = sample_toml().replace("email = \"mail\"", "shoe_size = \"mail\"");
        assert!(matches!(
            AppConfig::from_toml(&bad),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_template_without_placeholder() {
        let mut config = AppConfig::from_toml(sample_toml()).unwrap();
        config.ldap.bind_dn = "uid=admin,dc=example,dc=com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "ldap.bind_dn"
        ));
    }

    #[test]
    fn test_validate_rejects_missing_required_mapping() {
        let bad = sample_toml().replace("realname = \"displayName\"\n", "");
        let config = AppConfig::from_toml(&bad).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, ref detail }
                if field == "ldap.users.fields" && detail.contains("realname")
        ));
    }

    #[test]
    fn test_user_and_group_dn() {
        let config = AppConfig::from_toml(sample_toml()).unwrap();
        assert_eq!(
            config.ldap.user_dn("alice"),
            "uid=alice,ou=People,dc=example,dc=com"
        );
        assert_eq!(
            config.ldap.user_dn("a*)("),
            r"uid=a\2a\29\28,ou=People,dc=example,dc=com"
        );
        assert_eq!(
            config.ldap.group_dn("cn", "engineering"),
            "cn=engineering,ou=Groups,dc=example,dc=com"
        );
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("LDAPAUTH_TEST_ADMIN_PW", "s3cret");

        let mut config = AppConfig::from_toml(sample_toml()).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.ldap.service.password.as_deref(), Some("s3cret"));

        std::env::remove_var("LDAPAUTH_TEST_ADMIN_PW");
    }
}
