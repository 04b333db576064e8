//! ldapauth command-line tool.
//!
//! Provides subcommands for checking credentials, inspecting and editing
//! directory users and groups, testing group membership, and generating /
//! validating configuration files.

mod groups;
mod style;
mod users;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ldapauth_core::config::AppConfig;
use ldapauth_core::directory::DirectorySession;
use ldapauth_core::identity::UserProvider;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// ldapauth command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "ldapauth",
    version,
    about = "Authenticate against and manage users and groups in an LDAP directory"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "/etc/ldapauth/config.toml")]
    config: PathBuf,

    /// Log filter (e.g. `debug`, `ldapauth_core=trace`). Overrides
    /// `[logging] level` from the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./ldapauth.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Check a user's password with a bind.
    Auth {
        /// Username to authenticate.
        username: String,

        /// Read the password from this environment variable instead of
        /// prompting.
        #[arg(long)]
        password_env: Option<String>,
    },

    /// Inspect and edit users.
    User {
        #[command(subcommand)]
        action: users::UserAction,
    },

    /// Inspect and edit groups.
    Group {
        #[command(subcommand)]
        action: groups::GroupAction,
    },

    /// Check whether a user belongs to a group. Exits non-zero if not.
    MemberCheck {
        /// Username.
        user: String,

        /// Group name.
        group: String,

        /// Do not let superadmin membership satisfy the check.
        #[arg(long)]
        strict: bool,
    },
}

/// Output options shared by subcommands.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| configured_log_level(&cli.config))
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::failure(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let out = Output { json: cli.json };
    let config_path = cli.config.as_path();
    match cli.command {
        Commands::Init { output } => cmd_init(&output).map(|_| ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(config_path).map(|_| ExitCode::SUCCESS),
        Commands::Auth {
            username,
            password_env,
        } => {
            let config = load_config(config_path)?;
            cmd_auth(&config, &username, password_env.as_deref())
        }
        Commands::User { action } => {
            let mut session = open_session(&load_config(config_path)?);
            users::run(&mut session, action, out).map(|_| ExitCode::SUCCESS)
        }
        Commands::Group { action } => {
            let mut session = open_session(&load_config(config_path)?);
            groups::run(&mut session, action, out).map(|_| ExitCode::SUCCESS)
        }
        Commands::MemberCheck {
            user,
            group,
            strict,
        } => {
            let config = load_config(config_path)?;
            cmd_member_check(&config, &user, &group, strict, out)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// `[logging] level` from the config file, if it can be read at all.
fn configured_log_level(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    AppConfig::from_toml(&contents).ok().map(|c| c.logging.level)
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_session(config: &AppConfig) -> DirectorySession {
    tracing::debug!(server = %config.ldap.server, "opening directory session");
    DirectorySession::new(config.ldap.clone())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# ldapauth configuration

[logging]
level = "info"

[ldap]
server = "ldap://ldap.example.com"
tls = true
timeout_secs = 10
# USERNAME is replaced by the (escaped) login name.
bind_dn = "uid=USERNAME,ou=People,dc=example,dc=com"

[ldap.service]
# Account used for creating and editing entries.
bind_dn = "cn=admin,dc=example,dc=com"
password_env = "LDAP_ADMIN_PASSWORD"

[ldap.users]
base_dn = "ou=People,dc=example,dc=com"
object_class = "posixAccount"
first_id = 1000
default_gid_number = 100
home_base = "/home"
login_shell = "/bin/bash"

[ldap.users.fields]
unique_id = "uid"
id = "uidNumber"
username = "uid"
realname = "cn"
email = "mail"

[ldap.groups]
base_dn = "ou=Groups,dc=example,dc=com"
object_class = "posixGroup"
ignore = []
# superadmin = "wheel"
default_description = "Group account"

[ldap.groups.fields]
unique_id = "cn"
id = "gidNumber"
name = "cn"
description = "description"
members = "memberUid"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the server, bind template, and base DNs");
    println!("  2. Export the service account password (LDAP_ADMIN_PASSWORD)");
    println!("  3. Validate with: ldapauth validate --config {}", output.display());
    println!("  4. Try a login:   ldapauth auth <username> --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let ldap = &config.ldap;
    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Server          : {}", ldap.server);
    println!("  StartTLS        : {}", if ldap.tls { "yes" } else { "no" });
    println!("  Timeout         : {}s", ldap.timeout_secs);
    println!("  Bind template   : {}", ldap.bind_dn);
    println!("  User base       : {}", ldap.users.base_dn);
    println!("  Group base      : {}", ldap.groups.base_dn);
    println!(
        "  Service account : {}",
        ldap.service.bind_dn.as_deref().unwrap_or("not configured")
    );
    if ldap.service.bind_dn.is_some() {
        println!(
            "  Service password: {}",
            if ldap.service.password.is_some() {
                "set"
            } else {
                "NOT SET"
            }
        );
    }
    println!(
        "  Ignored groups  : {}",
        if ldap.groups.ignore.is_empty() {
            "none".to_string()
        } else {
            ldap.groups.ignore.join(", ")
        }
    );
    println!(
        "  Superadmin group: {}",
        ldap.groups.superadmin.as_deref().unwrap_or("none")
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_auth(config: &AppConfig, username: &str, password_env: Option<&str>) -> Result<ExitCode> {
    let password = match password_env {
        Some(var) => std::env::var(var)
            .with_context(|| format!("environment variable {} is not set", var))?,
        None => dialoguer::Password::new()
            .with_prompt(format!("Password for {}", username))
            .interact()
            .context("failed to read password")?,
    };

    let mut provider = UserProvider::new(config.ldap.clone());
    if provider
        .validate(username, &password)
        .context("directory error during authentication")?
    {
        println!("{}", style::success(&format!("Authenticated as {}", username)));
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", style::failure("Invalid credentials"));
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_member_check(
    config: &AppConfig,
    username: &str,
    group: &str,
    strict: bool,
    out: Output,
) -> Result<ExitCode> {
    let mut provider = UserProvider::new(config.ldap.clone());
    let mut user = provider
        .load_by_identifier(username)
        .context("failed to look up user")?
        .ok_or_else(|| anyhow::anyhow!("user '{}' not found", username))?;

    let member = provider
        .is_member(&mut user, group, !strict)
        .context("failed to load group memberships")?;

    if out.json {
        println!(
            "{}",
            serde_json::json!({ "user": username, "group": group, "member": member })
        );
    } else if member {
        println!("{}", style::success(&format!("{} is a member of {}", username, group)));
    } else {
        println!("{}", style::failure(&format!("{} is not a member of {}", username, group)));
    }

    Ok(if member {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::from_toml(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.ldap.service.password_env.as_deref(),
            Some("LDAP_ADMIN_PASSWORD")
        );
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "ldapauth", "--json", "user", "set", "alice", "email", "a@example.com",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::User { .. }));

        let cli = Cli::try_parse_from(["ldapauth", "member-check", "alice", "staff", "--strict"]).unwrap();
        assert!(matches!(cli.command, Commands::MemberCheck { strict: true, .. }));
    }

    #[test]
    fn test_directory_commands_need_a_config_file() {
        for args in [
            &["ldapauth", "--config", "/nonexistent/ldapauth.toml", "user", "list"][..],
            &["ldapauth", "--config", "/nonexistent/ldapauth.toml", "member-check", "alice", "staff"][..],
        ] {
            let err = run(Cli::try_parse_from(args).unwrap()).unwrap_err();
            assert!(format!("{:#}", err).contains("failed to load configuration file"));
        }
    }

    #[test]
    fn test_configured_log_level_missing_file() {
        assert_eq!(configured_log_level(Path::new("/nonexistent/ldapauth.toml")), None);
    }
}
