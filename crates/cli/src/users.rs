//! `ldapauth user ...` subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use ldapauth_core::directory::{DirectorySession, LogicalField, UserField};
use ldapauth_core::identity::User;

use crate::style;
use crate::Output;

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Show one user and their groups.
    Show {
        /// Username.
        username: String,
    },
    /// List users, sorted by real name.
    List {
        /// Extra search filter, e.g. `(mail=*@example.com)`.
        #[arg(short, long)]
        filter: Option<String>,

        /// Also load each user's groups.
        #[arg(short, long)]
        groups: bool,
    },
    /// Create a user with the next free id.
    Create {
        /// Username.
        username: String,

        /// Real name (defaults to the username).
        #[arg(long)]
        realname: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },
    /// Change or clear one field of an existing user.
    Set {
        /// Username.
        username: String,

        /// Field name: realname, email, id, ...
        field: String,

        /// New value. Omit together with --clear to delete the attribute.
        value: Option<String>,

        #[arg(long, conflicts_with = "value")]
        clear: bool,
    },
}

pub fn run(session: &mut DirectorySession, action: UserAction, out: Output) -> Result<()> {
    match action {
        UserAction::Show { username } => show(session, &username, out),
        UserAction::List { filter, groups } => list(session, filter.as_deref(), groups, out),
        UserAction::Create {
            username,
            realname,
            email,
        } => create(session, &username, realname, email),
        UserAction::Set {
            username,
            field,
            value,
            clear,
        } => set(session, &username, &field, value, clear),
    }
}

fn find(session: &mut DirectorySession, username: &str) -> Result<User> {
    session
        .users()
        .find_by_username(username)
        .context("user lookup failed")?
        .ok_or_else(|| anyhow::anyhow!("user '{}' not found", username))
}

fn show(session: &mut DirectorySession, username: &str, out: Output) -> Result<()> {
    let mut user = find(session, username)?;
    user.groups(session, false)
        .context("failed to load group memberships")?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    println!();
    println!("{}", style::header(&format!("User {}", username)));
    println!();
    for field in UserField::ALL {
        println!(
            "  {:<10} {}",
            field.as_str(),
            user.get(*field).map_or_else(style::missing, String::from)
        );
    }
    let groups: Vec<&str> = user
        .cached_groups()
        .unwrap_or_default()
        .iter()
        .filter_map(|g| g.name())
        .collect();
    println!(
        "  {:<10} {}",
        "groups",
        if groups.is_empty() {
            style::missing()
        } else {
            groups.join(", ")
        }
    );
    println!();
    Ok(())
}

fn list(session: &mut DirectorySession, filter: Option<&str>, with_groups: bool, out: Output) -> Result<()> {
    let mut users = session
        .users()
        .search(filter, &[])
        .context("user search failed")?;
    if with_groups {
        session
            .users()
            .fetch_groups(&mut users)
            .context("failed to load group memberships")?;
    }

    if out.json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }
    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec!["Username", "Real name", "Email", "ID"];
    if with_groups {
        header.push("Groups");
    }
    table.set_header(header);

    for user in &users {
        let mut row = vec![
            Cell::new(user.username().unwrap_or("—")),
            Cell::new(user.realname().unwrap_or("—")),
            Cell::new(user.email().unwrap_or("—")),
            Cell::new(user.id().unwrap_or("—")),
        ];
        if with_groups {
            let names: Vec<&str> = user
                .cached_groups()
                .unwrap_or_default()
                .iter()
                .filter_map(|g| g.name())
                .collect();
            row.push(Cell::new(names.join(", ")));
        }
        table.add_row(row);
    }

    println!("{}", table);
    println!("{} user(s)", users.len());
    Ok(())
}

fn create(
    session: &mut DirectorySession,
    username: &str,
    realname: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let mut user = User::new();
    user.set(UserField::Username, username);
    if let Some(realname) = realname {
        user.set(UserField::Realname, realname);
    }
    if let Some(email) = email {
        user.set(UserField::Email, email);
    }

    user.store(session)
        .with_context(|| format!("failed to create user '{}'", username))?;

    println!(
        "{}",
        style::success(&format!(
            "Created user {} (id {})",
            username,
            user.id().unwrap_or("?")
        ))
    );
    Ok(())
}

fn set(
    session: &mut DirectorySession,
    username: &str,
    field: &str,
    value: Option<String>,
    clear: bool,
) -> Result<()> {
    let field: UserField = field.parse()?;
    let mut user = find(session, username)?;

    match (value, clear) {
        (Some(value), _) => user.set(field, value),
        (None, true) => user.clear(field),
        (None, false) => anyhow::bail!("give a value or --clear"),
    }

    user.apply_changes(session)
        .with_context(|| format!("failed to update user '{}'", username))?;
    println!("{}", style::success(&format!("Updated {} of {}", field, username)));
    Ok(())
}
