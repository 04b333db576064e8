//! `ldapauth group ...` subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use ldapauth_core::directory::{DirectorySession, GroupField};
use ldapauth_core::identity::{Group, User};

use crate::style;
use crate::Output;

#[derive(Subcommand, Debug)]
pub enum GroupAction {
    /// Show one group and its members.
    Show {
        /// Group name.
        name: String,
    },
    /// List groups, sorted by name.
    List {
        /// Extra search filter, e.g. `(memberUid=alice)`.
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Create a group with the next free id.
    Create {
        /// Group name.
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Member username; repeat for several.
        #[arg(short, long = "member")]
        members: Vec<String>,
    },
}

pub fn run(session: &mut DirectorySession, action: GroupAction, out: Output) -> Result<()> {
    match action {
        GroupAction::Show { name } => show(session, &name, out),
        GroupAction::List { filter } => list(session, filter.as_deref(), out),
        GroupAction::Create {
            name,
            description,
            members,
        } => create(session, &name, description, members),
    }
}

fn show(session: &mut DirectorySession, name: &str, out: Output) -> Result<()> {
    let mut group = session
        .groups()
        .find_by_name(name)
        .context("group lookup failed")?
        .ok_or_else(|| anyhow::anyhow!("group '{}' not found", name))?;
    group
        .member_objects(session)
        .context("failed to resolve members")?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&group)?);
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Group {} (id {})", name, group.id().unwrap_or("?")))
    );
    if let Some(description) = group.description() {
        println!("{}", style::dim(description));
    }
    println!();

    let resolved = group.cached_member_objects().unwrap_or_default();
    if resolved.is_empty() {
        println!("No members.");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Username", "Real name", "Email"]);
        for user in resolved {
            table.add_row(vec![
                Cell::new(user.username().unwrap_or("—")),
                Cell::new(user.realname().unwrap_or("—")),
                Cell::new(user.email().unwrap_or("—")),
            ]);
        }
        println!("{}", table);
    }

    let unresolved: Vec<&str> = group
        .members()
        .unwrap_or_default()
        .iter()
        .filter(|id| !resolved.iter().any(|u| u.username() == Some(id.as_str())))
        .map(String::as_str)
        .collect();
    if !unresolved.is_empty() {
        println!(
            "{}",
            style::notice(&format!("No user entry for: {}", unresolved.join(", ")))
        );
    }
    println!();
    Ok(())
}

fn list(session: &mut DirectorySession, filter: Option<&str>, out: Output) -> Result<()> {
    let groups = session
        .groups()
        .search(filter, true)
        .context("group search failed")?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }
    if groups.is_empty() {
        println!("No groups found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "ID", "Description", "Members"]);
    for group in &groups {
        table.add_row(vec![
            Cell::new(group.name().unwrap_or("—")),
            Cell::new(group.id().unwrap_or("—")),
            Cell::new(group.description().unwrap_or("")),
            Cell::new(group.members().map_or(0, <[String]>::len)),
        ]);
    }

    println!("{}", table);
    println!("{} group(s)", groups.len());
    Ok(())
}

fn create(
    session: &mut DirectorySession,
    name: &str,
    description: Option<String>,
    members: Vec<String>,
) -> Result<()> {
    if !members.is_empty() {
        let found = session
            .users()
            .find_by_usernames(&members)
            .context("member lookup failed")?;
        let missing: Vec<&str> = members
            .iter()
            .filter(|m| !found.iter().any(|u: &User| u.username() == Some(m.as_str())))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            println!(
                "{}",
                style::notice(&format!("No user entry for: {}", missing.join(", ")))
            );
        }
    }

    let mut group = Group::new();
    group.set(GroupField::Name, name);
    if let Some(description) = description {
        group.set(GroupField::Description, description);
    }
    if !members.is_empty() {
        group.set_members(members);
    }

    group
        .store(session)
        .with_context(|| format!("failed to create group '{}'", name))?;

    println!(
        "{}",
        style::success(&format!(
            "Created group {} (id {})",
            name,
            group.id().unwrap_or("?")
        ))
    );
    Ok(())
}
