//! Terminal styling for command output.

use console::Style;

/// Green check mark followed by `msg`.
pub fn success(msg: &str) -> String {
    format!("{} {}", Style::new().green().apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn failure(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}

/// Yellow marker for non-fatal findings.
pub fn notice(msg: &str) -> String {
    format!("{} {}", Style::new().yellow().apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Placeholder for an absent value.
pub fn missing() -> String {
    dim("—")
}
