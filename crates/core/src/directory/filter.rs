//! Search filter construction and evaluation.
//!
//! The builders here are how repositories produce filter strings; every value
//! goes through [`escape`]. With the `testing` feature, `Filter::parse` and
//! `Filter::matches` cover the RFC 4515 subset the builders emit (plus
//! presence, substring, and `!`) and back the in-process `MemoryDirectory`.

#[cfg(any(test, feature = "testing"))]
use super::entry::RawEntry;
use super::escape::escape;
#[cfg(any(test, feature = "testing"))]
use crate::errors::DirectoryError;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// `(attr=value)` with `value` escaped.
pub fn eq(attr: &str, value: &str) -> String {
    format!("({}={})", attr, escape(value))
}

/// `(objectClass=class)`.
pub fn object_class(class: &str) -> String {
    eq("objectClass", class)
}

/// `(&c1c2..)`.
pub fn and<I, S>(clauses: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    compound('&', clauses)
}

/// `(|c1c2..)`.
pub fn or<I, S>(clauses: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    compound('|', clauses)
}

fn compound<I, S>(op: char, clauses: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::from("(");
    out.push(op);
    for clause in clauses {
        out.push_str(clause.as_ref());
    }
    out.push(')');
    out
}

/// Restrict `base` by a caller-supplied filter, if any. Blank filters are
/// treated as absent.
pub fn restrict(base: &str, extra: Option<&str>) -> String {
    match extra.map(str::trim) {
        Some(extra) if !extra.is_empty() => and([base, extra]),
        _ => base.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Parsed filters
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "testing"))]
/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attr: String, value: String },
    Present { attr: String },
    /// `attr=a*b*c`; `parts` are the literal pieces between wildcards, with
    /// empty first/last pieces for leading/trailing `*`.
    Substring { attr: String, parts: Vec<String> },
}

#[cfg(any(test, feature = "testing"))]
impl Filter {
    /// Parse a filter string.
    pub fn parse(input: &str) -> Result<Self, DirectoryError> {
        let mut parser = Parser {
            src: input.trim().as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.src.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    /// Evaluate against an entry. Attribute names and values compare
    /// case-insensitively.
    pub fn matches(&self, entry: &RawEntry) -> bool {
        match self {
            Self::And(items) => items.iter().all(|f| f.matches(entry)),
            Self::Or(items) => items.iter().any(|f| f.matches(entry)),
            Self::Not(inner) => !inner.matches(entry),
            // Every entry carries an object class.
            Self::Present { attr } => entry.has(attr) || attr.eq_ignore_ascii_case("objectclass"),
            Self::Equal { attr, value } => {
                let value = value.to_lowercase();
                entry
                    .values(attr)
                    .is_some_and(|vals| vals.iter().any(|v| v.to_lowercase() == value))
            }
            Self::Substring { attr, parts } => entry
                .values(attr)
                .is_some_and(|vals| vals.iter().any(|v| substring_match(&v.to_lowercase(), parts))),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
fn substring_match(value: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return true;
    };
    let first = first.to_lowercase();
    if !value.starts_with(&first) {
        return false;
    }
    let mut remaining = &value[first.len()..];
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        let part = part.to_lowercase();
        match remaining.find(&part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(&last.to_lowercase())
}

#[cfg(any(test, feature = "testing"))]
struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

#[cfg(any(test, feature = "testing"))]
impl Parser<'_> {
    fn error(&self, detail: &str) -> DirectoryError {
        DirectoryError::Validation(format!(
            "malformed filter '{}' at offset {}: {}",
            String::from_utf8_lossy(self.src),
            self.pos,
            detail
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn expect(&mut self, b: u8) -> Result<(), DirectoryError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn filter(&mut self) -> Result<Filter, DirectoryError> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, DirectoryError> {
        let mut items = Vec::new();
        while self.peek() == Some(b'(') {
            items.push(self.filter()?);
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter, DirectoryError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'=' || b == b'(' || b == b')' {
                break;
            }
            self.pos += 1;
        }
        let attr = String::from_utf8_lossy(&self.src[start..self.pos]).to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        if matches!(attr.chars().last(), Some('<' | '>' | '~')) {
            return Err(self.error("ordering and approximate matches are not supported"));
        }
        self.expect(b'=')?;

        // Raw value bytes split on unescaped `*`.
        let mut parts: Vec<Vec<u8>> = vec![Vec::new()];
        while let Some(b) = self.peek() {
            match b {
                b')' => break,
                b'(' => return Err(self.error("unescaped '(' in value")),
                b'*' => {
                    parts.push(Vec::new());
                    self.pos += 1;
                }
                b'\\' => {
                    let hex = self
                        .src
                        .get(self.pos + 1..self.pos + 3)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.error("invalid escape"))?;
                    if let Some(last) = parts.last_mut() {
                        last.push(hex);
                    }
                    self.pos += 3;
                }
                _ => {
                    if let Some(last) = parts.last_mut() {
                        last.push(b);
                    }
                    self.pos += 1;
                }
            }
        }

        let parts: Vec<String> = parts
            .into_iter()
            .map(|p| String::from_utf8_lossy(&p).into_owned())
            .collect();
        Ok(match parts.as_slice() {
            [value] => Filter::Equal {
                attr,
                value: value.clone(),
            },
            [a, b] if a.is_empty() && b.is_empty() => Filter::Present { attr },
            _ => Filter::Substring { attr, parts },
        })
    }
}
