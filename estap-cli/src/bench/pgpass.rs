//! libpq password file lookup
//!
//! Lines are `hostname:port:database:username:password`; `\:` and `\\`
//! escape, `#` starts a comment, `*` matches anything in the first four
//! fields. An exact entry always beats a wildcard entry, whatever the line
//! order.

use estap_core::PGPASSFILE;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::expand_path;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    fields: [String; 4],
    password: String,
}

impl Entry {
    fn matches(&self, wanted: &[&str; 4], allow_wildcard: bool) -> bool {
        self.fields
            .iter()
            .zip(wanted)
            .all(|(field, want)| field == want || (allow_wildcard && field == "*"))
    }
}

/// Location of the password file: `PGPASSFILE`, else `~/.pgpass`
pub fn default_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    match lookup(PGPASSFILE).filter(|v| !v.is_empty()) {
        Some(path) => Some(expand_path(Path::new(&path))),
        None => dirs::home_dir().map(|home| home.join(".pgpass")),
    }
}

/// Split one line on unescaped colons, unescaping as it goes
fn split_line(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            ':' => fields.push(String::new()),
            other => {
                let ch = if other == '\\' { chars.next() } else { Some(other) };
                if let (Some(ch), Some(field)) = (ch, fields.last_mut()) {
                    field.push(ch);
                }
            }
        }
    }
    fields
}

fn parse(content: &str) -> Vec<Entry> {
    content
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = split_line(line);
            if parts.len() < 5 {
                return None;
            }
            // A password may itself contain unescaped colons
            let password = parts.split_off(4).join(":");
            let fields: [String; 4] = parts.try_into().ok()?;
            Some(Entry { fields, password })
        })
        .collect()
}

/// Find the password for the connection in `content`
pub fn lookup_in(content: &str, host: &str, port: u16, database: &str, user: &str) -> Option<SecretString> {
    let port = port.to_string();
    let wanted = [host, port.as_str(), database, user];
    let entries = parse(content);

    [false, true].into_iter().find_map(|allow_wildcard| {
        entries
            .iter()
            .find(|entry| entry.matches(&wanted, allow_wildcard))
            .map(|entry| {
                debug!(wildcard = allow_wildcard, "pgpass entry matched");
                SecretString::from(entry.password.clone())
            })
    })
}

/// Read `path` and look the connection up. An unreadable file is no match.
pub fn lookup(path: &Path, host: &str, port: u16, database: &str, user: &str) -> Option<SecretString> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), "no usable password file: {e}");
            return None;
        }
    };
    lookup_in(&content, host, port, database, user)
}
