//! Connection details scraped from the viewer dashboard
//!
//! The dashboard renders each field as
//! `<dt>Label</dt><dd><code>value</code></dd>`. Matching is against that exact
//! markup; the viewer template lives in this workspace.

use estap_core::PgSettings;
use estap_core::pg::parse_port;
use regex::Regex;
use snafu::ResultExt;
use tracing::{debug, warn};

use super::{BenchError, FetchSnafu};

/// Value of the `<dd><code>` following `<dt>{label}</dt>`, entities decoded
pub fn field(html: &str, label: &str) -> Option<String> {
    let pattern = format!(
        r"<dt>\s*{}\s*</dt>\s*<dd>\s*<code>(.*?)</code>\s*</dd>",
        regex::escape(label)
    );
    let re = Regex::new(&pattern).ok()?;
    let raw = re.captures(html)?.get(1)?.as_str();
    let value = decode_entities(raw.trim());
    (!value.is_empty()).then_some(value)
}

/// Host, port, user and database from a rendered dashboard page
pub fn parse_page(html: &str) -> PgSettings {
    let port = field(html, "Port").and_then(|raw| match parse_port(&raw) {
        Ok(port) => Some(port),
        Err(e) => {
            warn!("ignoring scraped port: {e}");
            None
        }
    });

    PgSettings {
        host: field(html, "Host"),
        port,
        user: field(html, "User"),
        database: field(html, "Database"),
        password: None,
    }
}

/// Fetch `url` and scrape it
pub async fn fetch(url: &str) -> Result<PgSettings, BenchError> {
    debug!(url, "scraping viewer page");
    let body = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .context(FetchSnafu { url })?
        .text()
        .await
        .context(FetchSnafu { url })?;
    Ok(parse_page(&body))
}

/// Undo HTML escaping: the five named entities plus numeric references
fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            }?;
            Some((ch, end))
        });

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
