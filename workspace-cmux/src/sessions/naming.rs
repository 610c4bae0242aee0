// Session id and artifact file naming

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Maximum length of the label slug appended to a session id
const SLUG_MAX_CHARS: usize = 48;

/// Timestamp component of session ids
pub fn session_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Lowercase ASCII alphanumerics; every other run collapses to a single `-`
pub fn slugify(label: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;

    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
            if slug.len() >= SLUG_MAX_CHARS {
                break;
            }
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// `<timestamp>[-<slug>]`, suffixed `-2`, `-3`, ... until unique among `existing`
pub fn session_id(at: DateTime<Utc>, label: Option<&str>, existing: &HashSet<&str>) -> String {
    let timestamp = session_timestamp(at);
    let base = match label.map(slugify).filter(|s| !s.is_empty()) {
        Some(slug) => format!("{timestamp}-{slug}"),
        None => timestamp,
    };

    if !existing.contains(base.as_str()) {
        return base;
    }

    (2u32..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !existing.contains(candidate.as_str()))
        .unwrap_or_else(|| base.clone())
}

/// Make a runtime id/ref safe to embed in a file name
pub fn sanitize_file_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.').to_string();
    if sanitized.is_empty() {
        "surface".to_string()
    } else {
        sanitized
    }
}

/// Sanitised file key not yet in `used`; repeats get `-2`, `-3`, ...
pub fn unique_file_component(value: &str, used: &mut HashSet<String>) -> String {
    let base = sanitize_file_component(value);
    let key = if used.contains(&base) {
        (2u32..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !used.contains(candidate))
            .unwrap_or_else(|| base.clone())
    } else {
        base
    };
    used.insert(key.clone());
    key
}
