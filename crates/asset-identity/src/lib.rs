//! Version-agnostic identities for content-hashed asset filenames
//!
//! Build pipelines fingerprint static assets by embedding a content hash in
//! the filename (`app.ab12cd.js`, `vendor-deadbeef.css`). Two physical keys
//! that differ only in their hash segment are successive versions of the same
//! logical resource; this crate strips the hash so callers can compare them.

use regex::Regex;
use std::sync::LazyLock;

/// Matches `base` + (`.` or `-`) + 6-or-more hex chars + `.ext`.
static HASHED_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)[.-]([a-f0-9]{6,})(\.[^.]+)$").unwrap());

/// Derive the logical identity of a physical asset key.
///
/// Takes the final path segment of `physical_key` and strips a content-hash
/// segment if one is present, returning `base.ext`. Keys without a
/// recognizable hash segment are their own identity.
///
/// ```
/// assert_eq!(asset_identity::logical_identity("/assets/app.ab12cd.js"), "app.js");
/// assert_eq!(asset_identity::logical_identity("styles/main.css"), "main.css");
/// ```
pub fn logical_identity(physical_key: &str) -> String {
    let filename = filename_of(physical_key);
    match HASHED_NAME_RE.captures(filename) {
        Some(caps) => format!("{}{}", &caps[1], &caps[3]),
        None => filename.to_string(),
    }
}

/// Whether the key's filename carries a content-hash segment.
pub fn has_version_suffix(physical_key: &str) -> bool {
    HASHED_NAME_RE.is_match(filename_of(physical_key))
}

fn filename_of(physical_key: &str) -> &str {
    // Query strings and fragments are not part of the filename.
    let path = physical_key
        .split(['?', '#'])
        .next()
        .unwrap_or(physical_key);
    path.rsplit('/').next().unwrap_or(path)
}
