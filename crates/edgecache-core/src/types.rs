//! Core types for the cache engine

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default freshness window: 24 hours.
pub const DEFAULT_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Default per-namespace entry cap.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Structural patterns for interceptable asset paths. Scripts and stylesheets
/// only; markup, images and API responses have different freshness rules and
/// are never cached here.
pub const STRUCTURAL_CACHEABLE_PATTERNS: &[&str] = &[r"\.js$", r"\.mjs$", r"\.css$"];

/// Active cache configuration for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Freshness window in seconds, evaluated against `stored_at`.
    pub max_age_secs: u64,
    /// Entry-count bound restored after every write.
    pub max_entries: usize,
    /// URL patterns eligible for caching.
    pub cacheable_patterns: Vec<String>,
    /// URL patterns never intercepted. Checked before cacheability.
    pub exclude_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            cacheable_patterns: STRUCTURAL_CACHEABLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Tenant-scoped default: the global default with any `{tenant}`
    /// placeholder in pattern strings substituted.
    pub fn default_for_tenant(tenant: &str) -> Self {
        let mut config = Self::default();
        config.substitute_tenant(tenant);
        config
    }

    /// Replace `{tenant}` placeholders in pattern strings.
    pub fn substitute_tenant(&mut self, tenant: &str) {
        for pattern in self
            .cacheable_patterns
            .iter_mut()
            .chain(self.exclude_patterns.iter_mut())
        {
            if pattern.contains("{tenant}") {
                *pattern = pattern.replace("{tenant}", tenant);
            }
        }
    }

    /// Overlay a partial update. `Some` fields override; vector fields
    /// replace wholesale, never append. Applying the same update twice is a
    /// no-op, so at-least-once delivery converges.
    pub fn merge(&mut self, update: &PolicyUpdate) {
        if let Some(max_age_secs) = update.max_age_secs {
            self.max_age_secs = max_age_secs;
        }
        if let Some(max_entries) = update.max_entries {
            self.max_entries = max_entries;
        }
        if let Some(cacheable) = &update.cacheable_patterns {
            self.cacheable_patterns = cacheable.clone();
        }
        if let Some(exclude) = &update.exclude_patterns {
            self.exclude_patterns = exclude.clone();
        }
    }
}

/// Partial policy update, delivered locally or over the config broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
}

/// One cached asset inside a namespace.
///
/// Entries are never updated in place: a new version is a new entry under a
/// new physical key, and the old entry is deleted separately.
#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub physical_key: String,
    pub content_type: String,
    pub stored_at: DateTime<Utc>,
    pub payload: Bytes,
}

impl StoredAsset {
    /// Entry age relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.stored_at
    }

    /// Whether the entry is within the freshness window at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        self.age(now).num_seconds() <= max_age_secs as i64
    }
}

/// Wire view of a cached entry, used by maintenance replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    pub key: String,
    pub logical_identity: String,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

/// Snapshot of one namespace, used by maintenance replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub namespace: String,
    pub entries: Vec<EntryInfo>,
    pub total_size: u64,
}
