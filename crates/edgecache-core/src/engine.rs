//! Cache-first fetch orchestration and eviction
//!
//! The read/write path per request: lookup, freshness check, network
//! fallback, store, then cleanup. Two eviction policies run around every
//! successful write — same-identity supersession before the write and
//! capacity-bounded oldest-first trimming after it — plus an on-demand full
//! sweep that collapses every logical identity to a single survivor.
//!
//! Storage I/O is best effort on the request path: a substrate failure
//! degrades the request to network-only and is never surfaced to the caller.

use crate::classifier;
use crate::error::Result;
use crate::namespace::{namespace_name, reconcile, TenantResolver};
use crate::policy::{PolicyStore, RuntimeContext};
use crate::store::{AssetStore, NamespaceHandle};
use crate::types::{CacheInfo, EntryInfo, PolicyUpdate, StoredAsset};
use asset_identity::logical_identity;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// An inbound request as seen by the engine.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: String,
    pub url: String,
}

impl AssetRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }
}

/// A response produced by the network collaborator.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: u16,
    /// The collaborator's status contract; gates storage.
    pub ok: bool,
    pub content_type: String,
    pub body: Bytes,
}

/// Network fetch collaborator.
#[async_trait]
pub trait OriginFetch: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<OriginResponse>;
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from cache within the freshness window.
    Fresh,
    /// Fetched from the origin (cache miss or stale entry refreshed).
    Network,
    /// Origin failed; an expired cached entry was served instead.
    Stale,
}

/// Payload handed back to the caller. Independent of the stored copy: both
/// sides are fully readable.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// HTTP status to answer with. Cached entries are always 200: only ok
    /// responses are ever stored. Network responses keep the upstream
    /// status, including failures.
    pub status: u16,
    pub payload: Bytes,
    pub content_type: String,
    pub outcome: CacheOutcome,
}

struct EngineState {
    policies: PolicyStore,
    ctx: RuntimeContext,
}

/// The cache policy and eviction engine for one runtime instance.
pub struct CacheEngine<S: AssetStore> {
    store: S,
    state: RwLock<EngineState>,
}

impl<S: AssetStore> CacheEngine<S> {
    /// Engine for a known tenant. Does not touch storage.
    pub fn new(store: S, tenant: &str) -> Self {
        let policies = PolicyStore::new();
        let ctx = RuntimeContext::new(tenant, &policies);
        Self {
            store,
            state: RwLock::new(EngineState { policies, ctx }),
        }
    }

    /// Resolve the current tenant and reconcile namespaces: the activation
    /// path, run whenever this instance takes over request handling.
    pub async fn activate(store: S, resolver: &dyn TenantResolver) -> Result<Self> {
        let tenant = resolver.resolve_tenant().await?;
        let survivors = reconcile(&store, &tenant).await?;
        info!(tenant = %tenant, surviving_namespaces = survivors.len(), "Engine activated");
        Ok(Self::new(store, &tenant))
    }

    /// Snapshot of the active runtime context.
    pub async fn context(&self) -> RuntimeContext {
        self.state.read().await.ctx.clone()
    }

    /// Whether a request should be intercepted under the active policy.
    pub async fn is_interceptable(&self, request: &AssetRequest, serving_origin: &Url) -> bool {
        let ctx = self.context().await;
        classifier::is_interceptable(&request.method, &request.url, serving_origin, &ctx.matchers)
    }

    /// Apply a config update, switching tenants first when the update names
    /// a different one. Safe under at-least-once, unordered delivery.
    pub async fn apply_config(&self, tenant_override: Option<&str>, update: &PolicyUpdate) -> bool {
        let mut state = self.state.write().await;
        let EngineState { policies, ctx } = &mut *state;
        ctx.apply_policy_merge(policies, update, tenant_override)
    }

    /// The cache-first protocol: serve fresh hits from storage, refresh
    /// stale or missing entries from the origin, and fall back to a stale
    /// entry when the origin fails.
    pub async fn fetch_cached(
        &self,
        fetcher: &dyn OriginFetch,
        request: &AssetRequest,
    ) -> Result<CachedResponse> {
        let ctx = self.context().await;
        let now = Utc::now();

        let handle = match self.store.open(&ctx.namespace).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(namespace = %ctx.namespace, error = %e, "Cache unavailable, going network-only");
                None
            }
        };

        let cached = match &handle {
            Some(handle) => match handle.get(&request.url).await {
                Ok(cached) => cached,
                Err(e) => {
                    warn!(key = %request.url, error = %e, "Cache lookup failed");
                    None
                }
            },
            None => None,
        };

        if let Some(entry) = &cached {
            if entry.is_fresh(now, ctx.policy.max_age_secs) {
                debug!(key = %request.url, "Cache hit");
                return Ok(CachedResponse {
                    status: 200,
                    payload: entry.payload.clone(),
                    content_type: entry.content_type.clone(),
                    outcome: CacheOutcome::Fresh,
                });
            }
            debug!(key = %request.url, "Cache entry stale, refreshing");
        }

        match fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok {
                    if let Some(handle) = &handle {
                        self.store_response(handle, request, &response, now, ctx.policy.max_entries)
                            .await;
                    }
                } else {
                    debug!(key = %request.url, status = response.status, "Origin response not ok, not cached");
                }
                Ok(CachedResponse {
                    status: response.status,
                    payload: response.body,
                    content_type: response.content_type,
                    outcome: CacheOutcome::Network,
                })
            }
            Err(e) => {
                if let Some(entry) = cached {
                    // Availability over freshness: an expired entry beats an
                    // error for static assets.
                    warn!(key = %request.url, error = %e, "Origin failed, serving stale entry");
                    return Ok(CachedResponse {
                        status: 200,
                        payload: entry.payload,
                        content_type: entry.content_type,
                        outcome: CacheOutcome::Stale,
                    });
                }
                Err(e)
            }
        }
    }

    /// Supersede old versions, write the new entry, restore the capacity
    /// bound. All best effort: failures are logged and the request proceeds.
    async fn store_response(
        &self,
        handle: &S::Handle,
        request: &AssetRequest,
        response: &OriginResponse,
        now: DateTime<Utc>,
        max_entries: usize,
    ) {
        if let Err(e) = supersede(handle, &request.url, now).await {
            warn!(key = %request.url, error = %e, "Supersession failed");
        }

        let entry = StoredAsset {
            physical_key: request.url.clone(),
            content_type: response.content_type.clone(),
            stored_at: now,
            payload: response.body.clone(),
        };
        if let Err(e) = handle.put(&request.url, entry).await {
            warn!(key = %request.url, error = %e, "Cache write failed");
            return;
        }

        if let Err(e) = enforce_capacity(handle, max_entries).await {
            warn!(key = %request.url, error = %e, "Capacity trim failed");
        }
    }

    /// Entry count of the active namespace.
    pub async fn cache_size(&self) -> Result<usize> {
        let ctx = self.context().await;
        let handle = self.store.open(&ctx.namespace).await?;
        Ok(handle.list_keys().await?.len())
    }

    /// Snapshot of the active namespace's entries.
    pub async fn cache_info(&self) -> Result<CacheInfo> {
        let ctx = self.context().await;
        let handle = self.store.open(&ctx.namespace).await?;

        let mut entries = Vec::new();
        let mut total_size = 0u64;
        for key in handle.list_keys().await? {
            if let Some(entry) = handle.get(&key).await? {
                let size = entry.payload.len() as u64;
                total_size += size;
                entries.push(EntryInfo {
                    logical_identity: logical_identity(&key),
                    key,
                    stored_at: entry.stored_at,
                    size,
                });
            }
        }

        Ok(CacheInfo {
            namespace: ctx.namespace,
            entries,
            total_size,
        })
    }

    /// Destroy a tenant's namespace. Returns whether it existed.
    pub async fn clear(&self, tenant_id: &str) -> Result<bool> {
        let name = namespace_name(tenant_id);
        let existed = self.store.delete_namespace(&name).await?;
        info!(namespace = %name, existed, "Cache cleared");
        Ok(existed)
    }

    /// Full sweep: collapse every logical-identity group to one survivor,
    /// the entry with the newest `stored_at` (ties go to the
    /// lexicographically greatest key). Returns the number of deletions.
    pub async fn sweep_old_versions(&self) -> Result<usize> {
        let ctx = self.context().await;
        let handle = self.store.open(&ctx.namespace).await?;

        let mut groups: HashMap<String, Vec<(DateTime<Utc>, String)>> = HashMap::new();
        for key in handle.list_keys().await? {
            if let Some(entry) = handle.get(&key).await? {
                groups
                    .entry(logical_identity(&key))
                    .or_default()
                    .push((entry.stored_at, key));
            }
        }

        let mut deleted = 0;
        for (identity, mut versions) in groups {
            if versions.len() < 2 {
                continue;
            }
            versions.sort();
            let survivor = versions.pop();
            for (_, key) in versions {
                if handle.delete(&key).await? {
                    deleted += 1;
                }
            }
            if let Some((_, kept)) = survivor {
                debug!(identity = %identity, kept = %kept, "Swept old versions");
            }
        }

        if deleted > 0 {
            info!(deleted, "Full sweep complete");
        }
        Ok(deleted)
    }
}

/// Delete every entry sharing the incoming key's logical identity under a
/// different physical key. Runs before the new entry is written, so a crash
/// mid-cleanup can momentarily leave both versions but never zero.
///
/// Last writer by timestamp wins: an existing entry newer than the incoming
/// write is left alone and will supersede the incoming key on its own next
/// write.
async fn supersede<H: NamespaceHandle>(
    handle: &H,
    incoming_key: &str,
    incoming_at: DateTime<Utc>,
) -> Result<usize> {
    let identity = logical_identity(incoming_key);
    let mut deleted = 0;

    for key in handle.list_keys().await? {
        if key == incoming_key || logical_identity(&key) != identity {
            continue;
        }
        if let Some(existing) = handle.get(&key).await? {
            if existing.stored_at > incoming_at {
                continue;
            }
        }
        if handle.delete(&key).await? {
            info!(old = %key, new = %incoming_key, "Superseded old version");
            deleted += 1;
        }
    }

    Ok(deleted)
}

/// Restore the entry-count bound by deleting the oldest entries (by
/// `stored_at`, ties broken by key order). Runs after every write, never
/// after delete-only operations.
async fn enforce_capacity<H: NamespaceHandle>(handle: &H, max_entries: usize) -> Result<usize> {
    let keys = handle.list_keys().await?;
    if keys.len() <= max_entries {
        return Ok(0);
    }

    let mut entries: Vec<(DateTime<Utc>, String)> = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(entry) = handle.get(&key).await? {
            entries.push((entry.stored_at, key));
        }
    }
    entries.sort();

    let excess = entries.len().saturating_sub(max_entries);
    let mut deleted = 0;
    for (_, key) in entries.into_iter().take(excess) {
        if handle.delete(&key).await? {
            debug!(key = %key, "Evicted for capacity");
            deleted += 1;
        }
    }

    Ok(deleted)
}
