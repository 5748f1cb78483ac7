//! Multi-tenant cache policy and eviction engine for static assets
//!
//! Sits between a client-facing front end and a network origin, multiplexing
//! cache storage across tenants sharing one runtime instance. The engine
//! decides what to intercept, whether a cached entry is fresh, which old
//! versions a write supersedes, and what to evict when a namespace exceeds
//! its capacity — all on top of a storage substrate that only supports
//! namespace enumeration, get, put, delete and key listing.

pub mod classifier;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod namespace;
pub mod policy;
pub mod store;
pub mod types;

pub use classifier::PolicyMatchers;
pub use engine::{AssetRequest, CacheEngine, CacheOutcome, CachedResponse, OriginFetch, OriginResponse};
pub use error::{CacheError, Result};
pub use maintenance::{run_maintenance, ConfigBroadcast, MaintenanceCommand, MaintenanceReply};
pub use namespace::{namespace_name, reconcile, TenantResolver};
pub use policy::{PolicyStore, RuntimeContext};
pub use store::{AssetStore, MemoryStore, NamespaceHandle};
pub use types::{CacheInfo, EntryInfo, PolicyConfig, PolicyUpdate, StoredAsset};
