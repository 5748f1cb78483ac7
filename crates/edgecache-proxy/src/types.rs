//! Core types for the edgecache proxy

use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for the proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    /// Public origin requests are addressed to; the classifier's same-origin
    /// gate compares against this.
    pub serving_origin: Url,
    /// Where cache misses are fetched from.
    pub upstream_url: Url,
    /// Tenant override; defaults to a tenant derived from the serving host.
    pub tenant_id: Option<String>,
    pub max_age_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let serving_origin = Url::parse("http://127.0.0.1:3000").unwrap();
        Self {
            port: 3000,
            upstream_url: serving_origin.clone(),
            serving_origin,
            tenant_id: None,
            max_age_secs: None,
            max_entries: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub tenant_id: String,
    pub namespace: String,
    pub cache_entries: usize,
}

/// Body of POST /admin/cache/clear. Without a tenant the active one is
/// cleared.
#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
}
