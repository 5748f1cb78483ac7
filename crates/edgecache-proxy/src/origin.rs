//! Upstream origin fetching and tenant resolution

use async_trait::async_trait;
use edgecache_core::{AssetRequest, CacheError, OriginFetch, OriginResponse, TenantResolver};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

/// HTTP client fetching assets from the upstream origin.
pub struct OriginFetcher {
    client: Client,
    upstream: Url,
}

impl OriginFetcher {
    pub fn new(upstream: Url) -> Self {
        Self {
            client: Client::new(),
            upstream,
        }
    }

    /// Map a request URL onto the upstream origin, keeping path and query.
    fn rewrite(&self, url: &str) -> Result<Url, CacheError> {
        let parsed =
            Url::parse(url).map_err(|e| CacheError::Origin(format!("bad request URL: {}", e)))?;
        let mut target = self.upstream.clone();
        target.set_path(parsed.path());
        target.set_query(parsed.query());
        Ok(target)
    }
}

#[async_trait]
impl OriginFetch for OriginFetcher {
    async fn fetch(&self, request: &AssetRequest) -> edgecache_core::Result<OriginResponse> {
        let target = self.rewrite(&request.url)?;
        debug!(url = %target, "Fetching from upstream");

        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| CacheError::Origin(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %target, "Upstream returned non-success status");
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::Origin(e.to_string()))?;

        Ok(OriginResponse {
            status: status.as_u16(),
            ok: status.is_success(),
            content_type,
            body,
        })
    }
}

/// Tenant resolver bound at startup from configuration.
pub struct FixedTenantResolver {
    tenant: String,
}

impl FixedTenantResolver {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
        }
    }
}

#[async_trait]
impl TenantResolver for FixedTenantResolver {
    async fn resolve_tenant(&self) -> edgecache_core::Result<String> {
        Ok(self.tenant.clone())
    }
}

/// Derive a tenant identifier from a serving origin's host.
pub fn tenant_from_origin(origin: &Url) -> String {
    origin
        .host_str()
        .unwrap_or("default")
        .replace('.', "-")
        .to_lowercase()
}
