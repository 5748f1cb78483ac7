//! Tenant namespace naming and reconciliation

use crate::error::Result;
use crate::store::AssetStore;
use async_trait::async_trait;
use tracing::{debug, info};

/// Resource class served by this engine. The model generalizes to other
/// classes, but only static assets are cached today.
pub const RESOURCE_CLASS: &str = "static";

/// Namespace schema version.
pub const NAMESPACE_VERSION: &str = "v1";

/// Storage namespace for a tenant's static assets.
///
/// The shape `{tenant}-static-v1` is an interop requirement: deployed state
/// was written under these names and must remain reachable.
pub fn namespace_name(tenant: &str) -> String {
    format!("{}-{}-{}", tenant, RESOURCE_CLASS, NAMESPACE_VERSION)
}

/// Resolves the current tenant identifier from the serving context.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve_tenant(&self) -> Result<String>;
}

/// Destroy every namespace that does not belong to `active_tenant`; return
/// the survivors.
///
/// Invoked on activation, and the only garbage-collection path for tenant
/// data. A namespace whose name embeds the active tenant's fragment is never
/// deleted.
pub async fn reconcile<S: AssetStore>(store: &S, active_tenant: &str) -> Result<Vec<String>> {
    let fragment = namespace_name(active_tenant);
    let mut survivors = Vec::new();

    for name in store.list_namespaces().await? {
        if name.contains(&fragment) {
            survivors.push(name);
        } else {
            info!(namespace = %name, tenant = %active_tenant, "Deleting foreign namespace");
            store.delete_namespace(&name).await?;
        }
    }

    debug!(tenant = %active_tenant, survivors = survivors.len(), "Namespace reconciliation done");
    Ok(survivors)
}
