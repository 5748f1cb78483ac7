//! Per-tenant policy storage and the active runtime context
//!
//! The runtime context is an explicit value owned by the engine and threaded
//! through every operation; there is no ambient current-tenant state. All
//! mutation goes through two transition functions, `apply_tenant_switch` and
//! `apply_policy_merge`, which keeps convergence under repeated or reordered
//! broadcast delivery testable in isolation.

use crate::classifier::PolicyMatchers;
use crate::namespace::namespace_name;
use crate::types::{PolicyConfig, PolicyUpdate};
use std::collections::HashMap;
use tracing::{debug, info};

/// Per-tenant cache configurations.
#[derive(Debug, Default)]
pub struct PolicyStore {
    configs: HashMap<String, PolicyConfig>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current config for a tenant, or the tenant-scoped default if none has
    /// been set.
    pub fn get(&self, tenant: &str) -> PolicyConfig {
        self.configs
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| PolicyConfig::default_for_tenant(tenant))
    }

    /// Overlay a partial update onto a tenant's config. Atomic with respect
    /// to one update message: the stored config is never left half-merged.
    pub fn merge(&mut self, tenant: &str, update: &PolicyUpdate) {
        let mut config = self.get(tenant);
        config.merge(update);
        self.configs.insert(tenant.to_string(), config);
    }
}

/// The engine's view of who it is serving right now.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub tenant_id: String,
    pub namespace: String,
    pub policy: PolicyConfig,
    /// Policy patterns compiled at merge/switch time, never per request.
    pub matchers: PolicyMatchers,
}

// The matchers are a deterministic function of the policy, so equality is
// over the declarative fields only.
impl PartialEq for RuntimeContext {
    fn eq(&self, other: &Self) -> bool {
        self.tenant_id == other.tenant_id
            && self.namespace == other.namespace
            && self.policy == other.policy
    }
}

impl RuntimeContext {
    /// Context for a freshly resolved tenant.
    pub fn new(tenant: &str, policies: &PolicyStore) -> Self {
        let policy = policies.get(tenant);
        Self {
            tenant_id: tenant.to_string(),
            namespace: namespace_name(tenant),
            matchers: PolicyMatchers::compile(&policy),
            policy,
        }
    }

    /// Switch to a different tenant: re-derive the namespace name and load
    /// that tenant's current config.
    pub fn apply_tenant_switch(&mut self, new_tenant: &str, policies: &PolicyStore) {
        info!(from = %self.tenant_id, to = %new_tenant, "Tenant switch");
        self.tenant_id = new_tenant.to_string();
        self.namespace = namespace_name(new_tenant);
        self.policy = policies.get(new_tenant);
        self.matchers = PolicyMatchers::compile(&self.policy);
    }

    /// Apply a policy merge, switching tenants first when the update names a
    /// different one. The namespace name is recomputed on every merge, never
    /// left stale.
    ///
    /// Returns true when the merge switched the active tenant.
    pub fn apply_policy_merge(
        &mut self,
        policies: &mut PolicyStore,
        update: &PolicyUpdate,
        tenant_override: Option<&str>,
    ) -> bool {
        let target = tenant_override.unwrap_or(&self.tenant_id).to_string();
        let switched = target != self.tenant_id;
        if switched {
            self.apply_tenant_switch(&target, policies);
        }

        policies.merge(&target, update);
        self.policy = policies.get(&target);
        self.namespace = namespace_name(&target);
        self.matchers = PolicyMatchers::compile(&self.policy);
        debug!(tenant = %target, switched, "Policy merge applied");
        switched
    }
}
