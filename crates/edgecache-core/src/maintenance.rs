//! On-demand maintenance commands and config broadcast consumption
//!
//! Maintenance requests are async request/reply pairs over a transient
//! oneshot channel; the loop answers exactly once per command, replying with
//! an explicit failure payload on internal error rather than going silent.
//! A caller that loses interest simply drops its receiver.
//!
//! Config updates arrive over a broadcast topic with at-least-once,
//! unordered delivery; applying them goes through the engine's merge
//! transition, which converges under duplicates and reordering.

use crate::engine::CacheEngine;
use crate::store::AssetStore;
use crate::types::{CacheInfo, PolicyUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Reply to a maintenance command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MaintenanceReply {
    Success,
    Size { size: usize },
    Info { info: CacheInfo },
    Failure { error: String },
}

/// A maintenance command with its reply channel.
#[derive(Debug)]
pub enum MaintenanceCommand {
    /// Destroy a tenant's namespace.
    ClearCache {
        tenant_id: String,
        reply: oneshot::Sender<MaintenanceReply>,
    },
    /// Entry count of the active namespace.
    GetCacheSize {
        reply: oneshot::Sender<MaintenanceReply>,
    },
    /// Per-entry snapshot of the active namespace.
    GetCacheInfo {
        reply: oneshot::Sender<MaintenanceReply>,
    },
    /// Full sweep: one survivor per logical identity.
    CleanupOldVersions {
        reply: oneshot::Sender<MaintenanceReply>,
    },
}

/// Config update broadcast to every runtime instance sharing the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigBroadcast {
    pub tenant_id: String,
    pub config: PolicyUpdate,
}

/// Drive an engine from a command channel and a config broadcast topic.
///
/// Runs until both channels are closed. Every received command is answered
/// exactly once; a dropped reply receiver is the caller's business.
pub async fn run_maintenance<S: AssetStore>(
    engine: Arc<CacheEngine<S>>,
    mut commands: mpsc::Receiver<MaintenanceCommand>,
    mut config_rx: broadcast::Receiver<ConfigBroadcast>,
) {
    let mut commands_open = true;
    let mut config_open = true;

    while commands_open || config_open {
        tokio::select! {
            command = commands.recv(), if commands_open => {
                match command {
                    Some(command) => handle_command(&engine, command).await,
                    None => {
                        debug!("Maintenance command channel closed");
                        commands_open = false;
                    }
                }
            }
            update = config_rx.recv(), if config_open => {
                match update {
                    Ok(update) => {
                        let switched = engine
                            .apply_config(Some(&update.tenant_id), &update.config)
                            .await;
                        info!(tenant = %update.tenant_id, switched, "Config broadcast applied");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // At-least-once delivery: missed updates will be
                        // republished by their originator.
                        warn!(skipped, "Config broadcast lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Config broadcast channel closed");
                        config_open = false;
                    }
                }
            }
        }
    }
}

async fn handle_command<S: AssetStore>(engine: &CacheEngine<S>, command: MaintenanceCommand) {
    match command {
        MaintenanceCommand::ClearCache { tenant_id, reply } => {
            let outcome = match engine.clear(&tenant_id).await {
                Ok(_) => MaintenanceReply::Success,
                Err(e) => MaintenanceReply::Failure {
                    error: e.to_string(),
                },
            };
            send_reply(reply, outcome);
        }
        MaintenanceCommand::GetCacheSize { reply } => {
            let outcome = match engine.cache_size().await {
                Ok(size) => MaintenanceReply::Size { size },
                Err(e) => MaintenanceReply::Failure {
                    error: e.to_string(),
                },
            };
            send_reply(reply, outcome);
        }
        MaintenanceCommand::GetCacheInfo { reply } => {
            let outcome = match engine.cache_info().await {
                Ok(info) => MaintenanceReply::Info { info },
                Err(e) => MaintenanceReply::Failure {
                    error: e.to_string(),
                },
            };
            send_reply(reply, outcome);
        }
        MaintenanceCommand::CleanupOldVersions { reply } => {
            let outcome = match engine.sweep_old_versions().await {
                Ok(deleted) => {
                    debug!(deleted, "Cleanup command complete");
                    MaintenanceReply::Success
                }
                Err(e) => MaintenanceReply::Failure {
                    error: e.to_string(),
                },
            };
            send_reply(reply, outcome);
        }
    }
}

fn send_reply(reply: oneshot::Sender<MaintenanceReply>, outcome: MaintenanceReply) {
    if reply.send(outcome).is_err() {
        debug!("Maintenance caller dropped its reply channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NamespaceHandle};
    use crate::types::StoredAsset;
    use bytes::Bytes;
    use chrono::Utc;

    const TENANT: &str = "acme";
    const NS: &str = "acme-static-v1";

    struct Harness {
        store: MemoryStore,
        commands: mpsc::Sender<MaintenanceCommand>,
        config_tx: broadcast::Sender<ConfigBroadcast>,
        engine: Arc<CacheEngine<MemoryStore>>,
    }

    fn spawn_harness() -> Harness {
        let store = MemoryStore::new();
        let engine = Arc::new(CacheEngine::new(store.clone(), TENANT));
        let (commands, command_rx) = mpsc::channel(8);
        let (config_tx, config_rx) = broadcast::channel(8);
        tokio::spawn(run_maintenance(engine.clone(), command_rx, config_rx));
        Harness {
            store,
            commands,
            config_tx,
            engine,
        }
    }

    /// Wait until the engine context satisfies a predicate. The broadcast
    /// branch of the select loop runs asynchronously, so tests poll.
    async fn wait_for_context<F>(engine: &CacheEngine<MemoryStore>, predicate: F)
    where
        F: Fn(&crate::policy::RuntimeContext) -> bool,
    {
        for _ in 0..100 {
            if predicate(&engine.context().await) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("engine context never reached expected state");
    }

    async fn put_asset(store: &MemoryStore, key: &str) {
        let handle = store.open(NS).await.unwrap();
        handle
            .put(
                key,
                StoredAsset {
                    physical_key: key.to_string(),
                    content_type: "text/javascript".to_string(),
                    stored_at: Utc::now(),
                    payload: Bytes::from_static(b"body"),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_cache_size_replies() {
        let harness = spawn_harness();
        put_asset(&harness.store, "a.js").await;
        put_asset(&harness.store, "b.js").await;

        let (reply, rx) = oneshot::channel();
        harness
            .commands
            .send(MaintenanceCommand::GetCacheSize { reply })
            .await
            .unwrap();

        match rx.await.unwrap() {
            MaintenanceReply::Size { size } => assert_eq!(size, 2),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_cache_info_replies() {
        let harness = spawn_harness();
        put_asset(&harness.store, "app.ab12cd.js").await;

        let (reply, rx) = oneshot::channel();
        harness
            .commands
            .send(MaintenanceCommand::GetCacheInfo { reply })
            .await
            .unwrap();

        match rx.await.unwrap() {
            MaintenanceReply::Info { info } => {
                assert_eq!(info.namespace, NS);
                assert_eq!(info.entries.len(), 1);
                assert_eq!(info.entries[0].logical_identity, "app.js");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_cache_replies_success() {
        let harness = spawn_harness();
        put_asset(&harness.store, "a.js").await;

        let (reply, rx) = oneshot::channel();
        harness
            .commands
            .send(MaintenanceCommand::ClearCache {
                tenant_id: TENANT.to_string(),
                reply,
            })
            .await
            .unwrap();

        assert!(matches!(rx.await.unwrap(), MaintenanceReply::Success));
        assert!(harness.store.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_old_versions_replies() {
        let harness = spawn_harness();
        put_asset(&harness.store, "a.111111.js").await;
        put_asset(&harness.store, "a.222222.js").await;

        let (reply, rx) = oneshot::channel();
        harness
            .commands
            .send(MaintenanceCommand::CleanupOldVersions { reply })
            .await
            .unwrap();

        assert!(matches!(rx.await.unwrap(), MaintenanceReply::Success));
        let keys = harness
            .store
            .open(NS)
            .await
            .unwrap()
            .list_keys()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a.222222.js".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_reply_receiver_does_not_stall_loop() {
        let harness = spawn_harness();

        let (reply, rx) = oneshot::channel();
        drop(rx);
        harness
            .commands
            .send(MaintenanceCommand::GetCacheSize { reply })
            .await
            .unwrap();

        // The loop must still answer the next command.
        let (reply, rx) = oneshot::channel();
        harness
            .commands
            .send(MaintenanceCommand::GetCacheSize { reply })
            .await
            .unwrap();
        assert!(matches!(rx.await.unwrap(), MaintenanceReply::Size { .. }));
    }

    #[tokio::test]
    async fn test_config_broadcast_applied() {
        let harness = spawn_harness();

        harness
            .config_tx
            .send(ConfigBroadcast {
                tenant_id: TENANT.to_string(),
                config: PolicyUpdate {
                    max_entries: Some(3),
                    ..Default::default()
                },
            })
            .unwrap();

        wait_for_context(&harness.engine, |ctx| ctx.policy.max_entries == 3).await;
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_converges() {
        let harness = spawn_harness();
        let update = ConfigBroadcast {
            tenant_id: TENANT.to_string(),
            config: PolicyUpdate {
                max_age_secs: Some(60),
                ..Default::default()
            },
        };

        harness.config_tx.send(update.clone()).unwrap();
        harness.config_tx.send(update.clone()).unwrap();
        harness.config_tx.send(update).unwrap();

        wait_for_context(&harness.engine, |ctx| {
            ctx.policy.max_age_secs == 60 && ctx.tenant_id == TENANT
        })
        .await;
    }

    #[tokio::test]
    async fn test_broadcast_naming_other_tenant_switches() {
        let harness = spawn_harness();

        harness
            .config_tx
            .send(ConfigBroadcast {
                tenant_id: "other".to_string(),
                config: PolicyUpdate::default(),
            })
            .unwrap();

        wait_for_context(&harness.engine, |ctx| {
            ctx.tenant_id == "other" && ctx.namespace == "other-static-v1"
        })
        .await;
    }

    #[tokio::test]
    async fn test_reply_serializes_with_result_tag() {
        let json = serde_json::to_string(&MaintenanceReply::Size { size: 4 }).unwrap();
        assert!(json.contains(r#""result":"size""#));
        assert!(json.contains(r#""size":4"#));

        let json = serde_json::to_string(&MaintenanceReply::Failure {
            error: "substrate offline".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""result":"failure""#));
    }
}
