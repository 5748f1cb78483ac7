//! HTTP server for the caching proxy
//!
//! Serves /health, the /admin maintenance endpoints, and a fallback handler
//! that intercepts eligible asset requests through the cache engine and
//! passes everything else straight to the upstream.

use crate::types::{ClearRequest, HealthResponse};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use edgecache_core::{
    AssetRequest, CacheEngine, CacheOutcome, ConfigBroadcast, MaintenanceCommand, MaintenanceReply,
    MemoryStore, OriginFetch,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use url::Url;

/// Shared state for the HTTP server
pub struct ServerState {
    pub engine: Arc<CacheEngine<MemoryStore>>,
    pub fetcher: Arc<dyn OriginFetch>,
    pub commands: mpsc::Sender<MaintenanceCommand>,
    pub config_tx: broadcast::Sender<ConfigBroadcast>,
    pub serving_origin: Url,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/cache/size", get(cache_size))
        .route("/admin/cache/info", get(cache_info))
        .route("/admin/cache/sweep", post(cache_sweep))
        .route("/admin/cache/clear", post(cache_clear))
        .route("/admin/config", post(publish_config))
        .fallback(serve_asset)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let ctx = state.engine.context().await;
    let cache_entries = state.engine.cache_size().await.unwrap_or(0);
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        tenant_id: ctx.tenant_id,
        namespace: ctx.namespace,
        cache_entries,
    })
}

/// Serve an asset: cache-first when interceptable, passthrough otherwise.
async fn serve_asset(State(state): State<SharedState>, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = match state.serving_origin.join(path_and_query) {
        Ok(url) => url,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("bad request path: {}", e))
        }
    };

    let request = AssetRequest {
        method: req.method().as_str().to_string(),
        url: url.to_string(),
    };

    if state
        .engine
        .is_interceptable(&request, &state.serving_origin)
        .await
    {
        match state.engine.fetch_cached(state.fetcher.as_ref(), &request).await {
            Ok(cached) => {
                let cache_header = match cached.outcome {
                    CacheOutcome::Fresh => "HIT",
                    CacheOutcome::Network => "MISS",
                    CacheOutcome::Stale => "STALE",
                };

                // Upstream failure statuses pass through; only ok responses
                // were ever cached, so hits and stale fallbacks are 200.
                Response::builder()
                    .status(StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK))
                    .header(header::CONTENT_TYPE, cached.content_type)
                    .header("X-Cache", cache_header)
                    .body(Body::from(cached.payload))
                    .unwrap()
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first fetch failed");
                error_response(StatusCode::BAD_GATEWAY, "Upstream fetch failed")
            }
        }
    } else {
        match state.fetcher.fetch(&request).await {
            Ok(upstream) => Response::builder()
                .status(StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK))
                .header(header::CONTENT_TYPE, upstream.content_type)
                .header("X-Cache", "BYPASS")
                .body(Body::from(upstream.body))
                .unwrap(),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Passthrough fetch failed");
                error_response(StatusCode::BAD_GATEWAY, "Upstream fetch failed")
            }
        }
    }
}

async fn cache_size(State(state): State<SharedState>) -> Response {
    send_command(&state, |reply| MaintenanceCommand::GetCacheSize { reply }).await
}

async fn cache_info(State(state): State<SharedState>) -> Response {
    send_command(&state, |reply| MaintenanceCommand::GetCacheInfo { reply }).await
}

async fn cache_sweep(State(state): State<SharedState>) -> Response {
    send_command(&state, |reply| MaintenanceCommand::CleanupOldVersions { reply }).await
}

async fn cache_clear(
    State(state): State<SharedState>,
    Json(body): Json<ClearRequest>,
) -> Response {
    let tenant_id = match body.tenant_id {
        Some(tenant_id) => tenant_id,
        None => state.engine.context().await.tenant_id,
    };
    send_command(&state, |reply| MaintenanceCommand::ClearCache { tenant_id, reply }).await
}

/// Publish a config update onto the broadcast topic. Every runtime instance
/// subscribed to the topic applies it independently.
async fn publish_config(
    State(state): State<SharedState>,
    Json(update): Json<ConfigBroadcast>,
) -> Response {
    match state.config_tx.send(update) {
        Ok(subscribers) => {
            info!(subscribers, "Config update published");
            (StatusCode::ACCEPTED, Json(serde_json::json!({ "subscribers": subscribers })))
                .into_response()
        }
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "No config subscribers"),
    }
}

/// Send a maintenance command and await its reply exactly once.
async fn send_command<F>(state: &ServerState, build: F) -> Response
where
    F: FnOnce(oneshot::Sender<MaintenanceReply>) -> MaintenanceCommand,
{
    let (reply, rx) = oneshot::channel();
    if state.commands.send(build(reply)).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Maintenance loop unavailable");
    }

    match rx.await {
        Ok(reply @ MaintenanceReply::Failure { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(reply)).into_response()
        }
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "Maintenance loop unavailable"),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::Request as HttpRequest;
    use bytes::Bytes;
    use edgecache_core::{
        run_maintenance, AssetStore, CacheError, NamespaceHandle, OriginResponse, StoredAsset,
    };
    use tower::ServiceExt;

    const TENANT: &str = "acme";
    const NS: &str = "acme-static-v1";

    struct StaticFetcher {
        body: &'static [u8],
        status: u16,
        fail: bool,
    }

    impl Default for StaticFetcher {
        fn default() -> Self {
            Self {
                body: b"",
                status: 200,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl OriginFetch for StaticFetcher {
        async fn fetch(&self, _request: &AssetRequest) -> edgecache_core::Result<OriginResponse> {
            if self.fail {
                return Err(CacheError::Origin("connection refused".to_string()));
            }
            Ok(OriginResponse {
                status: self.status,
                ok: (200..300).contains(&self.status),
                content_type: "text/javascript".to_string(),
                body: Bytes::from_static(self.body),
            })
        }
    }

    async fn create_test_state(fetcher: StaticFetcher) -> (SharedState, MemoryStore) {
        let store = MemoryStore::new();
        let engine = Arc::new(CacheEngine::new(store.clone(), TENANT));
        let (commands, command_rx) = mpsc::channel(8);
        let (config_tx, config_rx) = broadcast::channel(8);
        tokio::spawn(run_maintenance(engine.clone(), command_rx, config_rx));

        let state = Arc::new(ServerState {
            engine,
            fetcher: Arc::new(fetcher),
            commands,
            config_tx,
            serving_origin: Url::parse("https://app.example.com").unwrap(),
            started_at: Utc::now(),
        });
        (state, store)
    }

    fn get_request(path: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _store) = create_test_state(StaticFetcher::default()).await;
        let router = create_router(state);

        let response = router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["tenant_id"], TENANT);
        assert_eq!(json["namespace"], NS);
    }

    #[tokio::test]
    async fn test_asset_request_miss_then_hit() {
        let (state, _store) =
            create_test_state(StaticFetcher { body: b"console.log(1)", ..Default::default() }).await;
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(get_request("/static/app.ab12cd.js"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-Cache"], "MISS");

        let response = router
            .oneshot(get_request("/static/app.ab12cd.js"))
            .await
            .unwrap();
        assert_eq!(response.headers()["X-Cache"], "HIT");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"console.log(1)"));
    }

    #[tokio::test]
    async fn test_upstream_error_status_passes_through() {
        let (state, store) = create_test_state(StaticFetcher {
            body: b"<html>not found</html>",
            status: 404,
            ..Default::default()
        })
        .await;
        let router = create_router(state);

        let response = router
            .oneshot(get_request("/static/app.ab12cd.js"))
            .await
            .unwrap();

        // An upstream 404 for an interceptable asset stays a 404; answering
        // 200 would hand the error page to the browser as a script.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["X-Cache"], "MISS");
        let keys = store.open(NS).await.unwrap().list_keys().await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_non_asset_request_bypasses_cache() {
        let (state, store) =
            create_test_state(StaticFetcher { body: b"<html></html>", ..Default::default() }).await;
        let router = create_router(state);

        let response = router.oneshot(get_request("/index.html")).await.unwrap();
        assert_eq!(response.headers()["X-Cache"], "BYPASS");
        // Nothing was cached.
        let keys = store.open(NS).await.unwrap().list_keys().await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_stale_served_when_upstream_down() {
        let (state, store) = create_test_state(StaticFetcher { fail: true, ..Default::default() }).await;
        let handle = store.open(NS).await.unwrap();
        handle
            .put(
                "https://app.example.com/static/app.js",
                StoredAsset {
                    physical_key: "https://app.example.com/static/app.js".to_string(),
                    content_type: "text/javascript".to_string(),
                    stored_at: Utc::now() - chrono::Duration::days(30),
                    payload: Bytes::from_static(b"old but served"),
                },
            )
            .await
            .unwrap();
        let router = create_router(state);

        let response = router.oneshot(get_request("/static/app.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-Cache"], "STALE");
    }

    #[tokio::test]
    async fn test_upstream_down_without_cache_is_bad_gateway() {
        let (state, _store) = create_test_state(StaticFetcher { fail: true, ..Default::default() }).await;
        let router = create_router(state);

        let response = router.oneshot(get_request("/static/app.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_admin_cache_size() {
        let (state, store) = create_test_state(StaticFetcher::default()).await;
        store.open(NS).await.unwrap(); // active namespace exists, empty
        let router = create_router(state);

        let response = router
            .oneshot(get_request("/admin/cache/size"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["result"], "size");
        assert_eq!(json["size"], 0);
    }

    #[tokio::test]
    async fn test_admin_sweep_and_clear() {
        let (state, store) = create_test_state(StaticFetcher::default()).await;
        let handle = store.open(NS).await.unwrap();
        for key in ["a.111111.js", "a.222222.js"] {
            handle
                .put(
                    key,
                    StoredAsset {
                        physical_key: key.to_string(),
                        content_type: "text/javascript".to_string(),
                        stored_at: Utc::now(),
                        payload: Bytes::from_static(b"v"),
                    },
                )
                .await
                .unwrap();
        }
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/admin/cache/sweep")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            store.open(NS).await.unwrap().list_keys().await.unwrap(),
            vec!["a.222222.js".to_string()]
        );

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/admin/cache/clear")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"tenant_id":"acme"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.list_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_config_publish_applies() {
        let (state, _store) = create_test_state(StaticFetcher::default()).await;
        let engine = state.engine.clone();
        let router = create_router(state);

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/admin/config")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"tenant_id":"acme","config":{"max_entries":5}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // The subscribed maintenance loop applies the update.
        for _ in 0..100 {
            if engine.context().await.policy.max_entries == 5 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("config update never applied");
    }
}
