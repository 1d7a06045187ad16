//! HTTP API of the node.

use alloy::primitives::Address;
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use newsnet_core::{MessageKey, SignedMessage, B256};
use newsnet_trie::{TrieError, TrieWalker, WalkStats};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::registry::Registry;
use crate::storage::{CrawlCheckpoint, Storage};
use crate::writer::{MessageStore, Rejection, StoredMessage, WriteOutcome};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: MessageStore,
    registry: Registry,
    storage: Storage,
    walk_concurrency: usize,
    max_page_size: usize,
    walk_cache: Arc<Mutex<Option<(B256, WalkStats)>>>,
}

impl AppState {
    /// Bundle the node's components for the handlers.
    pub fn new(
        store: MessageStore,
        registry: Registry,
        storage: Storage,
        walk_concurrency: usize,
        max_page_size: usize,
    ) -> Self {
        Self {
            store,
            registry,
            storage,
            walk_concurrency,
            max_page_size: max_page_size.max(1),
            walk_cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Walk totals of the current root, walked at most once per root.
    async fn trie_stats(&self) -> Result<(B256, WalkStats), TrieError> {
        let trie = self.store.trie().clone();
        let root = trie.root();

        let mut cache = self.walk_cache.lock().await;
        if let Some((cached, stats)) = *cache {
            if cached == root {
                return Ok((root, stats));
            }
        }

        let stats = TrieWalker::new(trie, self.walk_concurrency)
            .walk(root, |_| Ok(()))
            .await?;
        *cache = Some((root, stats));
        Ok((root, stats))
    }
}

/// All routes over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/messages", get(list_messages).post(submit_message))
        .route("/v1/status", get(status))
        .route("/v1/allowlist/:address", get(allowlist_entry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c or SIGTERM.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("API server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn health() -> &'static str {
    "OK"
}

const ERROR_CODE_INVALID_REQUEST: &str = "invalid_request";
const ERROR_CODE_INVALID_MESSAGE: &str = "invalid_message";
const ERROR_CODE_INVALID_SIGNATURE: &str = "invalid_signature";
const ERROR_CODE_NOT_ALLOWED: &str = "not_allowed";
const ERROR_CODE_DUPLICATE_KEY: &str = "duplicate_key";
const ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code: code.to_string(),
                message: message.into(),
            },
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_REQUEST, msg)
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!("Request failed: {:#}", err);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ERROR_CODE_INTERNAL_ERROR,
        "internal error",
    )
}

fn rejected(rejection: Rejection) -> ApiError {
    let message = rejection.to_string();
    match rejection {
        Rejection::DuplicateKey => api_error(StatusCode::CONFLICT, ERROR_CODE_DUPLICATE_KEY, message),
        Rejection::NotAllowed(_) => api_error(StatusCode::FORBIDDEN, ERROR_CODE_NOT_ALLOWED, message),
        Rejection::InvalidSignature(_) => {
            api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_SIGNATURE, message)
        }
        Rejection::InvalidMessage(_) => {
            api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_MESSAGE, message)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SubmitRequest {
    #[serde(flatten)]
    message: SignedMessage,
    /// Author; the signature must recover this address
    signer: Address,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubmitResponse {
    accepted: bool,
    key: MessageKey,
    signer: Address,
}

async fn submit_message(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let outcome = state
        .store
        .submit(&request.message, request.signer)
        .await
        .map_err(internal_error)?;

    match outcome {
        WriteOutcome::Accepted { key, signer } => Ok((
            StatusCode::CREATED,
            Json(SubmitResponse {
                accepted: true,
                key,
                signer,
            }),
        )),
        WriteOutcome::Rejected(rejection) => Err(rejected(rejection)),
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    /// Lowest timestamp to include
    from: Option<u64>,
    amount: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PageResponse {
    messages: Vec<StoredMessage>,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse>, ApiError> {
    let amount = query
        .amount
        .unwrap_or(state.max_page_size)
        .min(state.max_page_size);
    let messages = state
        .store
        .page(query.from.unwrap_or(0), amount)
        .await
        .map_err(internal_error)?;
    Ok(Json(PageResponse { messages }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    root: B256,
    leaf_count: u64,
    node_count: u64,
    checkpoints: Vec<CrawlCheckpoint>,
    allowlist_size: usize,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let (root, stats) = state.trie_stats().await.map_err(internal_error)?;
    let checkpoints = state
        .storage
        .list_checkpoints()
        .await
        .map_err(internal_error)?;

    Ok(Json(StatusResponse {
        root,
        leaf_count: stats.values,
        node_count: stats.nodes,
        checkpoints,
        allowlist_size: state.registry.snapshot().allowlist_size(),
    }))
}

#[derive(Debug, Serialize)]
struct AllowlistResponse {
    address: Address,
    allowed: bool,
    owner: Address,
}

async fn allowlist_entry(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<AllowlistResponse>, ApiError> {
    let address = Address::from_str(&address)
        .map_err(|e| bad_request(format!("invalid address {}: {}", address, e)))?;
    let snapshot = state.registry.snapshot();
    Ok(Json(AllowlistResponse {
        address,
        allowed: snapshot.is_allowed(address),
        owner: snapshot.resolve_owner(address),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_keys;
    use crate::storage::test_support::temp_storage;
    use alloy::primitives::U256;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use newsnet_core::{AccountRecord, DelegationRecord};
    use newsnet_trie::{Trie, EMPTY_ROOT};
    use serde_json::Value;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    async fn setup() -> (Router, NamedTempFile) {
        let (state, file) = setup_state().await;
        (router(state), file)
    }

    async fn setup_state() -> (AppState, NamedTempFile) {
        let owner = test_keys::address(&test_keys::key(1));
        let registry = Registry::from_records(
            &[AccountRecord {
                owner,
                token_id: U256::from(1),
                timestamp: 0,
                value: U256::ZERO,
            }],
            &[DelegationRecord {
                delegator: owner,
                delegate: test_keys::address(&test_keys::key(5)),
                sender: owner,
                block_number: 1,
                tx_index: 0,
                log_index: 0,
                authorize: true,
            }],
        );
        let (storage, file) = temp_storage().await;
        storage.set_checkpoint("mints", 150).await.unwrap();

        let store = MessageStore::new(Trie::in_memory(), registry.clone());
        (AppState::new(store, registry, storage, 8, 2), file)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn post_json(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn post_message(message: &SignedMessage, signer: Address) -> Request<Body> {
        let mut body = serde_json::to_value(message).unwrap();
        body["signer"] = serde_json::json!(signer);
        post_json(&body)
    }

    fn post_signed(title: &str, timestamp: u64, key_number: u8) -> Request<Body> {
        let key = test_keys::key(key_number);
        post_message(
            &test_keys::signed_message(&key, title, timestamp),
            test_keys::address(&key),
        )
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _file) = setup().await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_submit_then_duplicate() {
        let (app, _file) = setup().await;
        let message = test_keys::signed_message(&test_keys::key(1), "Hello", 1_700_000_000);

        let signer = test_keys::address(&test_keys::key(1));

        let (status, body) = send(&app, post_message(&message, signer)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accepted"], true);
        assert_eq!(
            body["key"],
            message.storage_key().unwrap().to_string().as_str()
        );

        let (status, body) = send(&app, post_message(&message, signer)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], ERROR_CODE_DUPLICATE_KEY);
    }

    #[tokio::test]
    async fn test_delegate_may_submit_outsider_may_not() {
        let (app, _file) = setup().await;

        let (status, _) = send(&app, post_signed("Delegated", 1, 5)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, post_signed("Outsider", 1, 6)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], ERROR_CODE_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_claimed_signer_mismatch() {
        let (app, _file) = setup().await;
        let message = test_keys::signed_message(&test_keys::key(1), "Hello", 1);
        let other = test_keys::address(&test_keys::key(2));

        let (status, body) = send(&app, post_message(&message, other)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], ERROR_CODE_INVALID_SIGNATURE);
    }

    #[tokio::test]
    async fn test_submit_requires_signer() {
        let (app, _file) = setup().await;
        let message = test_keys::signed_message(&test_keys::key(1), "Hello", 1);

        let (status, _) = send(&app, post_json(&serde_json::to_value(&message).unwrap())).await;
        assert!(status.is_client_error(), "{}", status);

        let (_, body) = send(&app, get("/v1/messages")).await;
        assert!(body["messages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flipped_signature_is_invalid_signature() {
        let (app, _file) = setup().await;
        let key = test_keys::key(1);
        let mut message = test_keys::signed_message(&key, "Hello", 1);
        let mut raw = message.signature_bytes().unwrap();
        raw[40] ^= 0x80;
        message.signature = format!("0x{}", hex::encode(raw));

        let (status, body) = send(&app, post_message(&message, test_keys::address(&key))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], ERROR_CODE_INVALID_SIGNATURE);
    }

    #[tokio::test]
    async fn test_list_messages_is_paged() {
        let (app, _file) = setup().await;
        for (title, ts) in [("a", 10), ("b", 20), ("c", 30)] {
            let (status, _) = send(&app, post_signed(title, ts, 1)).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        // capped at max_page_size
        let (status, body) = send(&app, get("/v1/messages?amount=50")).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["title"], "a");
        assert_eq!(messages[0]["type"], "amplify");

        let (_, body) = send(&app, get("/v1/messages?from=15&amount=1")).await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["title"], "b");
    }

    #[tokio::test]
    async fn test_status_reports_checkpoints() {
        let (app, _file) = setup().await;

        let (status, body) = send(&app, get("/v1/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["root"], EMPTY_ROOT.to_string().as_str());
        assert_eq!(body["leaf_count"], 0);
        assert_eq!(body["allowlist_size"], 2);
        assert_eq!(body["checkpoints"][0]["path"], "mints");
        assert_eq!(body["checkpoints"][0]["last_block"], 150);

        send(&app, post_signed("Hello", 1, 1)).await;
        let (_, body) = send(&app, get("/v1/status")).await;
        assert_eq!(body["leaf_count"], 1);
    }

    #[tokio::test]
    async fn test_status_walks_once_per_root() {
        let (state, _file) = setup_state().await;
        let app = router(state.clone());

        let (_, body) = send(&app, get("/v1/status")).await;
        assert_eq!(body["leaf_count"], 0);

        // a cached entry for the current root is served without walking
        let marked = WalkStats {
            values: 42,
            ..WalkStats::default()
        };
        *state.walk_cache.lock().await = Some((EMPTY_ROOT, marked));
        let (_, body) = send(&app, get("/v1/status")).await;
        assert_eq!(body["leaf_count"], 42);

        // a new root invalidates it
        send(&app, post_signed("Hello", 1, 1)).await;
        let (_, body) = send(&app, get("/v1/status")).await;
        assert_eq!(body["leaf_count"], 1);
        let cached = state.walk_cache.lock().await.as_ref().map(|(root, _)| *root);
        assert_eq!(cached, Some(state.store.trie().root()));
    }

    #[tokio::test]
    async fn test_allowlist_entry() {
        let (app, _file) = setup().await;
        let owner = test_keys::address(&test_keys::key(1));
        let delegate = test_keys::address(&test_keys::key(5));

        let (status, body) = send(&app, get(&format!("/v1/allowlist/{}", delegate))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);
        let resolved: Address = body["owner"].as_str().unwrap().parse().unwrap();
        assert_eq!(resolved, owner);

        let (status, body) = send(&app, get("/v1/allowlist/not-an-address")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], ERROR_CODE_INVALID_REQUEST);
    }
}
