use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ddocache_core::strip_system_fields;
use ddocache_indexer::storage::{
    CursorKind, CursorStatus, DdoState, RetryEntry, RetryFilter, RetryKind, StateLookup, Storage,
};
use ddocache_validator::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    storage: Storage,
    validator: Arc<Validator>,
}

/// Runtime configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    database_url: String,
    port: u16,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://ddocache.db".to_string());
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT: {}", raw))?,
            Err(_) => 8080,
        };

        Ok(Self { database_url, port })
    }

    /// Configuration for in-process tests; the port is never bound.
    pub fn for_test(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 0,
        }
    }
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let storage = Storage::new(&config.database_url, None, None)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    let validator = Validator::new().context("Failed to load DDO schemas")?;

    Ok(AppState {
        storage,
        validator: Arc::new(validator),
    })
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ddo/validate", post(validate_ddo))
        .route("/chains/list", get(list_chains))
        .route("/chains/status/:chain_id", get(chain_status))
        .route("/state/ddo", get(get_ddo_state))
        .route("/state/retryQueue", get(get_retry_queue))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let storage_for_shutdown = state.storage.clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("DDO cache API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    storage_for_shutdown.close().await;
    info!("DDO cache API shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
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
                warn!("Failed to install SIGTERM handler: {}", err);
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

async fn health(State(_state): State<AppState>) -> &'static str {
    "OK"
}

const ERROR_CODE_INVALID_REQUEST: &str = "invalid_request";
const ERROR_CODE_NOT_FOUND: &str = "not_found";
const ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_REQUEST, msg)
}

fn not_found(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::NOT_FOUND, ERROR_CODE_NOT_FOUND, msg)
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ERROR_CODE_INTERNAL_ERROR,
        format!("Internal error: {}", err),
    )
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    errors: BTreeMap<String, String>,
}

/// Validate a posted DDO against the schema of its declared version.
///
/// The body is parsed by hand so that malformed JSON maps to 400 rather than
/// axum's 422 for well-formed JSON of the wrong shape.
async fn validate_ddo(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ValidateResponse>, ApiError> {
    let mut ddo: Value = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("Malformed JSON body: {}", e)))?;

    let chain_id = ddo.get("chainId").and_then(Value::as_u64).unwrap_or(0);
    let nft_address = ddo
        .get("nftAddress")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    strip_system_fields(&mut ddo);

    let report = state
        .validator
        .validate_dict(&ddo, chain_id, &nft_address)
        .map_err(internal_error)?;

    Ok(Json(ValidateResponse {
        valid: report.conforms,
        errors: report.errors,
    }))
}

async fn list_chains(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, bool>>, ApiError> {
    let chains = state.storage.list_chains().await.map_err(internal_error)?;
    Ok(Json(
        chains
            .into_iter()
            .map(|chain_id| (chain_id.to_string(), true))
            .collect(),
    ))
}

async fn chain_status(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> Result<Json<CursorStatus>, ApiError> {
    state
        .storage
        .get_cursor_status(chain_id, CursorKind::Logs)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("Chain {} is not indexed", chain_id)))
}

#[derive(Debug, Deserialize)]
struct StateQuery {
    #[serde(rename = "chainId")]
    chain_id: Option<u64>,
    nft: Option<String>,
    #[serde(rename = "txId")]
    tx_id: Option<String>,
    did: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn get_ddo_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<DdoState>, ApiError> {
    let lookup = if let Some(nft) = non_empty(query.nft) {
        StateLookup::Nft(nft)
    } else if let Some(tx) = non_empty(query.tx_id) {
        StateLookup::Tx(tx)
    } else if let Some(did) = non_empty(query.did) {
        StateLookup::Did(did)
    } else {
        return Err(bad_request("One of nft, txId or did is required"));
    };

    state
        .storage
        .get_did_state(query.chain_id, &lookup)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found("No state recorded for this query"))
}

#[derive(Debug, Deserialize)]
struct RetryQueueQuery {
    #[serde(rename = "chainId")]
    chain_id: Option<u64>,
    nft: Option<String>,
    did: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn get_retry_queue(
    State(state): State<AppState>,
    Query(query): Query<RetryQueueQuery>,
) -> Result<Json<Vec<RetryEntry>>, ApiError> {
    let kind = non_empty(query.kind)
        .map(|raw| raw.parse::<RetryKind>())
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;

    let filter = RetryFilter {
        chain_id: query.chain_id,
        nft_address: non_empty(query.nft),
        did: non_empty(query.did),
        kind,
    };

    let entries = state
        .storage
        .list_retries(&filter)
        .await
        .map_err(internal_error)?;
    Ok(Json(entries))
}
