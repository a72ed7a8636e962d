//! HTTP API for health checks and operator control
//!
//! Operator endpoints cover what a node operator needs to steer the swapper
//! at runtime: checkpoint overrides, block resyncs, clearing stuck settlement
//! records, swap address management and inspecting the oracle's view.

use crate::config::ApiConfig;
use crate::coordination::{PossibleFailure, SwapAddress, SwapOrchestrator};
use crate::error::{SwapError, SwapResult};
use crate::interop::{parse_hash, InteropTransaction, OutboundSwap};
use crate::oracle::OracleCache;
use crate::state::KeyValueStore;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SwapOrchestrator>,
    pub oracle: Arc<OracleCache>,
    pub store: Arc<dyn KeyValueStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/platforms", get(get_platforms))
        .route("/platforms/:platform/height", get(get_height).put(set_height))
        .route("/platforms/:platform/resync", post(resync_block))
        .route("/platforms/:platform/addresses", get(list_addresses).post(add_address))
        .route("/platforms/:platform/transactions/:hash", get(read_transaction))
        .route("/platforms/:platform/fee", get(get_fee))
        .route("/prices/:symbol", get(get_price))
        .route("/swaps/outbound", post(submit_outbound))
        .route("/swaps/possibly-failed", get(possible_failures))
        .route("/swaps/:hash/in-progress", delete(remove_in_progress))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> SwapResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SwapError::Config(format!("Cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| SwapError::Internal(format!("API server failed: {}", e)))
}

enum ApiError {
    BadRequest(String),
    Swap(SwapError),
}

impl From<SwapError> for ApiError {
    fn from(e: SwapError) -> Self {
        ApiError::Swap(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Swap(e @ SwapError::UnknownPlatform(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Swap(e @ SwapError::InvalidAddress(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Swap(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn hash_param(text: &str) -> ApiResult<ethers::types::H256> {
    parse_hash(text).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - storage and every platform node
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage = state.store.health_check().await.is_ok();
    let platforms: Vec<PlatformHealth> = state
        .orchestrator
        .health_check()
        .await
        .into_iter()
        .map(|(platform, healthy)| PlatformHealth { platform, healthy })
        .collect();
    let ready = storage && platforms.iter().all(|p| p.healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            storage,
            platforms,
        }),
    )
}

async fn get_platforms(State(state): State<AppState>) -> ApiResult<Json<Vec<HeightResponse>>> {
    let mut platforms = Vec::new();
    for platform in state.orchestrator.platforms() {
        let height = state.orchestrator.current_height(&platform).await?;
        platforms.push(HeightResponse { platform, height });
    }
    Ok(Json(platforms))
}

async fn get_height(State(state): State<AppState>, Path(platform): Path<String>) -> ApiResult<Json<HeightResponse>> {
    let height = state.orchestrator.current_height(&platform).await?;
    Ok(Json(HeightResponse { platform, height }))
}

async fn set_height(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Json(request): Json<HeightRequest>,
) -> ApiResult<Json<HeightResponse>> {
    state.orchestrator.set_current_height(&platform, request.height).await?;
    Ok(Json(HeightResponse {
        platform,
        height: request.height,
    }))
}

async fn resync_block(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Json(request): Json<HeightRequest>,
) -> ApiResult<StatusCode> {
    state.orchestrator.resync_block(&platform, request.height).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_addresses(State(state): State<AppState>, Path(platform): Path<String>) -> ApiResult<Json<Vec<SwapAddress>>> {
    Ok(Json(state.orchestrator.list_addresses(&platform)?))
}

async fn add_address(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Json(request): Json<AddressRequest>,
) -> ApiResult<StatusCode> {
    if state.orchestrator.add_address(&platform, &request.local, &request.external)? {
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::CONFLICT)
    }
}

async fn read_transaction(
    State(state): State<AppState>,
    Path((platform, hash)): Path<(String, String)>,
) -> ApiResult<Json<InteropTransaction>> {
    let hash = hash_param(&hash)?;
    Ok(Json(state.orchestrator.read_transaction(&platform, hash).await?))
}

async fn get_fee(State(state): State<AppState>, Path(platform): Path<String>) -> ApiResult<Json<FeeResponse>> {
    let fee = state.oracle.pull_fee(Utc::now(), &platform).await?;
    Ok(Json(FeeResponse {
        platform,
        fee: fee.to_string(),
    }))
}

async fn get_price(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<Json<PriceResponse>> {
    let price = state.oracle.pull_price(Utc::now(), &symbol).await?;
    Ok(Json(PriceResponse {
        symbol,
        price: price.to_string(),
    }))
}

async fn submit_outbound(State(state): State<AppState>, Json(request): Json<OutboundRequest>) -> ApiResult<StatusCode> {
    let amount = U256::from_dec_str(&request.amount)
        .map_err(|e| ApiError::BadRequest(format!("Invalid amount {}: {}", request.amount, e)))?;
    let swap = OutboundSwap {
        platform: request.platform,
        source_hash: hash_param(&request.source_hash)?,
        destination_address: request.destination_address,
        symbol: request.symbol,
        amount,
    };

    if state.orchestrator.submit_outbound(swap).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Ok(StatusCode::CONFLICT)
    }
}

async fn possible_failures(State(state): State<AppState>) -> ApiResult<Json<Vec<PossibleFailure>>> {
    Ok(Json(state.orchestrator.possible_failures().await?))
}

async fn remove_in_progress(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult<StatusCode> {
    let hash = hash_param(&hash)?;
    if state.orchestrator.remove_in_progress(&hash).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

// Request and response types

#[derive(Deserialize)]
struct HeightRequest {
    height: u64,
}

#[derive(Deserialize)]
struct AddressRequest {
    local: String,
    external: String,
}

#[derive(Deserialize)]
struct OutboundRequest {
    platform: String,
    source_hash: String,
    destination_address: String,
    symbol: String,
    /// Smallest-unit amount as a decimal string
    amount: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    storage: bool,
    platforms: Vec<PlatformHealth>,
}

#[derive(Serialize)]
struct PlatformHealth {
    platform: String,
    healthy: bool,
}

#[derive(Serialize)]
struct FeeResponse {
    platform: String,
    /// Smallest-unit fee as a decimal string
    fee: String,
}

#[derive(Serialize)]
struct PriceResponse {
    symbol: String,
    price: String,
}

#[derive(Serialize)]
struct HeightResponse {
    platform: String,
    height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OracleConfig, PlatformKind};
    use crate::coordination::{AddressRegistry, SwapLedger};
    use crate::oracle::{FeePolicy, OracleCache};
    use crate::signer::{MockMempoolSubmitter, MockNativeSigner, MockTransferSigner};
    use crate::state::MemoryStore;
    use crate::swapper::{BlockScanner, PlatformSwapper, ScanPolicy, Settlement, VerifyPolicy};
    use crate::testing::{neo_address, FakeChain, FakeReader};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(OracleCache::new(store.clone(), OracleConfig::default(), None));
        oracle.register_platform(Arc::new(FakeReader::new("neo")), FeePolicy::Fixed(U256::one()));
        let ledger = Arc::new(SwapLedger::new(store.clone()));
        let registry = Arc::new(AddressRegistry::new());
        registry.register_platform("neo", PlatformKind::Neo);
        let chain = Arc::new(FakeChain::new("neo", 100));

        let scanner = BlockScanner::new(
            "neo",
            "main",
            4_000_000,
            oracle.clone(),
            chain.clone(),
            ScanPolicy {
                batch_size: 8,
                retry_initial: Duration::from_secs(1),
                retry_max: Duration::from_secs(60),
            },
        );
        let settlement = Settlement::new(
            chain.clone(),
            Arc::new(MockTransferSigner::new()),
            ledger.clone(),
            VerifyPolicy {
                delay: Duration::from_secs(15),
                attempts: 5,
            },
        );
        let swapper = PlatformSwapper::new("neo", PlatformKind::Neo, chain, scanner, settlement);
        let oracle_handle = oracle.clone();
        let orchestrator = SwapOrchestrator::new(
            vec![swapper],
            oracle,
            ledger,
            registry,
            Arc::new(MockNativeSigner::new()),
            Arc::new(MockMempoolSubmitter::new()),
            Duration::from_secs(1),
        );

        router(AppState {
            orchestrator: Arc::new(orchestrator),
            oracle: oracle_handle,
            store,
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_height_round_trip_through_api() {
        let app = app().await;

        let (status, body) = send(&app, "GET", "/platforms/neo/height", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("4000000"));

        let (status, _) = send(&app, "PUT", "/platforms/neo/height", Some(serde_json::json!({ "height": 4100000 }))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, "GET", "/platforms/neo/height", None).await;
        assert!(body.contains("4100000"));

        let (status, _) = send(&app, "GET", "/platforms/tron/height", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_outbound_submission() {
        let app = app().await;
        let request = serde_json::json!({
            "platform": "neo",
            "source_hash": format!("0x{}", "ab".repeat(32)),
            "destination_address": "AQnjXUh1pukb34ugWxQvqEZaYDVB4jd6z1",
            "symbol": "GAS",
            "amount": "100000000"
        });

        let (status, _) = send(&app, "POST", "/swaps/outbound", Some(request.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = send(&app, "POST", "/swaps/outbound", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let broken = serde_json::json!({
            "platform": "neo",
            "source_hash": "0x1234",
            "destination_address": "A",
            "symbol": "GAS",
            "amount": "1"
        });
        let (status, _) = send(&app, "POST", "/swaps/outbound", Some(broken)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_address_management_and_records() {
        let app = app().await;
        let address = serde_json::json!({ "local": "P2KLocal", "external": neo_address(0x03) });

        let (status, _) = send(&app, "POST", "/platforms/neo/addresses", Some(address.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, "POST", "/platforms/neo/addresses", Some(address)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (_, body) = send(&app, "GET", "/platforms/neo/addresses", None).await;
        assert!(body.contains("P2KLocal"));
        let broken = serde_json::json!({ "local": "P2KLocal", "external": "0xnope" });
        let (status, _) = send(&app, "POST", "/platforms/neo/addresses", Some(broken)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/swaps/0x{}/in-progress", "cd".repeat(32));
        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "GET", "/swaps/possibly-failed", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");

        let (status, _) = send(&app, "POST", "/platforms/neo/resync", Some(serde_json::json!({ "height": 10 }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_oracle_quotes() {
        let app = app().await;

        let (status, body) = send(&app, "GET", "/platforms/neo/fee", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"fee\":\"1\""));

        let (status, _) = send(&app, "GET", "/platforms/tron/fee", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // no price credential configured
        let (status, body) = send(&app, "GET", "/prices/SOUL", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("error"));
    }

    #[tokio::test]
    async fn test_readiness_reports_platforms() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"platform\":\"neo\""));
    }
}
