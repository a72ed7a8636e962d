//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Platform health and scan checkpoints
//! - Swap detection and settlement outcomes
//! - Oracle cache efficiency and fetch retries

use crate::error::{SwapError, SwapResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Platform metrics
    pub static ref PLATFORM_HEALTHY: GaugeVec = register_gauge_vec!(
        "interop_swapper_platform_healthy",
        "Platform node reachability (1=healthy, 0=unreachable)",
        &["platform"]
    ).unwrap();

    pub static ref CHECKPOINT_HEIGHT: GaugeVec = register_gauge_vec!(
        "interop_swapper_checkpoint_height",
        "Next block height to scan per platform",
        &["platform"]
    ).unwrap();

    pub static ref FETCH_RETRIES: CounterVec = register_counter_vec!(
        "interop_swapper_block_fetch_retries_total",
        "Block fetches retried after a failure",
        &["platform"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_DETECTED: CounterVec = register_counter_vec!(
        "interop_swapper_swaps_detected_total",
        "Inbound swaps detected",
        &["platform"]
    ).unwrap();

    pub static ref INBOUND_SUBMITTED: CounterVec = register_counter_vec!(
        "interop_swapper_inbound_submitted_total",
        "Native settlements handed to the mempool",
        &["platform"]
    ).unwrap();

    pub static ref SETTLEMENT_FAILURES: CounterVec = register_counter_vec!(
        "interop_swapper_settlement_failures_total",
        "Settlement attempts that failed and will be retried",
        &["platform", "direction"]
    ).unwrap();

    pub static ref OUTBOUND_CONFIRMED: CounterVec = register_counter_vec!(
        "interop_swapper_outbound_confirmed_total",
        "Outbound settlements confirmed on the target platform",
        &["platform"]
    ).unwrap();

    pub static ref POSSIBLE_FAILURES: CounterVec = register_counter_vec!(
        "interop_swapper_possible_failures_total",
        "Outbound settlements neither included nor pending",
        &["platform"]
    ).unwrap();

    // Oracle metrics
    pub static ref ORACLE_CACHE_HITS: CounterVec = register_counter_vec!(
        "interop_swapper_oracle_cache_hits_total",
        "Oracle reads served from storage",
        &["platform", "kind"]
    ).unwrap();

    pub static ref ORACLE_CACHE_MISSES: CounterVec = register_counter_vec!(
        "interop_swapper_oracle_cache_misses_total",
        "Oracle reads that went to the chain",
        &["platform", "kind"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "interop_swapper_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "interop_swapper_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SwapResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SwapError::Config(format!("Cannot bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SwapError::Internal(format!("Metrics server failed: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_platform_health(platform: &str, healthy: bool) {
    PLATFORM_HEALTHY
        .with_label_values(&[platform])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_checkpoint(platform: &str, height: u64) {
    CHECKPOINT_HEIGHT
        .with_label_values(&[platform])
        .set(height as f64);
}

pub fn record_fetch_retry(platform: &str) {
    FETCH_RETRIES.with_label_values(&[platform]).inc();
}

pub fn record_swap_detected(platform: &str) {
    SWAPS_DETECTED.with_label_values(&[platform]).inc();
}

pub fn record_inbound_submitted(platform: &str) {
    INBOUND_SUBMITTED.with_label_values(&[platform]).inc();
}

pub fn record_settlement_failure(platform: &str, direction: &str) {
    SETTLEMENT_FAILURES
        .with_label_values(&[platform, direction])
        .inc();
}

pub fn record_outbound_confirmed(platform: &str) {
    OUTBOUND_CONFIRMED.with_label_values(&[platform]).inc();
}

pub fn record_possible_failure(platform: &str) {
    POSSIBLE_FAILURES.with_label_values(&[platform]).inc();
}

pub fn record_cache_hit(platform: &str, kind: &str) {
    ORACLE_CACHE_HITS
        .with_label_values(&[platform, kind])
        .inc();
}

pub fn record_cache_miss(platform: &str, kind: &str) {
    ORACLE_CACHE_MISSES
        .with_label_values(&[platform, kind])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
