//! Interop Swapper - cross-chain swap engine
//!
//! The swapper scans external platforms for deposits into swap addresses,
//! settles them on the native chain, and pays outbound swaps requested from
//! the native chain on the external platforms. An oracle cache keeps every
//! block and transaction it has looked at so decisions survive restarts.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod coordination;
mod error;
mod interop;
mod metrics;
mod oracle;
mod signer;
mod state;
mod swapper;
#[cfg(test)]
mod testing;

use config::Settings;
use coordination::{AddressRegistry, SwapLedger, SwapOrchestrator};
use metrics::MetricsServer;
use oracle::{CryptoCompare, OracleCache, PriceSource};
use signer::{NodeMempool, RpcSigner};
use swapper::SwapperContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Interop Swapper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} platforms",
        settings.enabled_platforms().len()
    );

    // Open storage and run migrations
    let store = state::open_store(&settings.storage).await?;

    // Oracle cache, with a price feed only when a key is configured
    let price_source: Option<Arc<dyn PriceSource>> = match settings.oracle.api_key() {
        Some(key) => {
            let feed = CryptoCompare::new(&settings.oracle.price_url, key)?;
            Some(Arc::new(feed) as Arc<dyn PriceSource>)
        }
        None => {
            warn!("No price API key configured, price lookups will fail");
            None
        }
    };
    let oracle = Arc::new(OracleCache::new(store.clone(), settings.oracle.clone(), price_source));

    let registry = Arc::new(AddressRegistry::from_settings(&settings));
    let ledger = Arc::new(SwapLedger::new(store.clone()));
    let remote_signer = Arc::new(RpcSigner::new(&settings.node.signer_url)?);
    let mempool = Arc::new(NodeMempool::new(&settings.node.rpc_urls)?);

    // Build one swapper per enabled platform
    let ctx = SwapperContext {
        oracle: oracle.clone(),
        registry: registry.clone(),
        ledger: ledger.clone(),
        remote_signer: remote_signer.clone(),
        config: settings.swapper.clone(),
    };
    let mut swappers = Vec::new();
    for (name, platform) in settings.enabled_platforms() {
        swappers.push(swapper::build_swapper(name, platform, &ctx)?);
    }
    info!("Platform swappers initialized");

    let orchestrator = Arc::new(SwapOrchestrator::new(
        swappers,
        oracle.clone(),
        ledger,
        registry,
        remote_signer,
        mempool,
        settings.swapper.poll_interval(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let state = api::AppState {
            orchestrator: orchestrator.clone(),
            oracle: oracle.clone(),
            store: store.clone(),
        };
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start platform workers
    let orchestrator_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = orchestrator.run().await {
                error!("Swap orchestrator error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let store = store.clone();
        let interval = settings.swapper.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let mut healthy = true;
                for (platform, reachable) in orchestrator.health_check().await {
                    if !reachable {
                        warn!("Platform {} health check failed", platform);
                        healthy = false;
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Storage health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Interop Swapper is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    orchestrator.stop().await;

    api_handle.abort();
    orchestrator_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Interop Swapper stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,interop_swapper=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
