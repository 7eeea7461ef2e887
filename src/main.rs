// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use offramp_server::{
    api::router,
    blockchain::EvmLedgerClient,
    config::{env_optional, AppConfig, LOG_FORMAT_ENV},
    intent::IntentRouter,
    pricing::{CoinGeckoSource, RateCache, RateOracle},
    providers::{PaystackClient, WebhookVerifier},
    settlement::{SettlementMonitor, SettlementService, WebhookReconciler},
    state::{AppState, DependencyStatus},
    storage::ConversionDb,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = env_optional(LOG_FORMAT_ENV).is_some_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    init_tracing();

    let config = AppConfig::from_env().expect("Invalid configuration");

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");
    let db = Arc::new(
        ConversionDb::open(&config.database_path()).expect("Failed to open settlement database"),
    );

    let ledger = Arc::new(EvmLedgerClient::new(&config.ledger).expect("Invalid ledger configuration"));
    let bank = Arc::new(PaystackClient::new(&config.bank).expect("Failed to build bank provider client"));
    let prices = Arc::new(
        CoinGeckoSource::new(&config.pricing.api_base_url).expect("Failed to build price client"),
    );
    let cache = Arc::new(RateCache::new(
        config.pricing.cache_capacity,
        config.pricing.cache_ttl,
    ));
    let oracle = Arc::new(
        RateOracle::new(prices, cache).with_fallback_overrides(&config.pricing.fallback_overrides),
    );

    let dependencies = DependencyStatus {
        ledger_configured: ledger.is_configured(),
        bank_provider_configured: bank.is_configured(),
    };
    if !dependencies.ledger_configured {
        warn!("Ledger not configured (FIAT_BRIDGE_ADDRESS / SETTLEMENT_TOKENS); on-chain steps will fail");
    }
    if !dependencies.bank_provider_configured {
        warn!("PAYSTACK_SECRET_KEY not set; payouts and webhooks are disabled");
    }
    info!(
        chain_id = ledger.network().chain_id,
        explorer = %ledger.network().explorer_url,
        "Settlement chain selected"
    );

    let settlement = Arc::new(SettlementService::new(
        db.clone(),
        ledger,
        bank,
        oracle,
        config.settlement.claim_ttl,
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        db.clone(),
        WebhookVerifier::new(config.bank.secret_key.clone(), config.bank.webhook_dev_mode),
    ));
    let intents = Arc::new(IntentRouter::new(settlement.clone(), &config.intent));

    let shutdown = CancellationToken::new();
    let monitor = SettlementMonitor::new(db.clone(), &config.settlement);
    let monitor_task = tokio::spawn(monitor.run(shutdown.clone()));

    let state = AppState::new(db, settlement, reconciler, intents, dependencies);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), shutdown.clone()));

    match config.tls_paths() {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .expect("Failed to load TLS certificate and key");
            info!(%addr, "Offramp server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTPS server failed");
        }
        None => {
            info!(%addr, "Offramp server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTP server failed");
        }
    }

    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "Settlement monitor task failed");
    }
    info!("Offramp server stopped");
}
