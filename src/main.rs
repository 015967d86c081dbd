// =============================================================================
// Helios Signal Relay — Main Entry Point
// =============================================================================
//
// Receives charting-platform alert webhooks, scores them, and drives Binance
// USDⓈ-M futures orders. One webhook event is one linear decision pass; the
// exchange's books are the only trading state.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod classifier;
mod config;
mod error;
mod exchange;
mod execution;
mod indicators;
mod notify;
mod processor;
mod risk;
mod scorer;
mod signal;
#[cfg(test)]
mod testutil;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::BinanceFutures;
use crate::config::Config;
use crate::notify::{DiscordNotifier, NotifySink, NullNotifier};
use crate::processor::SignalProcessor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Helios Signal Relay — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = Config::load("helios_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    config.apply_env_overrides();

    info!(
        leverage = config.leverage,
        score_threshold = config.score_threshold,
        macd_filter = config.enable_macd_filter,
        "relay configuration active"
    );

    // ── 2. Build the exchange client ─────────────────────────────────────
    // Missing credentials are fatal: the relay must never accept webhooks it
    // cannot act on.
    let exchange = Arc::new(BinanceFutures::from_env()?);

    // ── 3. Notification sink ─────────────────────────────────────────────
    let notifier: Arc<dyn NotifySink> = match DiscordNotifier::from_env() {
        Some(discord) => {
            info!("discord notifications enabled");
            Arc::new(discord)
        }
        None => {
            info!("no notification webhook configured, notifications disabled");
            Arc::new(NullNotifier)
        }
    };

    // ── 4. Build shared state ────────────────────────────────────────────
    let webhook_token = std::env::var("HELIOS_WEBHOOK_TOKEN").unwrap_or_default();
    if webhook_token.is_empty() {
        warn!("HELIOS_WEBHOOK_TOKEN is not set — all webhook requests will be rejected");
    }

    let processor = SignalProcessor::new(exchange, notifier, config.clone());
    let state = Arc::new(AppState::new(processor, webhook_token));

    // ── 5. Start the API server ──────────────────────────────────────────
    let app = api::rest::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    info!("helios relay stopped");
    Ok(())
}
