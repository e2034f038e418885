// =============================================================================
// Meridian Consensus — Main Entry Point
// =============================================================================
//
// Boots the consensus engine, starts the background scheduler (expiry sweep
// + reputation decay), and serves the REST/WebSocket API until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod consensus;
mod engine;
mod engine_config;
mod events;
mod ledger;
mod reputation;
mod scheduler;
mod types;
mod verify;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::ConsensusEngine;
use crate::engine_config::EngineConfig;
use crate::scheduler::Scheduler;
use crate::verify::{HmacSha256Verifier, NoopVerifier, SignatureVerifier};

const CONFIG_PATH: &str = "engine_config.json";

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
    info!("║        Meridian Consensus — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    config.validate().context("invalid engine configuration")?;

    info!(
        min_nodes = config.min_nodes,
        consensus_threshold = config.consensus_threshold,
        byzantine_tolerance = config.byzantine_tolerance,
        validity_window_secs = config.signal_validity_window_secs,
        use_reputation = config.use_reputation,
        require_signatures = config.require_signatures,
        "Engine configuration loaded"
    );

    // ── 2. Signature verifier ────────────────────────────────────────────
    //
    // Node secrets come from MERIDIAN_NODE_SECRETS as a comma-separated
    // list of `node_id=secret` pairs. Without signature enforcement a
    // no-op verifier accepts everything.
    let verifier: Arc<dyn SignatureVerifier> = if config.require_signatures {
        let hmac = HmacSha256Verifier::new();
        let mut loaded = 0usize;
        if let Ok(pairs) = std::env::var("MERIDIAN_NODE_SECRETS") {
            for pair in pairs.split(',') {
                if let Some((node_id, secret)) = pair.trim().split_once('=') {
                    if !node_id.is_empty() && !secret.is_empty() {
                        hmac.set_secret(node_id, secret);
                        loaded += 1;
                    }
                }
            }
        }
        if loaded == 0 {
            warn!("require_signatures is enabled but no node secrets are configured — all signed submissions will be rejected");
        } else {
            info!(nodes = loaded, "HMAC signature verification enabled");
        }
        Arc::new(hmac)
    } else {
        info!("Signature verification disabled");
        Arc::new(NoopVerifier)
    };

    // ── 3. Build the engine ──────────────────────────────────────────────
    let engine = Arc::new(ConsensusEngine::new(config, verifier));

    // ── 4. Background scheduler ──────────────────────────────────────────
    let scheduler = Scheduler::new(engine.clone());
    scheduler.start();

    // ── 5. Start the API server ──────────────────────────────────────────
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let api_engine = engine.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        let app = api::rest::router(api_engine);
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    scheduler.stop().await;
    server.abort();

    if let Err(e) = engine.config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save engine config on shutdown");
    }

    info!("Meridian Consensus shut down complete.");
    Ok(())
}
