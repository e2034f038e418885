// =============================================================================
// Scheduler — periodic sweep and decay loops
// =============================================================================
//
// The safety-net half of the two trigger paths. The low-latency path runs
// inside submit_signal; these loops catch everything it can miss: signals
// that expire while waiting, buckets that fill up without a new submission
// (config changes), and reputation decay.
//
// `stop()` flips a watch channel and joins the loops; an evaluation already
// in flight completes normally, so no torn ConsensusResult is ever
// observable.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::ConsensusEngine;

/// Owns the periodic loops for one engine instance.
pub struct Scheduler {
    engine: Arc<ConsensusEngine>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<ConsensusEngine>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            engine,
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the sweep and decay loops. Periods are read from config at
    /// start time; changing them requires a restart.
    pub fn start(&self) {
        let (sweep_interval, decay_interval) = {
            let cfg = self.engine.config.read();
            (
                tokio::time::Duration::from_secs(cfg.sweep_interval_secs),
                tokio::time::Duration::from_secs(cfg.decay_interval_secs),
            )
        };

        info!(
            sweep_secs = sweep_interval.as_secs(),
            decay_secs = decay_interval.as_secs(),
            "scheduler starting"
        );

        let mut handles = self.handles.lock();

        // ── Sweep loop: expiry + re-evaluation ──────────────────────────
        {
            let engine = self.engine.clone();
            let mut shutdown = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(sweep_interval);
                // First tick fires immediately; skip it so startup is quiet.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            engine.sweep(Utc::now());
                        }
                        _ = shutdown.changed() => {
                            debug!("sweep loop stopping");
                            break;
                        }
                    }
                }
            }));
        }

        // ── Decay loop ──────────────────────────────────────────────────
        {
            let engine = self.engine.clone();
            let mut shutdown = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(decay_interval);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            engine.apply_decay(Utc::now());
                        }
                        _ = shutdown.changed() => {
                            debug!("decay loop stopping");
                            break;
                        }
                    }
                }
            }));
        }
    }

    /// Signal both loops to stop and wait for them to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
