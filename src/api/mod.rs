// =============================================================================
// API surface — REST endpoints, admin auth, WebSocket event feed
// =============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::engine::ConsensusEngine;

pub mod auth;
pub mod rest;
pub mod ws;

/// Shared state behind every handler: the engine plus the admin token the
/// router was built with.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ConsensusEngine>,
    admin_token: Arc<str>,
}

impl ApiState {
    pub fn new(engine: Arc<ConsensusEngine>, admin_token: &str) -> Self {
        Self {
            engine,
            admin_token: admin_token.into(),
        }
    }

    /// Resolve the admin token from `MERIDIAN_ADMIN_TOKEN` once, at router
    /// construction. Rotating the token requires a restart.
    pub fn from_env(engine: Arc<ConsensusEngine>) -> Self {
        let token = std::env::var("MERIDIAN_ADMIN_TOKEN").unwrap_or_default();
        if token.is_empty() {
            warn!("MERIDIAN_ADMIN_TOKEN is not set — every authenticated endpoint will reject");
        }
        Self::new(engine, &token)
    }

    /// Constant-time token comparison; a mismatch must not leak where the
    /// first differing byte sits. An unconfigured (empty) token matches
    /// nothing.
    pub fn token_matches(&self, presented: &str) -> bool {
        let expected = self.admin_token.as_bytes();
        let presented = presented.as_bytes();
        if expected.is_empty() || expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
