// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires the admin bearer token via the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::api::ApiState;
use crate::engine::ConsensusEngine;
use crate::ledger::{SubmitOutcome, TradeSignal};
use crate::reputation::Tier;
use crate::types::SignalAction;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
/// The admin token is resolved from the environment once, here.
pub fn router(engine: Arc<ConsensusEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Signals & consensus ─────────────────────────────────────
        .route("/api/v1/signals", post(submit_signal))
        .route("/api/v1/signals", get(active_signals))
        .route("/api/v1/consensus", get(consensus_history))
        // ── Nodes & reputation ──────────────────────────────────────
        .route("/api/v1/nodes", post(register_node))
        .route("/api/v1/nodes", get(all_reputations))
        .route("/api/v1/nodes/:node_id", get(node_reputation))
        .route("/api/v1/nodes/:node_id/history", get(node_history))
        .route("/api/v1/nodes/:node_id/trusted", get(node_trusted))
        .route("/api/v1/nodes/:node_id/outcome", post(signal_outcome))
        .route("/api/v1/nodes/:node_id/contribution", post(network_contribution))
        .route("/api/v1/nodes/:node_id/missed", post(missed_round))
        .route("/api/v1/tiers/:tier", get(nodes_by_tier))
        // ── State & metrics ─────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/metrics/consensus", get(consensus_metrics))
        .route("/api/v1/metrics/reputation", get(reputation_metrics))
        // ── WebSocket event feed ────────────────────────────────────
        .route("/api/v1/events", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(ApiState::from_env(engine))
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.engine.current_state_version(),
        server_time: Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Signal submission (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SubmitSignalRequest {
    /// Optional; a UUID v4 is generated when absent.
    #[serde(default)]
    id: Option<String>,
    node_id: String,
    symbol: String,
    timeframe: String,
    action: SignalAction,
    confidence: f64,
    price: f64,
    quantity: f64,
    /// Optional; defaults to the server clock.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    signature: Option<String>,
}

async fn submit_signal(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Json(req): Json<SubmitSignalRequest>,
) -> impl IntoResponse {
    let signal = TradeSignal {
        id: req
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        node_id: req.node_id,
        symbol: req.symbol,
        timeframe: req.timeframe,
        action: req.action,
        confidence: req.confidence,
        price: req.price,
        quantity: req.quantity,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
        signature: req.signature,
    };
    let signal_id = signal.id.clone();

    let result = state.engine.submit_signal(signal);
    match result.outcome {
        SubmitOutcome::Accepted { pending } => {
            let body = serde_json::json!({
                "status": "accepted",
                "signal_id": signal_id,
                "pending": pending,
                "consensus": result.consensus,
            });
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        SubmitOutcome::Duplicate => {
            let body = serde_json::json!({
                "status": "duplicate",
                "signal_id": signal_id,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        SubmitOutcome::Rejected(reason) => {
            let body = serde_json::json!({
                "status": "rejected",
                "signal_id": signal_id,
                "reason": reason,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
    }
}

#[derive(Deserialize)]
struct SymbolQuery {
    #[serde(default)]
    symbol: Option<String>,
}

async fn active_signals(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Query(query): Query<SymbolQuery>,
) -> impl IntoResponse {
    Json(state.engine.active_signals(query.symbol.as_deref()))
}

// =============================================================================
// Consensus history (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn consensus_history(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(
        state
            .engine
            .consensus_history(query.symbol.as_deref(), query.limit),
    )
}

// =============================================================================
// Node registration & reputation (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct RegisterNodeRequest {
    node_id: String,
}

async fn register_node(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Json(req): Json<RegisterNodeRequest>,
) -> impl IntoResponse {
    let created = state.engine.register_node(&req.node_id);
    if created {
        info!(node_id = %req.node_id, "node registered via API");
    }
    let body = serde_json::json!({
        "node_id": req.node_id,
        "created": created,
    });
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}

async fn all_reputations(
    _auth: AuthBearer,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    Json(state.engine.all_reputations())
}

async fn node_reputation(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.node_reputation(&node_id) {
        Some(node) => Json(node).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown node: {node_id}") })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    100
}

async fn node_history(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.engine.node_history(&node_id, query.limit))
}

#[derive(Deserialize)]
struct TrustedQuery {
    #[serde(default)]
    min_tier: Option<String>,
}

async fn node_trusted(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Query(query): Query<TrustedQuery>,
) -> impl IntoResponse {
    let min_tier = match query.min_tier.as_deref().map(str::parse::<Tier>) {
        Some(Ok(tier)) => Some(tier),
        Some(Err(e)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e })),
            )
                .into_response();
        }
        None => None,
    };

    Json(serde_json::json!({
        "node_id": node_id,
        "trusted": state.engine.is_node_trusted(&node_id, min_tier),
    }))
    .into_response()
}

async fn nodes_by_tier(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(tier): Path<String>,
) -> impl IntoResponse {
    match tier.parse::<Tier>() {
        Ok(tier) => Json(state.engine.nodes_by_tier(tier)).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e })),
        )
            .into_response(),
    }
}

// =============================================================================
// Feedback flows (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SignalOutcomeRequest {
    accurate: bool,
    profitable: bool,
    /// [0, 1]; 0.5 is neutral.
    quality: f64,
}

async fn signal_outcome(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Json(req): Json<SignalOutcomeRequest>,
) -> impl IntoResponse {
    state
        .engine
        .record_signal_outcome(&node_id, req.accurate, req.profitable, req.quality);
    Json(serde_json::json!({
        "node_id": node_id,
        "score": state.engine.node_reputation(&node_id).map(|n| n.score),
    }))
}

async fn missed_round(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> impl IntoResponse {
    state.engine.record_missed_round(&node_id);
    Json(serde_json::json!({
        "node_id": node_id,
        "score": state.engine.node_reputation(&node_id).map(|n| n.score),
    }))
}

#[derive(Deserialize)]
struct ContributionRequest {
    uptime_fraction: f64,
    mean_response_ms: f64,
    #[serde(default)]
    contributed_bytes: u64,
}

async fn network_contribution(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Json(req): Json<ContributionRequest>,
) -> impl IntoResponse {
    state.engine.record_network_contribution(
        &node_id,
        req.uptime_fraction,
        req.mean_response_ms,
        req.contributed_bytes,
    );
    Json(serde_json::json!({
        "node_id": node_id,
        "score": state.engine.node_reputation(&node_id).map(|n| n.score),
    }))
}

// =============================================================================
// State & metrics (authenticated)
// =============================================================================

async fn full_state(
    _auth: AuthBearer,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    Json(state.engine.build_snapshot())
}

async fn consensus_metrics(
    _auth: AuthBearer,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    Json(state.engine.consensus_metrics())
}

async fn reputation_metrics(
    _auth: AuthBearer,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    Json(state.engine.reputation_metrics())
}
