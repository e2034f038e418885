// =============================================================================
// WebSocket Handler — push-based engine event feed
// =============================================================================
//
// Clients connect to `/api/v1/events?token=<token>` and receive every
// EngineEvent as a JSON text frame, in publication order. This is the
// outbound-notification surface: execution, dashboards, and compliance
// archiving all subscribe here.
//
// A client that cannot keep up lags the broadcast channel; the handler logs
// the gap and continues with the next available event rather than
// disconnecting.
// =============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::ApiState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request. The admin token arrives
/// as a `?token=` query parameter because browsers cannot set headers on a
/// WebSocket handshake.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !state.token_matches(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "Invalid or missing token",
        )
            .into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

/// Manages a single event-feed connection.
///
/// Runs two concurrent arms via `tokio::select!`:
///   1. **Event arm** — forward every broadcast EngineEvent as JSON.
///   2. **Recv arm** — answer Ping with Pong, close on Close.
async fn handle_ws_connection(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.engine.events.subscribe();

    info!("event feed subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                // Not a network error; skip the frame.
                                warn!(error = %e, "failed to serialise engine event");
                                continue;
                            }
                        };
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event feed subscriber lagged; events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("event bus closed — disconnecting feed");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("event feed subscriber disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text/Binary/Pong from clients carry no meaning here.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }
}
