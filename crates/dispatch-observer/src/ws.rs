//! `WebSocket` handler for live filtered views.
//!
//! Clients connect to `GET /ws/subscribe` with [`FilterQuery`] parameters.
//! The first text frame is always a JSON
//! [`ObserverMessage::Snapshot`](dispatch_types::ObserverMessage); every
//! later frame concerns one record, in commit order per record.
//!
//! A slow client never stalls the engine: its subscription resynchronises
//! with a fresh snapshot instead. A client that disconnects is simply
//! unsubscribed; reconnecting starts over from a snapshot.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dispatch_core::{RoutingService, Subscription};
use dispatch_store::EntityStore;
use dispatch_types::EntityKind;
use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::query::FilterQuery;
use crate::state::AppState;

/// Open a subscription and upgrade to a `WebSocket`.
///
/// The subscription is opened before the upgrade so a store outage is
/// reported as `503` instead of a socket that closes immediately.
///
/// # Route
///
/// `GET /ws/subscribe`
pub async fn ws_subscribe<S, R>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S, R>>>,
    Query(params): Query<FilterQuery>,
) -> Result<impl IntoResponse, ObserverError>
where
    S: EntityStore,
    R: RoutingService,
{
    let filter = params.into_filter(EntityKind::Emergency)?;
    let subscription = state.notifier().subscribe(filter).await?;
    Ok(ws.on_upgrade(|socket| handle_ws(socket, subscription)))
}

/// Forward subscription messages as text frames until either side goes
/// away.
async fn handle_ws(mut socket: WebSocket, mut subscription: Subscription) {
    let observer_id = subscription.id();
    debug!(%observer_id, "WebSocket client connected");

    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(message) = next else {
                    debug!(%observer_id, "Subscription closed, shutting down WebSocket");
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(%observer_id, "Failed to serialize observer message: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(%observer_id, "WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%observer_id, "WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(%observer_id, "WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(%observer_id, "WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
