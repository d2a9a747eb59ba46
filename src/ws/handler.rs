//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::http::middleware::verify_jwt;
use crate::net::OUTBOUND_BUFFER;
use crate::ws::dispatch::{self, ConnectionContext};
use crate::ws::protocol::{PlayerId, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            info!(player_id = %claims.sub, "WebSocket upgrade for authenticated player");
            ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, state))
        }
        Err(e) => {
            error!(error = %e, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, identity: PlayerId, state: AppState) {
    info!(player_id = %identity, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    let writer_handle = tokio::spawn(write_loop(identity.clone(), ws_sink, rx));

    let mut ctx = ConnectionContext::new(identity.clone(), tx);

    // Reader loop: WebSocket -> dispatcher (rate limited per connection)
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                dispatch::handle_text(&state, &mut ctx, &text).await;
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %identity, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(player_id = %identity, "Received ping/pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %identity, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %identity, error = %e, "WebSocket error");
                break;
            }
        }
    }

    dispatch::disconnect(&state, &ctx).await;

    // Dropping the context closes the outbound channel once the registry
    // has let go of its sender too
    drop(ctx);
    writer_handle.abort();

    info!(player_id = %identity, "WebSocket connection closed");
}

/// Outbound channel -> WebSocket
async fn write_loop(
    identity: PlayerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(player_id = %identity, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
