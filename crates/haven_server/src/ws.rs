//! WebSocket transport
//!
//! One socket per session. The handshake rides on the upgrade request
//! as query parameters; after upgrade the socket carries user text
//! inbound and JSON envelopes outbound. The transport owns nothing
//! conversational: every decision is delegated to the orchestrator.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use haven_core::orchestrator::BUDGET_NOTICE;
use haven_core::{ConnectionId, CoreError, Envelope, Wall};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: String,
    pub wall: Wall,
}

/// Inbound frame shape. Plain text frames are accepted as a fallback
/// for simple clients.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    text: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state, params))
}

async fn serve_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let (mut sink, mut stream) = socket.split();
    let connection_id = ConnectionId::generate();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(32);

    let accept = match state
        .orchestrator
        .connect(&params.token, params.wall, connection_id.clone(), outbound_tx)
        .await
    {
        Ok(accept) => accept,
        Err(err) => {
            let reason = match &err {
                CoreError::BudgetExhausted { .. } => BUDGET_NOTICE.to_string(),
                CoreError::AuthRejected { .. } => "Sign-in failed.".to_string(),
                other => {
                    warn!(error = %other, "connect failed");
                    "Could not start a conversation. Try again in a bit.".to_string()
                }
            };
            let frame = serde_json::json!({ "type": "connect_rejected", "reason": reason });
            let _ = sink.send(Message::Text(frame.to_string().into())).await;
            let _ = sink.close().await;
            return;
        }
    };

    let session_id = accept.session_id.clone();
    info!(session_id = %session_id, persona = accept.persona_name, "socket attached");

    // Writer: envelopes queued by the pipeline become text frames.
    // Ends when the registry drops the sender (disconnect or
    // supersession), which closes the socket.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let frame = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "envelope serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(session_id = %session_id, error = %err, "socket read error");
                break;
            }
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings are answered by axum; other frame kinds are noise.
            _ => continue,
        };

        let user_text = match serde_json::from_str::<InboundFrame>(&text) {
            Ok(inbound) => inbound.text,
            Err(_) => text.to_string(),
        };

        state.orchestrator.connections().touch(&connection_id);
        match state
            .orchestrator
            .handle_message(&session_id, &user_text)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_session_fatal() => {
                info!(session_id = %session_id, error = %err, "session ended by pipeline");
                break;
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "turn rejected");
            }
        }
    }

    state.orchestrator.disconnect(&session_id).await;
    writer.abort();
    debug!(session_id = %session_id, "socket detached");
}
