use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tandem_proto::{ClientMessage, ParticipantId, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::server::AppState;
use crate::telemetry;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("origin {0} is not allowed")]
    OriginNotAllowed(String),
}

impl UpgradeError {
    fn metric_label(&self) -> &'static str {
        match self {
            UpgradeError::OriginNotAllowed(_) => "origin",
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        telemetry::record_frame_rejected(self.metric_label());
        (StatusCode::FORBIDDEN, self.to_string()).into_response()
    }
}

pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, UpgradeError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.origins.allows(origin) {
        let origin = origin.unwrap_or_default().to_string();
        warn!(%origin, "rejecting websocket from disallowed origin");
        return Err(UpgradeError::OriginNotAllowed(origin));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let participant = state.lobby.admit(tx);

    let writer_id = participant.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(err) => {
                    warn!(participant = %writer_id.short(), error = %err, "failed to encode server message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(participant = %writer_id.short(), "writer task ended");
    });

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(participant = %participant.short(), error = %err, "websocket error");
                break;
            }
        };
        match frame {
            Message::Text(text) => dispatch(&state, &participant, &text),
            // some clients send JSON in binary frames
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch(&state, &participant, text),
                Err(_) => {
                    debug!(participant = %participant.short(), bytes = data.len(), "ignoring non-utf8 binary frame");
                    telemetry::record_frame_rejected("binary");
                }
            },
            Message::Close(_) => {
                debug!(participant = %participant.short(), "client closed websocket");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.lobby.disconnect(&participant);
    writer.abort();
}

/// Malformed frames are dropped without a reply.
fn dispatch(state: &AppState, participant: &ParticipantId, text: &str) {
    match ClientMessage::decode(text) {
        Ok(message) => {
            debug!(participant = %participant.short(), kind = message.kind(), "control message");
            state.lobby.handle(participant, message);
        }
        Err(err) => {
            debug!(participant = %participant.short(), error = %err, "dropping malformed frame");
            telemetry::record_frame_rejected("malformed");
        }
    }
}
