use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, Stream, StreamExt};
use metrics::counter;
use stopwatch_core::{ClientCommand, Decoded, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    registry::ConnectionId,
    timekeeper::TimekeeperGone,
    AppState,
};

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    if let Err(err) = serve_connection(socket, state).await {
        warn!("connection ended with error: {err:?}");
    }
}

async fn serve_connection(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let connection_id = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    state
        .timekeeper
        .connected(connection_id, tx)
        .context("failed to register connection")?;
    info!(connection_id = %connection_id, "viewer connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.encode() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "dropping unencodable event"
                    );
                    continue;
                }
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    let result = read_frames(&state, connection_id, &mut ws_rx).await;

    let _ = state.timekeeper.disconnected(connection_id);
    writer.abort();
    info!(connection_id = %connection_id, "viewer disconnected");

    result.context("timekeeper unavailable")
}

async fn read_frames<S>(
    state: &AppState,
    connection_id: ConnectionId,
    ws_rx: &mut S,
) -> Result<(), TimekeeperGone>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(state, connection_id, &text)?,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => handle_frame(state, connection_id, &text)?,
                Err(_) => {
                    warn!(connection_id = %connection_id, "discarding non-utf8 binary frame");
                    counter!("stopwatch_frames_malformed_total", 1);
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving frame");
                break;
            }
        }
    }
    Ok(())
}

/// Parse failures stay local to this connection; only well-formed commands
/// reach the timekeeper.
fn handle_frame(
    state: &AppState,
    connection_id: ConnectionId,
    text: &str,
) -> Result<(), TimekeeperGone> {
    match ClientCommand::decode(text) {
        Ok(Decoded::Message(command)) => {
            debug!(connection_id = %connection_id, command = command.kind(), "command received");
            state.timekeeper.command(connection_id, command)
        }
        Ok(Decoded::Unknown(kind)) => {
            debug!(connection_id = %connection_id, %kind, "ignoring unrecognised frame kind");
            counter!("stopwatch_frames_ignored_total", 1);
            Ok(())
        }
        Err(err) => {
            warn!(connection_id = %connection_id, error = %err, "discarding malformed frame");
            counter!("stopwatch_frames_malformed_total", 1);
            Ok(())
        }
    }
}
