//! WebSocket upgrade handler and session lifecycle

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{InputFrame, RoomCmd, RoomHandle};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// How long a fresh connection may dawdle before sending its join intent
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth per session; a client that falls further behind than
/// this has its deltas deferred to the next tick
const OUTBOUND_QUEUE: usize = 64;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // The first frame must be the join intent: which room, and optionally a
    // session id being re-claimed inside its reconnection grace window.
    let (room_name, requested_id) = match await_join(&mut socket).await {
        Some(join) => join,
        None => {
            debug!("Connection closed before a valid join intent");
            return;
        }
    };

    let room = state.rooms.get_or_spawn(&room_name, &state.config);
    let session_id = requested_id.unwrap_or_else(Uuid::new_v4);

    let (outgoing_tx, outgoing_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_QUEUE);
    let (ack_tx, ack_rx) = oneshot::channel();

    if room
        .cmd_tx
        .send(RoomCmd::Connect {
            session_id,
            outgoing: outgoing_tx.clone(),
            ack: ack_tx,
        })
        .await
        .is_err()
    {
        error!(room = %room_name, "Room task gone during join");
        return;
    }

    let (mut ws_sink, ws_stream) = socket.split();

    match ack_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(refused)) => {
            let refusal = ServerMsg::Error {
                code: refused.code().to_string(),
                message: refused.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &refusal).await;
            return;
        }
        Err(_) => {
            error!(room = %room_name, "Room dropped the join ack");
            return;
        }
    }

    info!(room = %room_name, session = %session_id, "Session attached");

    let joined = ServerMsg::Joined {
        session_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &joined).await {
        error!(session = %session_id, error = %e, "Failed to send join ack");
        let _ = room
            .cmd_tx
            .send(RoomCmd::Disconnect {
                session_id,
                consented: false,
            })
            .await;
        return;
    }

    run_session(session_id, room, ws_sink, ws_stream, outgoing_tx, outgoing_rx).await;

    info!(session = %session_id, "WebSocket connection closed");
}

/// Read frames until the join intent arrives (or the peer gives up)
async fn await_join(socket: &mut WebSocket) -> Option<(String, Option<Uuid>)> {
    let deadline = tokio::time::sleep(JOIN_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            frame = socket.recv() => {
                let msg = frame?.ok()?;
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(ClientMsg::Join { room, session_id }) => {
                            return Some((room, session_id));
                        }
                        Ok(other) => {
                            debug!("Message before join ignored: {:?}", other);
                        }
                        Err(e) => {
                            warn!(error = %e, "Malformed frame before join");
                        }
                    },
                    Message::Close(_) => return None,
                    _ => {}
                }
            }
        }
    }
}

/// Run the session with read/write split
async fn run_session(
    session_id: Uuid,
    room: RoomHandle,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    outgoing_tx: mpsc::Sender<ServerMsg>,
    mut outgoing_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = SessionRateLimiter::new();

    // Writer task: room deltas and broadcasts -> WebSocket. An error message
    // from the room is terminal (physics fault poisoning the room): forward
    // it, then close the connection from this side instead of waiting for a
    // client that may never speak again.
    let writer_session = session_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let fatal = matches!(msg, ServerMsg::Error { .. });
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session = %writer_session, error = %e, "WebSocket send failed");
                break;
            }
            if fatal {
                info!(session = %writer_session, "Fatal room error, closing connection");
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    });

    // Reader loop: WebSocket -> room. A Close frame or a leave message is a
    // consented departure; anything else that ends the stream starts the
    // reconnection grace window.
    let mut consented = false;
    while let Some(result) = ws_stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(session = %session_id, error = %e, "WebSocket error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if !rate_limiter.check_msg() {
                    warn!(session = %session_id, "Rate limited message");
                    continue;
                }

                // Malformed payloads are dropped and the session stays open.
                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };

                match client_msg {
                    ClientMsg::Input { seq, keys, angle } => {
                        let cmd = RoomCmd::Input {
                            session_id,
                            frame: InputFrame { seq, keys, angle },
                        };
                        if room.cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    ClientMsg::Shoot { angle } => {
                        let cmd = RoomCmd::Shoot { session_id, angle };
                        if room.cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    ClientMsg::Ping { t } => {
                        // Echoed at receipt time, not routed through the tick.
                        if outgoing_tx.send(ServerMsg::Pong { t }).await.is_err() {
                            break;
                        }
                    }
                    ClientMsg::Leave => {
                        consented = true;
                        break;
                    }
                    ClientMsg::Join { .. } => {
                        debug!(session = %session_id, "Duplicate join ignored");
                    }
                }
            }
            Message::Close(_) => {
                info!(session = %session_id, "Client initiated close");
                consented = true;
                break;
            }
            Message::Binary(_) => {
                warn!(session = %session_id, "Received binary message, ignoring");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = room
        .cmd_tx
        .send(RoomCmd::Disconnect {
            session_id,
            consented,
        })
        .await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
