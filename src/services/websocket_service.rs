//! Per-connection WebSocket plumbing: one read pump, one write pump and a
//! heartbeat, bridging the socket to the hub's dispatch channel.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval_at},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{InboundFrame, ServerMessage},
    state::{
        SharedState,
        hub::{ClientHandle, HubCommand},
    },
};

/// Cadence of server-initiated pings.
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Read deadline, reset by every inbound frame (pongs included). A silent
/// link past this point is treated as dead.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on a single inbound message.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Handle the full lifecycle for an individual quiz WebSocket connection.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    user_id: Uuid,
    instance_id: Uuid,
    is_creator: bool,
) {
    let (sender, mut receiver) = socket.split();
    let (client, outbound_rx, close_rx) = ClientHandle::new(user_id, instance_id, is_creator);

    let writer_task = tokio::spawn(write_pump(sender, outbound_rx, close_rx.clone()));

    state.hub().dispatch(HubCommand::Register(client.clone()));

    read_pump(&state, &client, &mut receiver, close_rx).await;

    state.hub().dispatch(HubCommand::Unregister {
        instance_id,
        conn_id: client.conn_id,
    });
    client.close();
    finalize(writer_task).await;

    info!(user_id = %user_id, instance_id = %instance_id, "websocket connection closed");
}

/// Drain the outbound queue onto the socket, interleaving heartbeat pings.
/// Terminates when the queue closes, the close signal trips, or a write
/// fails.
async fn write_pump(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
    mut close_rx: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + PING_INTERVAL;
    let mut heartbeat = interval_at(start, PING_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            queued = outbound_rx.recv() => {
                match queued {
                    Some(message) => {
                        let payload = match serde_json::to_string(&message) {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(error = %err, "failed to serialize outbound message");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}

/// Parse inbound frames under the read deadline and feed them to the hub.
/// Malformed JSON yields an error message and keeps the connection open.
async fn read_pump(
    state: &SharedState,
    client: &ClientHandle,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = tokio::time::timeout(READ_TIMEOUT, receiver.next()) => frame,
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
                continue;
            }
        };

        match frame {
            Err(_) => {
                warn!(user_id = %client.user_id, "read deadline exceeded; closing connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                warn!(user_id = %client.user_id, error = %err, "websocket receive error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => match InboundFrame::from_json_str(&text) {
                Ok(inbound) => {
                    state.hub().dispatch(HubCommand::Inbound {
                        client: client.clone(),
                        command: inbound.into_command(),
                    });
                }
                Err(err) => {
                    warn!(user_id = %client.user_id, error = %err, "failed to parse inbound frame");
                    client.send_error("Invalid message format");
                }
            },
            Ok(Some(Ok(Message::Close(_)))) => {
                info!(user_id = %client.user_id, "client closed connection");
                break;
            }
            // Pings are answered by the protocol layer; both directions of
            // heartbeat traffic simply reset the deadline.
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)))) => {}
        }
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>) {
    let _ = writer_task.await;
}
