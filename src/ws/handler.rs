//! WebSocket upgrade handler

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{InputMsg, JoinAck, MatchHandle, TickedCommand};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// How often the writer pings to measure round trip time
const PING_INTERVAL: Duration = Duration::from_secs(1);

type WsSink = futures::stream::SplitSink<WebSocket, Message>;
type WsStream = futures::stream::SplitStream<WebSocket>;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();
    let handle = state.match_handle.clone();

    // Subscribe before joining so no broadcast after the ack is missed
    let events = handle.subscribe();

    let ack = match handle.join(connection_id).await {
        Ok(ack) => ack,
        Err(err) => {
            warn!(connection_id = %connection_id, error = %err, "join refused");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(err.code(), &err)).await;
            return;
        }
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome(connection_id, &ack)).await {
        error!(connection_id = %connection_id, error = %e, "Failed to send welcome");
        let _ = handle.forward(connection_id, InputMsg::Leave).await;
        return;
    }

    let limiter = ConnectionRateLimiter::new(ack.tick_rate);
    run_session(connection_id, handle, ws_sink, ws_stream, events, limiter).await;

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

fn welcome(connection_id: Uuid, ack: &JoinAck) -> ServerMsg {
    ServerMsg::Welcome {
        connection_id,
        entity: ack.entity,
        tick: ack.tick,
        tick_rate: ack.tick_rate,
        server_time: unix_millis(),
        info: ack.info.clone(),
    }
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection_id: Uuid,
    handle: MatchHandle,
    ws_sink: WsSink,
    mut ws_stream: WsStream,
    events: broadcast::Receiver<ServerMsg>,
    limiter: ConnectionRateLimiter,
) {
    // Replies meant for this connection only
    let (direct_tx, direct_rx) = mpsc::channel::<ServerMsg>(32);
    let writer_handle = tokio::spawn(write_loop(connection_id, ws_sink, events, direct_rx));

    // Reader loop: WebSocket -> match loop
    while let Some(result) = ws_stream.next().await {
        let forwarded = match result {
            Ok(Message::Binary(data)) => {
                if !limiter.check_command() {
                    debug!(connection_id = %connection_id, "Rate limited command frame");
                    continue;
                }
                match TickedCommand::from_bytes(&data) {
                    Ok(ticked) => handle.forward(connection_id, InputMsg::Command(ticked)).await,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Bad command frame");
                        continue;
                    }
                }
            }
            Ok(Message::Text(text)) => {
                if !limiter.check_control() {
                    warn!(connection_id = %connection_id, "Rate limited control message");
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::StartMatch) => {
                        if let Err(err) = handle.start(connection_id).await {
                            let _ = direct_tx.send(ServerMsg::error(err.code(), &err)).await;
                        }
                        Ok(())
                    }
                    Ok(ClientMsg::ActionCompleted { action }) => {
                        handle
                            .forward(connection_id, InputMsg::ActionCompleted(action))
                            .await
                    }
                    Ok(ClientMsg::Ping { t }) => {
                        let pong = ServerMsg::Pong {
                            t,
                            server_time: unix_millis(),
                        };
                        let _ = direct_tx.send(pong).await;
                        Ok(())
                    }
                    Ok(ClientMsg::Leave) => {
                        info!(connection_id = %connection_id, "Client left");
                        break;
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                }
            }
            Ok(Message::Pong(payload)) => match rtt_from_pong(&payload) {
                Some(rtt_ms) => handle.forward(connection_id, InputMsg::Latency { rtt_ms }).await,
                None => continue,
            },
            Ok(Message::Ping(_)) => {
                debug!(connection_id = %connection_id, "Received ping");
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        if forwarded.is_err() {
            debug!(connection_id = %connection_id, "Match loop gone");
            break;
        }
    }

    // Signal disconnect to match loop
    let _ = handle.forward(connection_id, InputMsg::Leave).await;
    writer_handle.abort();
}

/// Writer task: broadcasts, direct replies and latency pings -> WebSocket
async fn write_loop(
    connection_id: Uuid,
    mut ws_sink: WsSink,
    mut events: broadcast::Receiver<ServerMsg>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    loop {
        let sent = tokio::select! {
            event = events.recv() => match event {
                Ok(msg) => send_msg(&mut ws_sink, &msg).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(connection_id = %connection_id, lagged_count = n, "Client lagged, skipping {} messages", n);
                    // Continue - don't disconnect for lag
                    Ok(())
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection_id = %connection_id, "Broadcast channel closed");
                    break;
                }
            },
            Some(msg) = direct_rx.recv() => send_msg(&mut ws_sink, &msg).await,
            _ = ping.tick() => ws_sink
                .send(Message::Ping(unix_millis().to_be_bytes().to_vec()))
                .await
                .map_err(|e| e.to_string()),
        };

        if let Err(e) = sent {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Round trip from a pong echoing our millisecond timestamp
fn rtt_from_pong(payload: &[u8]) -> Option<u64> {
    let sent = u64::from_be_bytes(payload.try_into().ok()?);
    unix_millis().checked_sub(sent)
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_payload_yields_round_trip() {
        let sent = unix_millis() - 40;
        let rtt = rtt_from_pong(&sent.to_be_bytes()).unwrap();
        assert!((40..1000).contains(&rtt));
        assert_eq!(rtt_from_pong(b"short"), None);
    }
}
