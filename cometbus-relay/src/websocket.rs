// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! A client upgrades its bus to a socket by sending `Associate` with the
//! session and client ids of a queue it already opened over HTTP. From then
//! on queue traffic is pushed as text frames and inbound text frames are
//! routed like POSTed messages.

use std::sync::Arc;
use std::time::Duration;

use cometbus_core::message::{commands, parts};
use cometbus_core::{
    encode_messages, parse_messages, BusError, CoreError, Message, QueueSession, ServerBus,
};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::metrics::RelayMetrics;

/// Longest a single queue wait lasts before it is renewed.
const PUSH_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Reads the session named by an `Associate` frame.
fn associate(text: &str) -> Result<QueueSession, String> {
    let messages = parse_messages(text.as_bytes()).map_err(|e| e.to_string())?;
    let message = messages
        .into_iter()
        .next()
        .ok_or_else(|| "empty associate frame".to_string())?;

    if message.command_type() != Some(commands::ASSOCIATE) {
        return Err(format!(
            "expected {}, got {:?}",
            commands::ASSOCIATE,
            message.command_type()
        ));
    }

    let id = |part: &str| {
        message
            .get_str(part)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("associate frame without {}", part))
    };
    Ok(QueueSession::new(
        id(parts::SESSION_ID)?,
        id(parts::CLIENT_ID)?,
    ))
}

async fn send_messages<W>(write: &mut W, messages: &[Message]) -> Result<(), tungstenite::Error>
where
    W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    write.send(WsMessage::Text(encode_messages(messages))).await
}

/// Handles a WebSocket connection.
pub async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    bus: Arc<ServerBus>,
    metrics: RelayMetrics,
    max_message_size: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    // Wait for Associate to learn the session
    let session = match read.next().await {
        Some(Ok(WsMessage::Text(text))) => match associate(&text) {
            Ok(session) => session,
            Err(e) => {
                warn!("Rejecting socket: {}", e);
                return;
            }
        },
        Some(Ok(_)) => {
            warn!("Expected text frame for {}", commands::ASSOCIATE);
            return;
        }
        Some(Err(e)) => {
            warn!("Error reading {}: {}", commands::ASSOCIATE, e);
            return;
        }
        None => {
            debug!("Connection closed before {}", commands::ASSOCIATE);
            return;
        }
    };

    let Some(queue) = bus.get_queue(&session) else {
        debug!("No queue for socket {}", session);
        metrics.disconnects_sent_total.inc();
        let _ = send_messages(&mut write, &[Message::session_expired()]).await;
        let _ = write.close().await;
        return;
    };

    if send_messages(&mut write, &[Message::websocket_channel_open()])
        .await
        .is_err()
    {
        return;
    }
    debug!("Socket channel open for {}", session);

    loop {
        tokio::select! {
            inbound = read.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    queue.heartbeat();
                    if text.len() > max_message_size {
                        warn!("Message too large from {}: {} bytes", session, text.len());
                        let details = format!("{} bytes exceeds {}", text.len(), max_message_size);
                        let error = Message::error("message too large", Some(&details));
                        if send_messages(&mut write, &[error]).await.is_err() {
                            break;
                        }
                        continue;
                    }

                    match bus.store_payload(&session, text.as_bytes()) {
                        Ok(count) => {
                            metrics.messages_received_total.inc_by(count as u64);
                        }
                        Err(CoreError::Bus(BusError::QueueUnavailable(_))) => {
                            metrics.disconnects_sent_total.inc();
                            let _ = send_messages(&mut write, &[Message::session_expired()]).await;
                            return;
                        }
                        Err(e) => {
                            let error = match e {
                                CoreError::Message(e) => {
                                    Message::error("invalid message payload", Some(&e.to_string()))
                                }
                                e => {
                                    warn!("Failed to store message from {}: {}", session, e);
                                    Message::error("failed to store message", Some(&e.to_string()))
                                }
                            };
                            if send_messages(&mut write, &[error]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    queue.heartbeat();
                    let _ = write.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Socket {} closed", session);
                    break;
                }
                Some(Ok(_)) => {
                    queue.heartbeat();
                }
                Some(Err(e)) => {
                    warn!("Error from {}: {}", session, e);
                    break;
                }
            },
            polled = queue.poll(PUSH_POLL_INTERVAL) => match polled {
                Ok(messages) if messages.is_empty() => {}
                Ok(messages) => {
                    metrics.messages_delivered_total.inc_by(messages.len() as u64);
                    if send_messages(&mut write, &messages).await.is_err() {
                        warn!("Failed to push to {}", session);
                        break;
                    }
                }
                Err(e) => {
                    debug!("Queue for {} gone: {}", session, e);
                    metrics.disconnects_sent_total.inc();
                    let _ = send_messages(&mut write, &[Message::session_expired()]).await;
                    break;
                }
            },
        }
    }
}
