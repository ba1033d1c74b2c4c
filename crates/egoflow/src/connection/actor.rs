//! Read and write loops of one duplex connection.
//!
//! The loops are generic over a [`Stream`] of inbound and a [`Sink`] of
//! outbound [`WireMessage`]s so that any message-oriented transport can be
//! plugged in.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::exchange::{ConversationRequest, Event, EventSink, Orchestrator};
use crate::store::UserId;

use super::handle::Connection;
use super::registry::ConnectionRegistry;

/// Transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

/// Shared dependencies of every connection.
#[derive(Clone)]
pub struct ConnectionContext {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: ConnectionRegistry,
    pub config: ConnectionConfig,
}

/// Run a connection until either side ends it.
///
/// Registers with the registry, spawns the write loop, runs the read loop on
/// the current task and unregisters once reading stops.
pub async fn serve_connection<R, W, E>(reader: R, writer: W, user_id: UserId, ctx: ConnectionContext)
where
    R: Stream<Item = Result<WireMessage, E>> + Unpin + Send + 'static,
    E: Display + Send,
    W: Sink<WireMessage> + Unpin + Send + 'static,
    W::Error: Display + Send,
{
    let (conn, outbound_rx) = Connection::new(
        user_id,
        ctx.config.outbound_capacity,
        ctx.config.terminal_send_timeout(),
    );
    ctx.registry.register(conn.clone()).await;

    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound_rx,
        conn.clone(),
        ctx.config.clone(),
    ));

    read_loop(reader, &conn, &ctx).await;

    ctx.registry.unregister(conn.id()).await;
    conn.close();
    if let Err(e) = writer_task.await {
        warn!(connection_id = %conn.id(), error = %e, "Write loop ended abnormally");
    }
    info!(connection_id = %conn.id(), "Connection finished");
}

async fn read_loop<R, E>(mut reader: R, conn: &Arc<Connection>, ctx: &ConnectionContext)
where
    R: Stream<Item = Result<WireMessage, E>> + Unpin,
    E: Display,
{
    let pong_wait = ctx.config.pong_wait();
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = conn.closed() => {
                debug!(connection_id = %conn.id(), "Connection closed by writer");
                break;
            }
            next = timeout_at(deadline, reader.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(connection_id = %conn.id(), "No pong before read deadline");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %conn.id(), error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            WireMessage::Pong(_) => deadline = Instant::now() + pong_wait,
            WireMessage::Ping(_) => {}
            WireMessage::Close => break,
            WireMessage::Text(text) => {
                if text.len() > ctx.config.max_message_bytes {
                    warn!(
                        connection_id = %conn.id(),
                        size = text.len(),
                        "Inbound message exceeds size limit"
                    );
                    break;
                }
                // Not awaited: the next message is read while this one runs.
                tokio::spawn(handle_message(
                    text,
                    conn.clone(),
                    ctx.orchestrator.clone(),
                ));
            }
        }
    }
}

async fn handle_message(text: String, conn: Arc<Connection>, orchestrator: Arc<Orchestrator>) {
    let request: ConversationRequest = match serde_json::from_str(&text) {
        Ok(request) => request,
        Err(e) => {
            warn!(connection_id = %conn.id(), error = %e, "Malformed request frame");
            conn.emit(Event::error(format!("invalid request format: {e}")))
                .await;
            return;
        }
    };

    let cancel = conn.exchange_token();
    let user_id = conn.user_id();
    let sink: Arc<dyn EventSink> = conn;
    // Outcome already reported to the client as the terminal event.
    let _ = orchestrator.process(request, user_id, sink, cancel).await;
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<String>,
    conn: Arc<Connection>,
    config: ConnectionConfig,
) where
    W: Sink<WireMessage> + Unpin,
    W::Error: Display,
{
    let write_wait = config.write_wait();
    let period = config.ping_period();
    let mut ping = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            payload = outbound_rx.recv() => match payload {
                Some(payload) => {
                    if !send_within(&mut writer, WireMessage::Text(payload), write_wait, &conn).await {
                        break;
                    }
                }
                None => {
                    send_within(&mut writer, WireMessage::Close, write_wait, &conn).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if !send_within(&mut writer, WireMessage::Ping(Bytes::new()), write_wait, &conn).await {
                    break;
                }
            }
        }
    }

    conn.close();
}

async fn send_within<W>(
    writer: &mut W,
    message: WireMessage,
    write_wait: std::time::Duration,
    conn: &Connection,
) -> bool
where
    W: Sink<WireMessage> + Unpin,
    W::Error: Display,
{
    match timeout(write_wait, writer.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(connection_id = %conn.id(), error = %e, "Write failed");
            false
        }
        Err(_) => {
            warn!(connection_id = %conn.id(), "Write deadline exceeded");
            false
        }
    }
}
