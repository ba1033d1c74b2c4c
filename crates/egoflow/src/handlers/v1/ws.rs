//! Duplex websocket endpoint.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt, future};
use tracing::debug;

use crate::connection::{ConnectionContext, WireMessage, serve_connection};
use crate::handlers::api_auth::Requester;
use crate::server::AppState;
use crate::store::UserId;

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => WireMessage::Text(text.to_string()),
            Message::Binary(bytes) => WireMessage::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Message::Ping(bytes) => WireMessage::Ping(bytes),
            Message::Pong(bytes) => WireMessage::Pong(bytes),
            Message::Close(_) => WireMessage::Close,
        }
    }
}

impl From<WireMessage> for Message {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Ping(bytes) => Message::Ping(bytes),
            WireMessage::Pong(bytes) => Message::Pong(bytes),
            WireMessage::Close => Message::Close(None),
        }
    }
}

/// GET /api/v1/ws
///
/// Upgrades to a websocket. Each inbound text frame is one conversation
/// request; outbound frames are event envelopes for all of the
/// connection's exchanges, interleaved.
pub async fn connect(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    upgrade: WebSocketUpgrade,
) -> Response {
    let ctx = ConnectionContext {
        orchestrator: state.orchestrator.clone(),
        registry: state.registry.clone(),
        config: state.connection.clone(),
    };
    upgrade
        .max_message_size(state.connection.max_message_bytes)
        .on_upgrade(move |socket| run_socket(socket, user_id, ctx))
}

async fn run_socket(socket: WebSocket, user_id: UserId, ctx: ConnectionContext) {
    debug!(user_id, "Websocket upgraded");
    let (sink, stream) = socket.split();
    let reader = stream.map(|item| item.map(WireMessage::from));
    let writer = sink.with(|message: WireMessage| future::ready(Ok::<_, axum::Error>(Message::from(message))));
    serve_connection(reader, writer, user_id, ctx).await;
}
