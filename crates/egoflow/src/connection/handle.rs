//! A registered duplex connection as seen by producers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::exchange::{Event, EventSink};
use crate::store::UserId;

use super::outbound::{Delivery, Outbound};

/// Shared handle to one live connection.
///
/// Exchanges started from the connection hold it as their event sink and
/// derive their cancellation from it, so closing the connection stops them.
pub struct Connection {
    id: String,
    user_id: UserId,
    outbound: Outbound,
    cancel: CancellationToken,
    terminal_timeout: Duration,
}

impl Connection {
    /// Create a connection and the receiver its writer drains.
    pub fn new(
        user_id: UserId,
        capacity: usize,
        terminal_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, rx) = Outbound::new(capacity);
        let conn = Self {
            id: format!("conn_{}", Ulid::new()),
            user_id,
            outbound,
            cancel: CancellationToken::new(),
            terminal_timeout,
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Token for one exchange started on this connection.
    pub fn exchange_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Enqueue an already serialized payload without waiting.
    pub fn push(&self, payload: String) -> Delivery {
        self.outbound.try_push(payload)
    }

    /// Stop accepting events and cancel running exchanges.
    ///
    /// Returns `true` on the first call.
    pub fn close(&self) -> bool {
        let first = self.outbound.close();
        self.cancel.cancel();
        first
    }
}

#[async_trait]
impl EventSink for Connection {
    async fn emit(&self, event: Event) {
        let payload = event.to_json();
        let delivery = if event.is_priority() {
            self.outbound
                .push_within(payload, self.terminal_timeout)
                .await
        } else {
            self.outbound.try_push(payload)
        };

        match delivery {
            Delivery::Queued => {}
            Delivery::Dropped => {
                warn!(connection_id = %self.id, event = %event.kind, "Outbound queue full, event dropped")
            }
            Delivery::Closed => {
                debug!(connection_id = %self.id, event = %event.kind, "Connection closed, event discarded")
            }
        }
    }
}
