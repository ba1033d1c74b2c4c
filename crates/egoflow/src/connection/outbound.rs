//! Bounded outbound queue shared by a connection's producers and its writer.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

/// Result of handing a payload to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the payload was discarded.
    Dropped,
    /// Queue closed; the payload was discarded.
    Closed,
}

/// Sender half of the queue plus its closed flag, under one mutex.
///
/// Once closed no further payloads are accepted; payloads already queued
/// are still drained by the writer.
pub struct Outbound {
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl Outbound {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, payload: String) -> Delivery {
        let sender = self.sender.lock().expect("outbound mutex poisoned");
        let Some(tx) = sender.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Enqueue, waiting up to `timeout` for space.
    pub async fn push_within(&self, payload: String, timeout: Duration) -> Delivery {
        let tx = {
            let sender = self.sender.lock().expect("outbound mutex poisoned");
            match sender.as_ref() {
                Some(tx) => tx.clone(),
                None => return Delivery::Closed,
            }
        };
        match tx.send_timeout(payload, timeout).await {
            Ok(()) => Delivery::Queued,
            Err(SendTimeoutError::Timeout(_)) => Delivery::Dropped,
            Err(SendTimeoutError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Stop accepting payloads. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        self.sender
            .lock()
            .expect("outbound mutex poisoned")
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .expect("outbound mutex poisoned")
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_without_blocking() {
        let (outbound, _rx) = Outbound::new(2);
        assert_eq!(outbound.try_push("a".into()), Delivery::Queued);
        assert_eq!(outbound.try_push("b".into()), Delivery::Queued);
        assert_eq!(outbound.try_push("c".into()), Delivery::Dropped);
    }

    #[tokio::test]
    async fn closed_queue_rejects_but_drains() {
        let (outbound, mut rx) = Outbound::new(4);
        outbound.try_push("kept".into());
        assert!(outbound.close());
        assert!(!outbound.close());
        assert!(outbound.is_closed());
        assert_eq!(outbound.try_push("late".into()), Delivery::Closed);

        assert_eq!(rx.recv().await.as_deref(), Some("kept"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn push_within_waits_for_space() {
        let (outbound, mut rx) = Outbound::new(1);
        outbound.try_push("first".into());

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });

        let delivery = outbound
            .push_within("terminal".into(), Duration::from_secs(5))
            .await;
        assert_eq!(delivery, Delivery::Queued);

        let (first, second) = consumer.await.unwrap();
        assert_eq!(first.as_deref(), Some("first"));
        assert_eq!(second.as_deref(), Some("terminal"));
    }

    #[tokio::test]
    async fn push_within_gives_up_after_timeout() {
        let (outbound, _rx) = Outbound::new(1);
        outbound.try_push("first".into());
        let delivery = outbound
            .push_within("terminal".into(), Duration::from_millis(10))
            .await;
        assert_eq!(delivery, Delivery::Dropped);
    }
}
