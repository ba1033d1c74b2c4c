//! Duplex connection loops over in-memory channels.

use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use egoflow::config::ConnectionConfig;
use egoflow::connection::{ConnectionContext, ConnectionRegistry, WireMessage, serve_connection};

mod common;

use common::harness;

struct Client {
    tx: mpsc::UnboundedSender<Result<WireMessage, String>>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
    task: JoinHandle<()>,
}

impl Client {
    fn send(&self, text: &str) {
        self.tx
            .unbounded_send(Ok(WireMessage::Text(text.to_string())))
            .unwrap();
    }

    /// Next outbound envelope, skipping transport frames.
    async fn next_event(&mut self) -> Value {
        loop {
            let message = timeout(Duration::from_secs(5), self.rx.next())
                .await
                .expect("timed out waiting for event")
                .expect("connection closed");
            if let WireMessage::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn events_until_terminal(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let kind = event["type"].as_str().unwrap().to_string();
            events.push(event);
            if kind == "done" || kind == "error" {
                return events;
            }
        }
    }
}

fn connect(ctx: ConnectionContext) -> Client {
    let (tx, reader) = mpsc::unbounded();
    let (writer, rx) = mpsc::unbounded();
    let task = tokio::spawn(serve_connection(reader, writer, 7, ctx));
    Client { tx, rx, task }
}

fn context(h: &common::Harness) -> (ConnectionContext, ConnectionRegistry) {
    let (registry, _task) = ConnectionRegistry::spawn();
    let ctx = ConnectionContext {
        orchestrator: h.orchestrator.clone(),
        registry: registry.clone(),
        config: ConnectionConfig::default(),
    };
    (ctx, registry)
}

async fn wait_for_count(registry: &ConnectionRegistry, expected: usize) {
    for _ in 0..100 {
        if registry.count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never reached {expected} connections");
}

#[tokio::test]
async fn test_request_streams_events_back() {
    let h = harness();
    let (ctx, registry) = context(&h);
    let mut client = connect(ctx);
    wait_for_count(&registry, 1).await;

    client.send(r#"{"query": "hello", "mode": "chat", "temp_id": 5}"#);
    let events = client.events_until_terminal().await;

    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(kinds.first(), Some(&"session_created"));
    assert_eq!(kinds.last(), Some(&"done"));
    let saved = events.iter().find(|e| e["type"] == "log_saved").unwrap();
    assert_eq!(saved["data"]["temp_id"], 5);
}

#[tokio::test]
async fn test_malformed_frame_yields_error_and_connection_survives() {
    let h = harness();
    let (ctx, _registry) = context(&h);
    let mut client = connect(ctx);

    client.send("{not json");
    let event = client.next_event().await;
    assert_eq!(event["type"], "error");
    assert!(
        event["data"]["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid request format")
    );

    client.send(r#"{"query": "still here"}"#);
    let events = client.events_until_terminal().await;
    assert_eq!(events.last().unwrap()["type"], "done");
}

#[tokio::test]
async fn test_closing_reader_unregisters_and_closes_writer() {
    let h = harness();
    let (ctx, registry) = context(&h);
    let mut client = connect(ctx);
    wait_for_count(&registry, 1).await;

    client.tx.close_channel();
    timeout(Duration::from_secs(5), &mut client.task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(registry.count().await, 0);
    let mut saw_close = false;
    while let Ok(Some(message)) = timeout(Duration::from_millis(200), client.rx.next()).await {
        if message == WireMessage::Close {
            saw_close = true;
        }
    }
    assert!(saw_close);
}

#[tokio::test]
async fn test_close_frame_ends_connection() {
    let h = harness();
    let (ctx, registry) = context(&h);
    let mut client = connect(ctx);
    wait_for_count(&registry, 1).await;

    client.tx.unbounded_send(Ok(WireMessage::Close)).unwrap();
    timeout(Duration::from_secs(5), &mut client.task)
        .await
        .unwrap()
        .unwrap();

    wait_for_count(&registry, 0).await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_connection() {
    let h = harness();
    let (ctx, registry) = context(&h);
    let mut first = connect(ctx.clone());
    let mut second = connect(ctx);
    wait_for_count(&registry, 2).await;

    registry
        .broadcast(r#"{"type":"status","data":{"phase":"maintenance"}}"#.to_string())
        .await;

    assert_eq!(first.next_event().await["data"]["phase"], "maintenance");
    assert_eq!(second.next_event().await["data"]["phase"], "maintenance");
}
