//! Actor-owned set of live connections.
//!
//! All mutation happens inside one control loop fed by a command queue, so
//! the connection table needs no lock. Callers talk to it through the
//! cloneable [`ConnectionRegistry`] handle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handle::Connection;
use super::outbound::Delivery;

const COMMAND_CAPACITY: usize = 256;

enum RegistryCommand {
    Register(Arc<Connection>),
    Unregister(String),
    Broadcast(String),
    Count(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the registry actor.
#[derive(Clone)]
pub struct ConnectionRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

impl ConnectionRegistry {
    /// Start the registry actor.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let actor = RegistryActor {
            connections: HashMap::new(),
            rx,
        };
        (Self { tx }, tokio::spawn(actor.run()))
    }

    pub async fn register(&self, conn: Arc<Connection>) {
        self.send(RegistryCommand::Register(conn)).await;
    }

    /// Close and remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: &str) {
        self.send(RegistryCommand::Unregister(id.to_string())).await;
    }

    /// Push a payload to every connection, evicting those that cannot take it.
    pub async fn broadcast(&self, payload: String) {
        self.send(RegistryCommand::Broadcast(payload)).await;
    }

    /// Live connection count; zero once the actor has stopped.
    pub async fn count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RegistryCommand::Count(reply_tx)).await;
        reply_rx.await.unwrap_or(0)
    }

    /// Close every connection and stop the actor.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RegistryCommand::Shutdown(reply_tx)).await;
        let _ = reply_rx.await;
    }

    async fn send(&self, command: RegistryCommand) {
        if self.tx.send(command).await.is_err() {
            debug!("Connection registry stopped, command ignored");
        }
    }
}

struct RegistryActor {
    connections: HashMap<String, Arc<Connection>>,
    rx: mpsc::Receiver<RegistryCommand>,
}

impl RegistryActor {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                RegistryCommand::Register(conn) => self.register(conn),
                RegistryCommand::Unregister(id) => self.unregister(&id),
                RegistryCommand::Broadcast(payload) => self.broadcast(payload),
                RegistryCommand::Count(reply) => {
                    let _ = reply.send(self.connections.len());
                }
                RegistryCommand::Shutdown(reply) => {
                    self.close_all();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        self.close_all();
        debug!("Connection registry stopped");
    }

    fn register(&mut self, conn: Arc<Connection>) {
        let id = conn.id().to_string();
        let user_id = conn.user_id();
        self.connections.insert(id.clone(), conn);
        info!(
            connection_id = %id,
            user_id,
            connections = self.connections.len(),
            "Connection registered"
        );
    }

    fn unregister(&mut self, id: &str) {
        if let Some(conn) = self.connections.remove(id) {
            conn.close();
            info!(
                connection_id = %id,
                connections = self.connections.len(),
                "Connection unregistered"
            );
        }
    }

    fn broadcast(&mut self, payload: String) {
        let mut evicted = Vec::new();
        for (id, conn) in &self.connections {
            match conn.push(payload.clone()) {
                Delivery::Queued => {}
                Delivery::Dropped | Delivery::Closed => evicted.push(id.clone()),
            }
        }

        for id in evicted {
            if let Some(conn) = self.connections.remove(&id) {
                conn.close();
                warn!(
                    connection_id = %id,
                    connections = self.connections.len(),
                    "Evicted connection that could not accept broadcast"
                );
            }
        }
    }

    fn close_all(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let count = self.connections.len();
        for (_, conn) in self.connections.drain() {
            conn.close();
        }
        info!(connections = count, "Closed all connections");
    }
}
