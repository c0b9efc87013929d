//! What every publisher, subscriber and service server has in common.

use async_trait::async_trait;
use rosnet_types::GraphName;
use rosnet_wire::TCPROS;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique id for a data connection.
pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Kind of registration held with the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Node,
    Publisher,
    Subscriber,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "i",
            Direction::Outbound => "o",
        }
    }
}

/// One live data connection, as reported by `getBusInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    /// Caller id or URI of the other side.
    pub peer: String,
    pub direction: Direction,
    /// Topic or service name.
    pub name: GraphName,
}

impl ConnectionInfo {
    /// `[id, destination, direction, transport, topic, connected]`.
    pub fn to_json(&self) -> Value {
        json!([
            self.id,
            self.peer,
            self.direction.as_str(),
            TCPROS,
            self.name.as_str(),
            true
        ])
    }
}

/// A named participant in the graph that owns sockets and tasks.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &GraphName;

    fn role(&self) -> Role;

    fn is_shutdown(&self) -> bool;

    /// Close every connection and stop every task. Idempotent.
    async fn shutdown(&self);

    async fn connections(&self) -> Vec<ConnectionInfo>;
}
