//! Routes inbound data connections to the publisher or service they name.

use crate::service::ServiceManager;
use crate::topic::TopicManager;
use async_trait::async_trait;
use rosnet_types::GraphName;
use rosnet_wire::header::{fields, write_header};
use rosnet_wire::{ConnectionHandler, ConnectionHeader, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Send an error header and close.
pub(crate) async fn reject(stream: &mut TcpStream, reason: String) {
    let _ = write_header(stream, &ConnectionHeader::error_reply(reason)).await;
    let _ = stream.shutdown().await;
}

pub(crate) struct NodeConnectionHandler {
    topics: Arc<TopicManager>,
    services: Arc<ServiceManager>,
}

impl NodeConnectionHandler {
    pub(crate) fn new(topics: Arc<TopicManager>, services: Arc<ServiceManager>) -> Self {
        Self { topics, services }
    }
}

#[async_trait]
impl ConnectionHandler for NodeConnectionHandler {
    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        header: ConnectionHeader,
    ) -> Result<(), WireError> {
        if let Some(topic) = header.get(fields::TOPIC).map(String::from) {
            let publisher = GraphName::new(&topic)
                .ok()
                .and_then(|name| self.topics.publisher(&name));
            return match publisher {
                Some(publisher) => publisher.accept(stream, header).await,
                None => {
                    debug!(peer = %peer_addr, topic = %topic, "Connection for unknown topic");
                    let reason = format!("no publisher for topic [{topic}]");
                    reject(&mut stream, reason.clone()).await;
                    Err(WireError::HandshakeFailed(reason))
                }
            };
        }
        if let Some(service) = header.get(fields::SERVICE).map(String::from) {
            let server = GraphName::new(&service)
                .ok()
                .and_then(|name| self.services.server(&name));
            return match server {
                Some(server) => server.accept(stream, header).await,
                None => {
                    debug!(peer = %peer_addr, service = %service, "Connection for unknown service");
                    let reason = format!("no provider for service [{service}]");
                    reject(&mut stream, reason.clone()).await;
                    Err(WireError::HandshakeFailed(reason))
                }
            };
        }
        let reason = "header names neither a topic nor a service".to_string();
        reject(&mut stream, reason.clone()).await;
        Err(WireError::HandshakeFailed(reason))
    }
}
