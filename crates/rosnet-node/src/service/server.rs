use super::ServiceException;
use crate::endpoint::{next_connection_id, ConnectionInfo, Direction, Endpoint, Role};
use crate::tcpros::reject;
use async_trait::async_trait;
use dashmap::DashMap;
use rosnet_types::{GraphName, Message, Service, ServiceDeclaration};
use rosnet_wire::frame::{read_frame, write_service_response};
use rosnet_wire::header::{fields, write_header};
use rosnet_wire::{wait_cancelled, ConnectionHeader, ServiceResponseFrame, WireError};
use std::any::Any;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Computes a response for each request.
pub trait ResponseBuilder<S: Service>: Send + Sync + 'static {
    fn build(&self, request: S::Request) -> Result<S::Response, ServiceException>;
}

impl<S, F> ResponseBuilder<S> for F
where
    S: Service,
    F: Fn(S::Request) -> Result<S::Response, ServiceException> + Send + Sync + 'static,
{
    fn build(&self, request: S::Request) -> Result<S::Response, ServiceException> {
        self(request)
    }
}

pub(crate) struct ServiceServerCore<S: Service> {
    declaration: ServiceDeclaration,
    caller_id: GraphName,
    uri: Url,
    builder: Box<dyn ResponseBuilder<S>>,
    /// Open sessions: connection id to client caller id.
    sessions: DashMap<u64, String>,
    shutdown_tx: watch::Sender<bool>,
}

impl<S: Service> ServiceServerCore<S> {
    pub(crate) fn new(
        caller_id: GraphName,
        declaration: ServiceDeclaration,
        uri: Url,
        builder: impl ResponseBuilder<S>,
    ) -> Self {
        Self {
            declaration,
            caller_id,
            uri,
            builder: Box::new(builder),
            sessions: DashMap::new(),
            shutdown_tx: watch::channel(false).0,
        }
    }

    fn own_header(&self) -> ConnectionHeader {
        ConnectionHeader::for_service(
            &self.caller_id,
            &self.declaration.name,
            &self.declaration.descriptor,
        )
    }

    /// Serve one client until it disconnects, or after one response when
    /// the session is not persistent.
    async fn serve(
        &self,
        mut stream: TcpStream,
        client: &str,
        persistent: bool,
    ) -> Result<(), WireError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            let frame = tokio::select! {
                biased;
                _ = wait_cancelled(&mut shutdown_rx) => break,
                frame = read_frame(&mut stream) => frame,
            };
            let payload = match frame {
                Ok(payload) => payload,
                Err(WireError::ConnectionClosed) => break,
                Err(e) => return Err(e),
            };
            let request = S::Request::deserialize(&payload)
                .map_err(|e| WireError::Decode(e.to_string()))?;
            let response = match self.builder.build(request) {
                Ok(response) => ServiceResponseFrame::success(response.serialize()),
                Err(e) => {
                    debug!(service = %self.declaration.name, client, error = %e, "Service request failed");
                    ServiceResponseFrame::error(&e.0)
                }
            };
            tokio::select! {
                biased;
                _ = wait_cancelled(&mut shutdown_rx) => break,
                written = write_service_response(&mut stream, &response) => written?,
            }
            if !persistent {
                break;
            }
        }
        let _ = stream.shutdown().await;
        Ok(())
    }
}

impl<S: Service> std::fmt::Debug for ServiceServerCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServerCore")
            .field("name", &self.declaration.name)
            .field("uri", &self.uri.as_str())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[async_trait]
impl<S: Service> Endpoint for ServiceServerCore<S> {
    fn name(&self) -> &GraphName {
        &self.declaration.name
    }

    fn role(&self) -> Role {
        Role::Service
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!(service = %self.declaration.name, "Service server shut down");
        }
    }

    async fn connections(&self) -> Vec<ConnectionInfo> {
        self.sessions
            .iter()
            .map(|entry| ConnectionInfo {
                id: *entry.key(),
                peer: entry.value().clone(),
                direction: Direction::Outbound,
                name: self.declaration.name.clone(),
            })
            .collect()
    }
}

/// Object-safe view of a `ServiceServerCore<S>`.
#[async_trait]
pub(crate) trait ServiceHandle: Endpoint {
    fn declaration(&self) -> &ServiceDeclaration;

    fn uri(&self) -> &Url;

    /// Finish the handshake of an inbound client and serve it.
    async fn accept(&self, stream: TcpStream, header: ConnectionHeader) -> Result<(), WireError>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<S: Service> ServiceHandle for ServiceServerCore<S> {
    fn declaration(&self) -> &ServiceDeclaration {
        &self.declaration
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    async fn accept(&self, mut stream: TcpStream, header: ConnectionHeader) -> Result<(), WireError> {
        let service = &self.declaration.name;
        if self.is_shutdown() {
            reject(&mut stream, format!("service [{service}] is shut down")).await;
            return Err(WireError::Cancelled);
        }
        if header.flag(fields::PROBE) {
            write_header(&mut stream, &self.own_header()).await?;
            let _ = stream.shutdown().await;
            debug!(service = %service, "Answered probe");
            return Ok(());
        }
        if let Err(e) = header.validate_service(&self.declaration.descriptor) {
            warn!(service = %service, error = %e, "Rejected service client");
            reject(&mut stream, e.to_string()).await;
            return Err(e);
        }
        write_header(&mut stream, &self.own_header()).await?;

        let client = header.get(fields::CALLER_ID).unwrap_or("unknown").to_string();
        let persistent = header.flag(fields::PERSISTENT);
        let id = next_connection_id();
        self.sessions.insert(id, client.clone());
        info!(service = %service, client = %client, persistent, "Service client connected");
        let result = self.serve(stream, &client, persistent).await;
        self.sessions.remove(&id);
        result
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Typed handle to a service provided by this node.
pub struct ServiceServer<S: Service> {
    core: Arc<ServiceServerCore<S>>,
}

impl<S: Service> Clone for ServiceServer<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: Service> ServiceServer<S> {
    pub(crate) fn from_core(core: Arc<ServiceServerCore<S>>) -> Self {
        Self { core }
    }

    pub fn name(&self) -> &GraphName {
        &self.core.declaration.name
    }

    /// The `rosrpc://host:port` endpoint clients connect to.
    pub fn uri(&self) -> &Url {
        &self.core.uri
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    /// Stop serving and close every open session, including one whose
    /// client stopped reading.
    pub async fn shutdown(&self) {
        self.core.shutdown().await;
    }

    pub fn is_same(&self, other: &ServiceServer<S>) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<S: Service> std::fmt::Debug for ServiceServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("name", &self.core.declaration.name)
            .field("uri", &self.core.uri.as_str())
            .finish()
    }
}
