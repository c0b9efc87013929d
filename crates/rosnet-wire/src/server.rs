//! Per-node TCPROS accept server.
//!
//! One listener serves every publisher and service of a node: each inbound
//! connection sends its header first, and the handler routes it by the
//! header's `topic` or `service` field.

use crate::error::WireError;
use crate::header::{read_header, ConnectionHeader};
use crate::queue::wait_cancelled;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// How long a new connection may take to send its header.
const HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives connections whose header has been read.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Take ownership of an inbound connection. The handler replies with
    /// its own header (or an error header) and keeps or closes the stream.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        header: ConnectionHeader,
    ) -> Result<(), WireError>;
}

/// A running accept loop.
pub struct TcpRosServer {
    local_addr: SocketAddr,
    advertise_host: String,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpRosServer {
    /// Bind `bind_addr` and start accepting. Peers are told to connect to
    /// `advertise_host` on the bound port.
    pub async fn start(
        bind_addr: SocketAddr,
        advertise_host: impl Into<String>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self, WireError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "TCPROS server listening");
        tokio::spawn(accept_loop(listener, handler, shutdown_rx));

        Ok(Self {
            local_addr,
            advertise_host: advertise_host.into(),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Host and port peers should connect to.
    pub fn advertise_address(&self) -> (String, u16) {
        (self.advertise_host.clone(), self.local_addr.port())
    }

    /// Stop accepting. Established connections belong to their endpoints
    /// and are closed by them.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!(addr = %self.local_addr, "TCPROS server stopped");
        }
    }
}

impl Drop for TcpRosServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "TCPROS: accepted connection");
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_inbound(stream, addr, &*handler).await {
                        debug!(peer = %addr, error = %e, "TCPROS: inbound connection ended");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "TCPROS: accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_inbound(
    mut stream: TcpStream,
    addr: SocketAddr,
    handler: &dyn ConnectionHandler,
) -> Result<(), WireError> {
    let header = tokio::time::timeout(HEADER_TIMEOUT, read_header(&mut stream))
        .await
        .map_err(|_| WireError::HandshakeFailed("timed out waiting for header".to_string()))??;
    handler.handle_connection(stream, addr, header).await
}
