use super::ServiceError;
use rosnet_types::{GraphName, Message, Service, ServiceDescriptor};
use rosnet_wire::frame::{read_service_response, write_frame};
use rosnet_wire::header::{fields, read_header, write_header};
use rosnet_wire::{ConnectionHeader, ServiceResponseFrame, WireError};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ResponseSlot = oneshot::Sender<Result<ServiceResponseFrame, WireError>>;

/// Calls waiting for a response, oldest first.
#[derive(Default)]
struct Pending {
    waiting: VecDeque<ResponseSlot>,
    closed: bool,
}

impl Pending {
    /// Mark closed and fail every waiting call.
    fn close(&mut self, error: impl Fn() -> WireError) {
        self.closed = true;
        for slot in self.waiting.drain(..) {
            let _ = slot.send(Err(error()));
        }
    }
}

/// One open persistent connection.
struct Session {
    writer: OwnedWriteHalf,
    pending: Arc<StdMutex<Pending>>,
    reader: JoinHandle<()>,
}

impl Session {
    fn is_open(&self) -> bool {
        !self.pending.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}

struct ClientInner {
    name: GraphName,
    address: SocketAddr,
    header: ConnectionHeader,
    descriptor: ServiceDescriptor,
    persistent: bool,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
}

/// Client for one service.
///
/// A persistent client keeps one connection and answers calls in the order
/// they were written. A transient client connects for every call.
pub struct ServiceClient<S: Service> {
    inner: Arc<ClientInner>,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> Clone for ServiceClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _service: PhantomData,
        }
    }
}

impl<S: Service> std::fmt::Debug for ServiceClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.inner.name)
            .field("address", &self.inner.address)
            .field("persistent", &self.inner.persistent)
            .finish()
    }
}

impl<S: Service> ServiceClient<S> {
    /// Connect to the service at `address`. A persistent client performs
    /// its handshake here, so a type mismatch fails immediately.
    pub async fn connect(
        caller_id: &GraphName,
        name: GraphName,
        address: SocketAddr,
        persistent: bool,
    ) -> Result<Self, ServiceError> {
        let descriptor = S::descriptor();
        let header = ConnectionHeader::for_service(caller_id, &name, &descriptor)
            .with(fields::PERSISTENT, if persistent { "1" } else { "0" });
        let inner = Arc::new(ClientInner {
            name,
            address,
            header,
            descriptor,
            persistent,
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        if persistent {
            let session = inner.open_session().await?;
            *inner.session.lock().await = Some(session);
        }
        info!(service = %inner.name, address = %address, persistent, "Service client ready");
        Ok(Self {
            inner,
            _service: PhantomData,
        })
    }

    pub fn name(&self) -> &GraphName {
        &self.inner.name
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.persistent
    }

    /// Send `request` and wait for its response.
    pub async fn call(&self, request: &S::Request) -> Result<S::Response, ServiceError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ServiceError::Closed);
        }
        let payload = request.serialize();
        let frame = if self.inner.persistent {
            self.inner.call_persistent(&payload).await?
        } else {
            self.inner.call_transient(&payload).await?
        };
        if !frame.ok {
            return Err(ServiceError::Application(frame.error_message()));
        }
        Ok(S::Response::deserialize(&frame.payload)?)
    }

    /// Close the connection. Calls still waiting fail.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut session) = self.inner.session.lock().await.take() {
            session
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .close(|| WireError::Cancelled);
            session.reader.abort();
            let _ = session.writer.shutdown().await;
        }
        debug!(service = %self.inner.name, "Service client closed");
    }
}

impl ClientInner {
    /// Connect and exchange headers.
    async fn handshake(&self) -> Result<TcpStream, WireError> {
        let mut stream = TcpStream::connect(self.address).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(service = %self.name, error = %e, "Cannot set TCP_NODELAY");
        }
        write_header(&mut stream, &self.header).await?;
        let reply = read_header(&mut stream).await?;
        reply.validate_service(&self.descriptor)?;
        Ok(stream)
    }

    async fn open_session(&self) -> Result<Session, WireError> {
        let stream = self.handshake().await?;
        let (reader, writer) = stream.into_split();
        let pending = Arc::new(StdMutex::new(Pending::default()));
        let reader = tokio::spawn(read_responses(
            self.name.clone(),
            reader,
            Arc::clone(&pending),
        ));
        Ok(Session {
            writer,
            pending,
            reader,
        })
    }

    async fn call_persistent(&self, payload: &[u8]) -> Result<ServiceResponseFrame, ServiceError> {
        let response = {
            let mut guard = self.session.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(ServiceError::Closed);
            }
            if !guard.as_ref().is_some_and(Session::is_open) {
                debug!(service = %self.name, "Reopening service session");
                *guard = Some(self.open_session().await?);
            }
            let Some(session) = guard.as_mut() else {
                return Err(ServiceError::Closed);
            };

            let (tx, rx) = oneshot::channel();
            {
                let mut pending = session.pending.lock().unwrap_or_else(|e| e.into_inner());
                if pending.closed {
                    return Err(WireError::ConnectionClosed.into());
                }
                pending.waiting.push_back(tx);
            }
            if let Err(e) = write_frame(&mut session.writer, payload).await {
                session
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .close(|| WireError::ConnectionClosed);
                return Err(e.into());
            }
            rx
        };
        match response.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Closed),
        }
    }

    async fn call_transient(&self, payload: &[u8]) -> Result<ServiceResponseFrame, ServiceError> {
        let mut stream = self.handshake().await?;
        write_frame(&mut stream, payload).await?;
        let response = read_service_response(&mut stream).await?;
        let _ = stream.shutdown().await;
        Ok(response)
    }
}

/// Hand each response to the oldest waiting call.
async fn read_responses(
    service: GraphName,
    mut reader: OwnedReadHalf,
    pending: Arc<StdMutex<Pending>>,
) {
    loop {
        let result = read_service_response(&mut reader).await;
        let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(frame) => match pending.waiting.pop_front() {
                Some(slot) => {
                    let _ = slot.send(Ok(frame));
                }
                None => {
                    warn!(service = %service, "Unexpected service response");
                    pending.close(|| WireError::ConnectionClosed);
                    return;
                }
            },
            Err(e) => {
                if !e.is_disconnect() {
                    warn!(service = %service, error = %e, "Service session failed");
                }
                pending.close(|| WireError::ConnectionClosed);
                return;
            }
        }
    }
}
