use crate::endpoint::{ConnectionInfo, Direction, Endpoint, Role};
use crate::error::{NodeError, NodeResult};
use crate::tcpros::reject;
use async_trait::async_trait;
use bytes::Bytes;
use rosnet_types::{GraphName, Message, MessageDescriptor, TopicDeclaration};
use rosnet_wire::header::{fields, write_header};
use rosnet_wire::{ConnectionHeader, OutgoingQueue, WireError};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Untyped publisher state shared by every `Publisher<M>` handle of a topic.
pub(crate) struct PublisherCore {
    declaration: TopicDeclaration,
    caller_id: GraphName,
    latch: bool,
    queue: OutgoingQueue,
    shutdown: AtomicBool,
}

impl PublisherCore {
    pub(crate) fn new(caller_id: GraphName, declaration: TopicDeclaration, latch: bool) -> Self {
        let queue = OutgoingQueue::start(declaration.name.as_str(), latch);
        Self {
            declaration,
            caller_id,
            latch,
            queue,
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn declaration(&self) -> &TopicDeclaration {
        &self.declaration
    }

    pub(crate) fn publish_bytes(&self, payload: Bytes) -> Result<(), WireError> {
        if self.is_shutdown() {
            return Err(WireError::Cancelled);
        }
        self.queue.send(payload)
    }

    /// Finish the handshake of an inbound subscriber and attach it.
    pub(crate) async fn accept(
        &self,
        mut stream: TcpStream,
        header: ConnectionHeader,
    ) -> Result<(), WireError> {
        let topic = &self.declaration.name;
        if self.is_shutdown() {
            reject(&mut stream, format!("publisher of [{topic}] is shut down")).await;
            return Err(WireError::Cancelled);
        }
        if let Err(e) = header.validate_topic(&self.declaration.descriptor) {
            warn!(topic = %topic, error = %e, "Rejected subscriber");
            reject(&mut stream, e.to_string()).await;
            return Err(e);
        }

        let subscriber = header.get(fields::CALLER_ID).unwrap_or("unknown").to_string();
        if header.flag(fields::TCP_NODELAY) {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(topic = %topic, error = %e, "Cannot set TCP_NODELAY");
            }
        }
        let reply = ConnectionHeader::for_topic(&self.caller_id, &self.declaration)
            .with(fields::LATCHING, if self.latch { "1" } else { "0" });
        write_header(&mut stream, &reply).await?;
        self.queue.attach(subscriber.clone(), stream)?;
        info!(topic = %topic, subscriber = %subscriber, "Subscriber connected");
        Ok(())
    }

    pub(crate) fn number_of_subscribers(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for PublisherCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherCore")
            .field("topic", &self.declaration.name)
            .field("type", &self.declaration.descriptor.type_name)
            .field("latch", &self.latch)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[async_trait]
impl Endpoint for PublisherCore {
    fn name(&self) -> &GraphName {
        &self.declaration.name
    }

    fn role(&self) -> Role {
        Role::Publisher
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.cancel().await;
        debug!(topic = %self.declaration.name, "Publisher shut down");
    }

    async fn connections(&self) -> Vec<ConnectionInfo> {
        self.queue
            .peers()
            .into_iter()
            .map(|(id, peer)| ConnectionInfo {
                id,
                peer,
                direction: Direction::Outbound,
                name: self.declaration.name.clone(),
            })
            .collect()
    }
}

/// Typed handle to a topic publisher.
///
/// Every handle created for the same topic on the same node shares one
/// underlying publisher.
pub struct Publisher<M> {
    core: Arc<PublisherCore>,
    _message: PhantomData<fn(M)>,
}

impl<M> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _message: PhantomData,
        }
    }
}

impl<M: Message> Publisher<M> {
    pub(crate) fn from_core(core: Arc<PublisherCore>) -> Self {
        Self {
            core,
            _message: PhantomData,
        }
    }

    /// Enqueue `message` for every connected subscriber. Never blocks.
    pub fn publish(&self, message: &M) -> NodeResult<()> {
        self.core
            .publish_bytes(Bytes::from(message.serialize()))
            .map_err(|e| match e {
                WireError::Cancelled => NodeError::Shutdown,
                other => NodeError::Wire(other),
            })
    }

    pub fn topic(&self) -> &GraphName {
        &self.core.declaration.name
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.core.declaration.descriptor
    }

    pub fn is_latched(&self) -> bool {
        self.core.latch
    }

    pub fn number_of_subscribers(&self) -> usize {
        self.core.number_of_subscribers()
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    /// Close every subscriber connection. The node still lists the topic
    /// until it shuts down.
    pub async fn shutdown(&self) {
        self.core.shutdown().await;
    }

    /// Whether both handles share the same underlying publisher.
    pub fn is_same(&self, other: &Publisher<M>) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<M> std::fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.core.declaration.name)
            .field("latch", &self.core.latch)
            .finish()
    }
}
