use crate::endpoint::{next_connection_id, ConnectionInfo, Direction, Endpoint, Role};
use crate::error::{NodeError, NodeResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rosnet_rpc::SlaveClient;
use rosnet_types::{GraphName, Message, PublisherIdentifier, TopicDeclaration};
use rosnet_wire::header::{fields, read_header, write_header};
use rosnet_wire::{wait_cancelled, ConnectionHeader, IncomingQueue, WireError, TCPROS};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Handle returned by [`Subscriber::add_message_listener`].
pub type ListenerId = u64;

/// Messages waiting for the listeners before connections stop reading.
const DISPATCH_BUFFER: usize = 256;

type Listener<M> = Arc<dyn Fn(&M) + Send + Sync>;
type ListenerList<M> = Arc<RwLock<Vec<(ListenerId, Listener<M>)>>>;

/// Decides whether a dropped publisher connection is re-established.
pub trait ReconnectPolicy: Send + Sync + 'static {
    /// Delay before reconnecting to `publisher`, or `None` to give up.
    fn reconnect_delay(&self, publisher: &PublisherIdentifier) -> Option<Duration>;
}

/// Never reconnects; a new `publisherUpdate` is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReconnect;

impl ReconnectPolicy for NeverReconnect {
    fn reconnect_delay(&self, _publisher: &PublisherIdentifier) -> Option<Duration> {
        None
    }
}

struct PublisherConnection {
    id: u64,
    publisher: PublisherIdentifier,
    peer: String,
}

/// Typed subscriber state. One per topic per node.
pub(crate) struct SubscriberCore<M: Message> {
    declaration: TopicDeclaration,
    caller_id: GraphName,
    rpc_timeout: Duration,
    listeners: ListenerList<M>,
    next_listener: AtomicU64,
    /// Live connections keyed by the publisher node's control URI.
    connections: DashMap<Url, PublisherConnection>,
    /// Negotiations in flight, keyed the same way.
    connecting: DashMap<Url, JoinHandle<()>>,
    reconnect: RwLock<Arc<dyn ReconnectPolicy>>,
    dispatch_tx: mpsc::Sender<M>,
    shutdown_tx: watch::Sender<bool>,
}

impl<M: Message> SubscriberCore<M> {
    /// Create the subscriber and start its dispatcher.
    pub(crate) fn start(
        caller_id: GraphName,
        declaration: TopicDeclaration,
        rpc_timeout: Duration,
    ) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listeners: ListenerList<M> = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(dispatch_loop(
            declaration.name.clone(),
            dispatch_rx,
            Arc::clone(&listeners),
            shutdown_rx,
        ));
        Arc::new(Self {
            declaration,
            caller_id,
            rpc_timeout,
            listeners,
            next_listener: AtomicU64::new(1),
            connections: DashMap::new(),
            connecting: DashMap::new(),
            reconnect: RwLock::new(Arc::new(NeverReconnect)),
            dispatch_tx,
            shutdown_tx,
        })
    }

    pub(crate) fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn set_reconnect_policy(&self, policy: Arc<dyn ReconnectPolicy>) {
        *self.reconnect.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    fn reconnect_policy(&self) -> Arc<dyn ReconnectPolicy> {
        Arc::clone(&self.reconnect.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn is_known(&self, uri: &Url) -> bool {
        self.connections.contains_key(uri) || self.connecting.contains_key(uri)
    }

    /// Connect to `publisher` at its data `address`. Errors are returned,
    /// never retried. A publisher that is already connected is refused.
    pub(crate) async fn add_publisher(
        self: &Arc<Self>,
        publisher: PublisherIdentifier,
        address: SocketAddr,
    ) -> NodeResult<()> {
        if self.is_shutdown() {
            return Err(NodeError::Shutdown);
        }
        let uri = publisher.node.uri().clone();
        if self.connections.contains_key(&uri) {
            return Err(NodeError::AlreadyConnected(uri));
        }
        let topic = self.declaration.name.clone();
        let mut stream = TcpStream::connect(address).await.map_err(WireError::from)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(topic = %topic, error = %e, "Cannot set TCP_NODELAY");
        }
        let header = ConnectionHeader::for_topic(&self.caller_id, &self.declaration)
            .with(fields::TCP_NODELAY, "1");
        write_header(&mut stream, &header).await?;
        let reply = read_header(&mut stream).await?;
        reply.validate_topic(&self.declaration.descriptor)?;

        let peer = reply
            .get(fields::CALLER_ID)
            .map(String::from)
            .unwrap_or_else(|| uri.to_string());
        let queue = IncomingQueue::start(topic.as_str(), stream, |bytes| {
            M::deserialize(&bytes).map_err(|e| WireError::Decode(e.to_string()))
        });

        let id = next_connection_id();
        match self.connections.entry(uri.clone()) {
            Entry::Occupied(_) => {
                queue.cancel();
                return Err(NodeError::AlreadyConnected(uri));
            }
            Entry::Vacant(slot) => {
                slot.insert(PublisherConnection {
                    id,
                    publisher,
                    peer: peer.clone(),
                });
            }
        }
        tokio::spawn(pump(
            Arc::downgrade(self),
            uri,
            id,
            queue,
            self.dispatch_tx.clone(),
            self.shutdown_tx.subscribe(),
        ));
        info!(topic = %topic, publisher = %peer, "Connected to publisher");
        Ok(())
    }

    /// Start negotiating with every publisher not yet connected or being
    /// connected. Returns immediately.
    pub(crate) fn update_publishers(self: &Arc<Self>, publishers: Vec<PublisherIdentifier>) {
        for publisher in publishers {
            self.connect_in_background(publisher);
        }
    }

    fn connect_in_background(self: &Arc<Self>, publisher: PublisherIdentifier) {
        if self.is_shutdown() {
            return;
        }
        let uri = publisher.node.uri().clone();
        if self.connections.contains_key(&uri) {
            return;
        }
        let Entry::Vacant(slot) = self.connecting.entry(uri.clone()) else {
            return;
        };
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = core.negotiate(publisher).await {
                warn!(
                    topic = %core.declaration.name,
                    publisher = %uri,
                    error = %e,
                    "Cannot connect to publisher"
                );
            }
            core.connecting.remove(&uri);
        });
        slot.insert(handle);
    }

    /// `requestTopic` on the publisher node, then connect.
    async fn negotiate(self: &Arc<Self>, publisher: PublisherIdentifier) -> NodeResult<()> {
        let slave = SlaveClient::new(
            publisher.node.uri().clone(),
            self.caller_id.clone(),
            self.rpc_timeout,
        )?;
        let protocol = slave
            .request_topic(&self.declaration.name, &[TCPROS])
            .await?;
        if protocol.name != TCPROS {
            return Err(NodeError::UnsupportedProtocol(protocol.name));
        }
        let address = tokio::net::lookup_host((protocol.host.as_str(), protocol.port))
            .await
            .map_err(WireError::from)?
            .next()
            .ok_or_else(|| {
                NodeError::Wire(WireError::HandshakeFailed(format!(
                    "cannot resolve {}:{}",
                    protocol.host, protocol.port
                )))
            })?;
        self.add_publisher(publisher, address).await
    }

    /// Called by a pump when its connection ends.
    fn connection_lost(self: &Arc<Self>, uri: &Url, id: u64) {
        let Some((_, connection)) = self.connections.remove_if(uri, |_, c| c.id == id) else {
            return;
        };
        if self.is_shutdown() {
            return;
        }
        info!(
            topic = %self.declaration.name,
            publisher = %connection.peer,
            "Publisher connection closed"
        );
        if let Some(delay) = self.reconnect_policy().reconnect_delay(&connection.publisher) {
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(core) = weak.upgrade() {
                    core.connect_in_background(connection.publisher);
                }
            });
        }
    }

    fn number_of_publishers(&self) -> usize {
        self.connections.len()
    }
}

#[async_trait]
impl<M: Message> Endpoint for SubscriberCore<M> {
    fn name(&self) -> &GraphName {
        &self.declaration.name
    }

    fn role(&self) -> Role {
        Role::Subscriber
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        for entry in self.connecting.iter() {
            entry.value().abort();
        }
        self.connecting.clear();
        self.connections.clear();
        debug!(topic = %self.declaration.name, "Subscriber shut down");
    }

    async fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| ConnectionInfo {
                id: entry.id,
                peer: entry.peer.clone(),
                direction: Direction::Inbound,
                name: self.declaration.name.clone(),
            })
            .collect()
    }
}

impl<M: Message> std::fmt::Debug for SubscriberCore<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberCore")
            .field("topic", &self.declaration.name)
            .field("type", &self.declaration.descriptor.type_name)
            .field("publishers", &self.connections.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Object-safe view of a `SubscriberCore<M>` for the topic table and the
/// control server.
pub(crate) trait SubscriberHandle: Endpoint {
    fn declaration(&self) -> &TopicDeclaration;

    fn on_publisher_update(self: Arc<Self>, publishers: Vec<PublisherIdentifier>);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Message> SubscriberHandle for SubscriberCore<M> {
    fn declaration(&self) -> &TopicDeclaration {
        &self.declaration
    }

    fn on_publisher_update(self: Arc<Self>, publishers: Vec<PublisherIdentifier>) {
        self.update_publishers(publishers);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Move messages from one connection to the subscriber's dispatcher.
async fn pump<M: Message>(
    core: Weak<SubscriberCore<M>>,
    uri: Url,
    id: u64,
    mut queue: IncomingQueue<M>,
    dispatch_tx: mpsc::Sender<M>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => break,
            next = queue.take() => next,
        };
        match next {
            Ok(message) => {
                // waits while the dispatcher is full, which stops reading
                let delivered = tokio::select! {
                    biased;
                    _ = wait_cancelled(&mut shutdown_rx) => false,
                    sent = dispatch_tx.send(message) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Err(e) => {
                if !e.is_disconnect() {
                    warn!(publisher = %uri, error = %e, "Publisher connection failed");
                }
                break;
            }
        }
    }
    queue.cancel();
    if let Some(core) = core.upgrade() {
        core.connection_lost(&uri, id);
    }
}

/// Deliver each message to a snapshot of the listeners, one at a time.
async fn dispatch_loop<M: Message>(
    topic: GraphName,
    mut rx: mpsc::Receiver<M>,
    listeners: ListenerList<M>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => break,
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };
        let snapshot: Vec<Listener<M>> = listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(&message);
        }
    }
    debug!(topic = %topic, "Subscriber dispatcher stopped");
}

/// Typed handle to a topic subscription.
pub struct Subscriber<M: Message> {
    core: Arc<SubscriberCore<M>>,
}

impl<M: Message> Clone for Subscriber<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<M: Message> Subscriber<M> {
    pub(crate) fn from_core(core: Arc<SubscriberCore<M>>) -> Self {
        Self { core }
    }

    pub fn topic(&self) -> &GraphName {
        &self.core.declaration.name
    }

    /// Register a callback run on the dispatcher task for every message.
    pub fn add_message_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.core.add_listener(listener)
    }

    /// Returns whether the listener was registered. Connections stay open
    /// when the last listener is removed.
    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.core.remove_listener(id)
    }

    /// Connect directly to a publisher's data endpoint.
    pub async fn add_publisher(
        &self,
        publisher: PublisherIdentifier,
        address: SocketAddr,
    ) -> NodeResult<()> {
        self.core.add_publisher(publisher, address).await
    }

    /// Negotiate with every publisher not already connected, in the
    /// background.
    pub fn update_publishers(&self, publishers: Vec<PublisherIdentifier>) {
        self.core.update_publishers(publishers);
    }

    pub fn number_of_publishers(&self) -> usize {
        self.core.number_of_publishers()
    }

    /// Whether a connection to, or negotiation with, the publisher node at
    /// `uri` exists.
    pub fn is_connected_to(&self, uri: &Url) -> bool {
        self.core.is_known(uri)
    }

    pub fn set_reconnect_policy(&self, policy: Arc<dyn ReconnectPolicy>) {
        self.core.set_reconnect_policy(policy);
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    pub async fn shutdown(&self) {
        self.core.shutdown().await;
    }

    /// Whether both handles share the same underlying subscriber.
    pub fn is_same(&self, other: &Subscriber<M>) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<M: Message> std::fmt::Debug for Subscriber<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.core.declaration.name)
            .field("publishers", &self.core.connections.len())
            .finish()
    }
}
