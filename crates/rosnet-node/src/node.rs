//! The node facade: owns the servers, the endpoint tables and the master
//! registration agent, and hands out typed endpoints.

use crate::endpoint::{Endpoint, Role};
use crate::error::{NodeError, NodeResult};
use crate::registration::MasterRegistrationAgent;
use crate::service::{
    ResponseBuilder, ServiceClient, ServiceManager, ServiceServer, ServiceServerCore,
};
use crate::slave::{SlaveHandler, SlaveServer};
use crate::tcpros::NodeConnectionHandler;
use crate::topic::{Publisher, PublisherCore, Subscriber, SubscriberCore, TopicManager};
use rosnet_rpc::{MasterClient, RpcError};
use rosnet_types::config::NodeConfig;
use rosnet_types::topic::{host_port, rosrpc_uri};
use rosnet_types::{
    GraphName, Message, NameResolver, NodeIdentifier, PublisherIdentifier, Service,
    ServiceDeclaration, Timestamp, TopicDeclaration,
};
use rosnet_wire::{TcpRosServer, WireError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

struct NodeInner {
    name: GraphName,
    resolver: NameResolver,
    master_uri: Url,
    rpc_timeout: Duration,
    persistent_services: bool,
    slave: SlaveServer,
    tcpros: TcpRosServer,
    topics: Arc<TopicManager>,
    services: Arc<ServiceManager>,
    agent: MasterRegistrationAgent,
    shutting_down: AtomicBool,
    /// Flips to true once shutdown has finished.
    shutdown_tx: watch::Sender<bool>,
}

/// A participant in the graph. Cloning yields another handle to the same
/// node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Start the control and data servers and register with the master.
    ///
    /// Fails when the master cannot be reached.
    pub async fn start(config: NodeConfig) -> NodeResult<Self> {
        let name = GraphName::new(&config.name)?.to_global();
        let resolver = NameResolver::for_node(&name, config.remapping_table()?)?;
        let master_uri = config.master_url()?;
        let topics = Arc::new(TopicManager::new());
        let services = Arc::new(ServiceManager::new());

        let tcpros = TcpRosServer::start(
            resolve_address(&config.host, config.tcpros_port).await?,
            config.host.clone(),
            Arc::new(NodeConnectionHandler::new(
                Arc::clone(&topics),
                Arc::clone(&services),
            )),
        )
        .await?;

        let (requests_tx, mut requests_rx) = watch::channel(false);
        let handler = SlaveHandler::new(
            name.clone(),
            master_uri.clone(),
            Arc::clone(&topics),
            Arc::clone(&services),
            tcpros.advertise_address(),
            requests_tx,
        );
        let slave = SlaveServer::start(
            resolve_address(&config.host, config.rpc_port).await?,
            &config.host,
            handler,
        )
        .await?;

        let master = MasterClient::new(master_uri.clone(), name.clone(), config.rpc_timeout())?;
        let agent = MasterRegistrationAgent::new(master, slave.uri().clone());
        agent.register_node(&name).await?;

        let inner = Arc::new(NodeInner {
            name,
            resolver,
            master_uri,
            rpc_timeout: config.rpc_timeout(),
            persistent_services: config.persistent_services,
            slave,
            tcpros,
            topics,
            services,
            agent,
            shutting_down: AtomicBool::new(false),
            shutdown_tx: watch::channel(false).0,
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let requested = requests_rx.wait_for(|requested| *requested).await.is_ok();
            if requested {
                if let Some(inner) = weak.upgrade() {
                    Node { inner }.shutdown().await;
                }
            }
        });

        info!(
            node = %inner.name,
            uri = %inner.slave.uri(),
            tcpros = ?inner.tcpros.advertise_address(),
            "Node started"
        );
        Ok(Self { inner })
    }

    pub fn name(&self) -> &GraphName {
        &self.inner.name
    }

    /// Control URI of this node.
    pub fn uri(&self) -> &Url {
        self.inner.slave.uri()
    }

    /// Host and port peers use for topic and service connections.
    pub fn data_address(&self) -> (String, u16) {
        self.inner.tcpros.advertise_address()
    }

    pub fn master_uri(&self) -> &Url {
        &self.inner.master_uri
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.inner.resolver
    }

    /// Resolve `name` relative to this node.
    pub fn resolve_name(&self, name: &str) -> NodeResult<GraphName> {
        Ok(self.inner.resolver.resolve(name)?)
    }

    pub fn current_time(&self) -> Timestamp {
        Timestamp::now()
    }

    /// True when every registration has reached the master.
    pub fn is_registered(&self) -> bool {
        self.inner.agent.is_registered()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> NodeResult<()> {
        if self.is_shutdown() {
            Err(NodeError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub async fn create_publisher<M: Message>(&self, topic: &str) -> NodeResult<Publisher<M>> {
        self.publisher(topic, false).await
    }

    /// A publisher that sends its last message to every new subscriber.
    pub async fn create_latched_publisher<M: Message>(
        &self,
        topic: &str,
    ) -> NodeResult<Publisher<M>> {
        self.publisher(topic, true).await
    }

    async fn publisher<M: Message>(&self, topic: &str, latch: bool) -> NodeResult<Publisher<M>> {
        self.ensure_running()?;
        let declaration = TopicDeclaration::new(self.resolve_name(topic)?, M::descriptor());
        let (core, created) = self.inner.topics.publisher_or_insert(&declaration, || {
            PublisherCore::new(self.inner.name.clone(), declaration.clone(), latch)
        })?;
        if created {
            if let Err(e) = self.inner.agent.register_publisher(&declaration).await {
                self.inner.topics.remove_publisher(&declaration.name, &core);
                self.inner.agent.cancel(&declaration.name, Role::Publisher);
                core.shutdown().await;
                return Err(e);
            }
            info!(node = %self.inner.name, topic = %declaration.name, latch, "Publisher created");
        }
        Ok(Publisher::from_core(core))
    }

    /// Subscribe to `topic`, delivering each message to `listener`. A second
    /// subscription to the same topic shares the connections and adds its
    /// listener.
    pub async fn create_subscriber<M, F>(&self, topic: &str, listener: F) -> NodeResult<Subscriber<M>>
    where
        M: Message,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let declaration = TopicDeclaration::new(self.resolve_name(topic)?, M::descriptor());
        let (core, created) = self.inner.topics.subscriber_or_insert::<M>(&declaration, || {
            SubscriberCore::start(
                self.inner.name.clone(),
                declaration.clone(),
                self.inner.rpc_timeout,
            )
        })?;
        core.add_listener(listener);
        if created {
            match self.inner.agent.register_subscriber(&declaration).await {
                Ok(uris) => {
                    info!(
                        node = %self.inner.name,
                        topic = %declaration.name,
                        publishers = uris.len(),
                        "Subscriber created"
                    );
                    let publishers = uris
                        .into_iter()
                        .map(|uri| {
                            PublisherIdentifier::new(
                                NodeIdentifier::anonymous(uri),
                                declaration.clone(),
                            )
                        })
                        .collect();
                    core.update_publishers(publishers);
                }
                Err(e) => {
                    self.inner.topics.remove_subscriber(&declaration.name, &core);
                    self.inner.agent.cancel(&declaration.name, Role::Subscriber);
                    core.shutdown().await;
                    return Err(e);
                }
            }
        }
        Ok(Subscriber::from_core(core))
    }

    /// Provide service `name`, answering requests with `builder`. When this
    /// node already provides the service, the existing server is returned
    /// and `builder` is dropped.
    pub async fn create_service_server<S, B>(&self, name: &str, builder: B) -> NodeResult<ServiceServer<S>>
    where
        S: Service,
        B: ResponseBuilder<S>,
    {
        self.ensure_running()?;
        let declaration = ServiceDeclaration::new(self.resolve_name(name)?, S::descriptor());
        let (host, port) = self.inner.tcpros.advertise_address();
        let uri = rosrpc_uri(&host, port)?;
        let (core, created) = self.inner.services.server_or_insert::<S>(&declaration, || {
            ServiceServerCore::new(self.inner.name.clone(), declaration.clone(), uri.clone(), builder)
        })?;
        if created {
            if let Err(e) = self.inner.agent.register_service(&declaration.name, &uri).await {
                self.inner.services.remove(&declaration.name, &core);
                self.inner.agent.cancel(&declaration.name, Role::Service);
                core.shutdown().await;
                return Err(e);
            }
            info!(node = %self.inner.name, service = %declaration.name, uri = %uri, "Service created");
        }
        Ok(ServiceServer::from_core(core))
    }

    /// Connect to service `name`, persistent or not per the node's
    /// configuration.
    pub async fn create_service_client<S: Service>(&self, name: &str) -> NodeResult<ServiceClient<S>> {
        self.service_client(name, self.inner.persistent_services).await
    }

    pub async fn service_client<S: Service>(
        &self,
        name: &str,
        persistent: bool,
    ) -> NodeResult<ServiceClient<S>> {
        self.ensure_running()?;
        let name = self.resolve_name(name)?;
        let uri = match self.inner.agent.master().lookup_service(&name).await {
            Ok(uri) => uri,
            Err(RpcError::Remote { .. }) => return Err(NodeError::ServiceNotFound(name)),
            Err(e) => return Err(e.into()),
        };
        let (host, port) = host_port(&uri)?;
        let address = resolve_address(&host, port).await?;
        Ok(ServiceClient::connect(&self.inner.name, name, address, persistent).await?)
    }

    /// Unregister everything from the master, close every connection and
    /// stop both servers. Later calls return immediately.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(node = %inner.name, "Node shutting down");

        let publications: Vec<GraphName> = inner
            .topics
            .publications()
            .into_iter()
            .map(|declaration| declaration.name)
            .collect();
        let subscriptions: Vec<GraphName> = inner
            .topics
            .subscriptions()
            .into_iter()
            .map(|declaration| declaration.name)
            .collect();
        let services = inner.services.registrations();
        inner
            .agent
            .unregister_all(&publications, &subscriptions, &services)
            .await;

        inner.topics.shutdown_all().await;
        inner.services.shutdown_all().await;
        inner.tcpros.shutdown();
        inner.slave.shutdown();
        inner.shutdown_tx.send_replace(true);
        info!(node = %inner.name, "Node shut down");
    }

    /// Wait until the node has shut down, whether by [`shutdown`](Self::shutdown)
    /// or by a remote `shutdown` request.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.shutdown_tx.subscribe();
        if rx.wait_for(|done| *done).await.is_err() {
            warn!(node = %self.inner.name, "Shutdown signal lost");
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name)
            .field("uri", &self.inner.slave.uri().as_str())
            .finish()
    }
}

/// First socket address for `host:port`.
async fn resolve_address(host: &str, port: u16) -> NodeResult<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(WireError::from)?
        .next()
        .ok_or_else(|| {
            NodeError::Wire(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("cannot resolve {host}"),
            )))
        })
}
