//! The node's control endpoint, called by the master and by peer nodes.

use crate::endpoint::Endpoint;
use crate::service::ServiceManager;
use crate::topic::TopicManager;
use async_trait::async_trait;
use rosnet_rpc::protocol::{methods, param_array, param_str, ProtocolDescription};
use rosnet_rpc::{Response, RpcError, RpcFault, RpcHandler, RpcServer};
use rosnet_types::topic::parse_uri;
use rosnet_types::{GraphName, NodeIdentifier, PublisherIdentifier, TopicDeclaration};
use rosnet_wire::TCPROS;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// A running slave control endpoint.
pub struct SlaveServer {
    rpc: RpcServer,
}

impl SlaveServer {
    pub(crate) async fn start(
        bind_addr: SocketAddr,
        advertise_host: &str,
        handler: SlaveHandler,
    ) -> Result<Self, RpcError> {
        let rpc = RpcServer::start(bind_addr, advertise_host, Arc::new(handler)).await?;
        Ok(Self { rpc })
    }

    pub fn uri(&self) -> &Url {
        self.rpc.uri()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    pub fn shutdown(&self) {
        self.rpc.shutdown();
    }
}

pub(crate) struct SlaveHandler {
    node_name: GraphName,
    master_uri: Url,
    topics: Arc<TopicManager>,
    services: Arc<ServiceManager>,
    /// Where subscribers should connect for TCPROS.
    tcpros_address: (String, u16),
    /// Set when a remote `shutdown` arrives.
    shutdown_requests: watch::Sender<bool>,
}

impl SlaveHandler {
    pub(crate) fn new(
        node_name: GraphName,
        master_uri: Url,
        topics: Arc<TopicManager>,
        services: Arc<ServiceManager>,
        tcpros_address: (String, u16),
        shutdown_requests: watch::Sender<bool>,
    ) -> Self {
        Self {
            node_name,
            master_uri,
            topics,
            services,
            tcpros_address,
            shutdown_requests,
        }
    }

    fn publisher_update(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = param_str(params, 0, "caller_id")?;
        let topic = topic_param(params, 1)?;
        let uris = param_array(params, 2, "publishers")?;

        let Some(subscriber) = self.topics.subscriber(&topic) else {
            debug!(topic = %topic, caller, "Publisher update for unknown subscription");
            return Ok(Response::success(format!("not subscribed to [{topic}]"), json!(0)));
        };
        let declaration = subscriber.declaration().clone();
        let publishers: Vec<PublisherIdentifier> = uris
            .iter()
            .filter_map(|value| {
                let raw = value.as_str()?;
                match parse_uri(raw) {
                    Ok(uri) => Some(PublisherIdentifier::new(
                        NodeIdentifier::anonymous(uri),
                        declaration.clone(),
                    )),
                    Err(e) => {
                        warn!(topic = %topic, uri = raw, error = %e, "Ignoring bad publisher URI");
                        None
                    }
                }
            })
            .collect();
        debug!(topic = %topic, publishers = publishers.len(), "Publisher update");
        subscriber.on_publisher_update(publishers);
        Ok(Response::success("publisher update received", json!(0)))
    }

    fn request_topic(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let topic = topic_param(params, 1)?;
        let protocols = param_array(params, 2, "protocols")?;

        if self.topics.publisher(&topic).is_none() {
            return Ok(Response::error(
                format!("not a publisher of [{topic}]"),
                json!([]),
            ));
        }
        let wants_tcpros = protocols.iter().any(|protocol| {
            let name = match protocol {
                Value::Array(items) => items.first().and_then(Value::as_str),
                other => other.as_str(),
            };
            name == Some(TCPROS)
        });
        if !wants_tcpros {
            return Ok(Response::error("no supported protocol", json!([])));
        }
        let (host, port) = &self.tcpros_address;
        Ok(Response::success(
            format!("ready on {host}:{port}"),
            ProtocolDescription::new(TCPROS, host.as_str(), *port).to_json(),
        ))
    }

    async fn bus_info(&self) -> Value {
        let mut info = Vec::new();
        for publisher in self.topics.publishers() {
            info.extend(publisher.connections().await);
        }
        for subscriber in self.topics.subscribers() {
            info.extend(subscriber.connections().await);
        }
        for server in self.services.servers() {
            info.extend(server.connections().await);
        }
        json!(info.iter().map(|c| c.to_json()).collect::<Vec<_>>())
    }
}

#[async_trait]
impl RpcHandler for SlaveHandler {
    async fn handle(&self, method: &str, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        match method {
            methods::PUBLISHER_UPDATE => self.publisher_update(params),
            methods::REQUEST_TOPIC => self.request_topic(params),
            methods::GET_PID => Ok(Response::success("", json!(std::process::id()))),
            methods::GET_BUS_INFO => Ok(Response::success("bus info", self.bus_info().await)),
            methods::GET_MASTER_URI => Ok(Response::success("", json!(self.master_uri.as_str()))),
            methods::GET_PUBLICATIONS => Ok(Response::success(
                "publications",
                topic_types(self.topics.publications()),
            )),
            methods::GET_SUBSCRIPTIONS => Ok(Response::success(
                "subscriptions",
                topic_types(self.topics.subscriptions()),
            )),
            methods::SHUTDOWN => {
                let caller = param_str(params, 0, "caller_id")?;
                let reason = params.get(1).and_then(Value::as_str).unwrap_or_default();
                info!(node = %self.node_name, caller, reason, "Shutdown requested");
                self.shutdown_requests.send_replace(true);
                Ok(Response::success("shutdown", json!(0)))
            }
            other => Err(RpcFault::MethodNotFound(other.to_string())),
        }
    }
}

fn topic_param(params: &[Value], index: usize) -> Result<GraphName, RpcFault> {
    let raw = param_str(params, index, "topic")?;
    GraphName::new(raw)
        .map(|name| name.to_global())
        .map_err(|e| RpcFault::InvalidParams(e.to_string()))
}

fn topic_types(declarations: Vec<TopicDeclaration>) -> Value {
    json!(declarations
        .iter()
        .map(|d| json!([d.name.as_str(), d.descriptor.type_name]))
        .collect::<Vec<_>>())
}
