//! The master's control endpoint.

use crate::registry::{MasterRegistry, PublisherUpdate};
use crate::MASTER_CALLER_ID;
use async_trait::async_trait;
use rosnet_rpc::protocol::{methods, param_str};
use rosnet_rpc::{Response, RpcError, RpcFault, RpcHandler, RpcServer, SlaveClient};
use rosnet_types::config::MasterConfig;
use rosnet_types::topic::parse_uri;
use rosnet_types::{GraphName, NameResolver, NodeIdentifier, ServiceIdentifier};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for `publisherUpdate` pushes.
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// A running master.
pub struct MasterServer {
    rpc: RpcServer,
    registry: Arc<MasterRegistry>,
}

impl MasterServer {
    /// Start a master listening on `config.host:config.port`.
    pub async fn start(config: &MasterConfig) -> Result<Self, RpcError> {
        let bind_addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| {
                RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("cannot resolve {}", config.host),
                ))
            })?;
        Self::start_on(bind_addr, &config.host).await
    }

    /// Start a master bound to `bind_addr`, advertising `advertise_host`.
    pub async fn start_on(bind_addr: SocketAddr, advertise_host: &str) -> Result<Self, RpcError> {
        let registry = Arc::new(MasterRegistry::new());
        let handler = Arc::new(MasterHandler {
            registry: Arc::clone(&registry),
            uri: OnceLock::new(),
        });
        let rpc = RpcServer::start(bind_addr, advertise_host, handler.clone()).await?;
        let _ = handler.uri.set(rpc.uri().clone());
        info!(uri = %rpc.uri(), "Master started");
        Ok(Self { rpc, registry })
    }

    pub fn uri(&self) -> &Url {
        self.rpc.uri()
    }

    pub fn registry(&self) -> &Arc<MasterRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) {
        info!(uri = %self.rpc.uri(), "Master shutting down");
        self.rpc.shutdown();
    }
}

struct MasterHandler {
    registry: Arc<MasterRegistry>,
    uri: OnceLock<Url>,
}

impl MasterHandler {
    /// Tell every subscriber in `update` about the topic's publishers.
    fn push_publisher_update(&self, update: PublisherUpdate) {
        let Ok(caller_id) = GraphName::new(MASTER_CALLER_ID) else {
            return;
        };
        for subscriber in update.subscribers {
            let caller_id = caller_id.clone();
            let topic = update.topic.clone();
            let publishers = update.publishers.clone();
            tokio::spawn(async move {
                let result = match SlaveClient::new(subscriber.clone(), caller_id, PUSH_TIMEOUT) {
                    Ok(client) => client.publisher_update(&topic, &publishers).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => debug!(topic = %topic, subscriber = %subscriber, "Pushed publisher update"),
                    Err(e) => warn!(
                        topic = %topic,
                        subscriber = %subscriber,
                        error = %e,
                        "Publisher update push failed"
                    ),
                }
            });
        }
    }

    /// A node that came back under a new URI: tell subscribers of its
    /// topics where it went.
    fn refresh_node(&self, node: &NodeIdentifier) {
        for update in self.registry.refresh_node(node) {
            self.push_publisher_update(update);
        }
    }

    fn register_publisher(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let topic = graph_name(params, 1, "topic", &caller)?;
        let type_name = param_str(params, 2, "topic_type")?;
        let caller_api = uri_param(params, 3, "caller_api")?;

        let node = NodeIdentifier::new(caller.clone(), caller_api);
        self.refresh_node(&node);
        match self.registry.register_publisher(node, &topic, type_name) {
            Ok(update) => {
                let subscribers = uri_list(&update.subscribers);
                self.push_publisher_update(update);
                Ok(Response::success(
                    format!("Registered [{caller}] as publisher of [{topic}]"),
                    subscribers,
                ))
            }
            Err(e) => Ok(Response::error(e.to_string(), json!([]))),
        }
    }

    fn unregister_publisher(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let topic = graph_name(params, 1, "topic", &caller)?;
        let caller_api = uri_param(params, 2, "caller_api")?;

        match self.registry.unregister_publisher(&caller, &topic, &caller_api) {
            Some(update) => {
                self.push_publisher_update(update);
                Ok(Response::success(
                    format!("Unregistered [{caller}] as publisher of [{topic}]"),
                    json!(1),
                ))
            }
            None => Ok(Response::success(
                format!("[{caller}] is not a publisher of [{topic}]"),
                json!(0),
            )),
        }
    }

    fn register_subscriber(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let topic = graph_name(params, 1, "topic", &caller)?;
        let type_name = param_str(params, 2, "topic_type")?;
        let caller_api = uri_param(params, 3, "caller_api")?;

        let node = NodeIdentifier::new(caller.clone(), caller_api);
        self.refresh_node(&node);
        match self.registry.register_subscriber(node, &topic, type_name) {
            Ok(publishers) => Ok(Response::success(
                format!("Subscribed [{caller}] to [{topic}]"),
                uri_list(&publishers),
            )),
            Err(e) => Ok(Response::error(e.to_string(), json!([]))),
        }
    }

    fn unregister_subscriber(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let topic = graph_name(params, 1, "topic", &caller)?;
        let caller_api = uri_param(params, 2, "caller_api")?;

        let removed = self
            .registry
            .unregister_subscriber(&caller, &topic, &caller_api);
        Ok(Response::success(
            format!("Unregistered [{caller}] as subscriber of [{topic}]"),
            json!(removed),
        ))
    }

    fn register_service(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let service = graph_name(params, 1, "service", &caller)?;
        let service_api = uri_param(params, 2, "service_api")?;
        let caller_api = uri_param(params, 3, "caller_api")?;

        let node = NodeIdentifier::new(caller.clone(), caller_api);
        self.refresh_node(&node);
        self.registry
            .register_service(ServiceIdentifier::new(service.clone(), node, service_api));
        Ok(Response::success(
            format!("Registered [{caller}] as provider of [{service}]"),
            json!(1),
        ))
    }

    fn unregister_service(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let service = graph_name(params, 1, "service", &caller)?;
        let service_api = uri_param(params, 2, "service_api")?;

        let removed = self
            .registry
            .unregister_service(&caller, &service, &service_api);
        Ok(Response::success(
            format!("Unregistered [{caller}] as provider of [{service}]"),
            json!(removed),
        ))
    }

    fn lookup_node(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let node = graph_name(params, 1, "node", &caller)?;
        Ok(match self.registry.lookup_node(&node) {
            Some(found) => Response::success(format!("URI for [{node}]"), json!(found.uri().as_str())),
            None => Response::error(format!("unknown node [{node}]"), json!("")),
        })
    }

    fn lookup_service(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let service = graph_name(params, 1, "service", &caller)?;
        Ok(match self.registry.lookup_service(&service) {
            Some(found) => Response::success(
                format!("rosrpc URI: [{}]", found.uri),
                json!(found.uri.as_str()),
            ),
            None => Response::error(format!("no provider for [{service}]"), json!("")),
        })
    }

    fn get_published_topics(&self, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        let caller = caller_id(params)?;
        let subgraph = match params.get(1).and_then(Value::as_str) {
            Some("") | None => GraphName::empty(),
            Some(_) => graph_name(params, 1, "subgraph", &caller)?,
        };
        let topics = self.registry.published_topics(&subgraph);
        Ok(Response::success("current topics", json!(topics)))
    }
}

#[async_trait]
impl RpcHandler for MasterHandler {
    async fn handle(&self, method: &str, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        match method {
            methods::REGISTER_PUBLISHER => self.register_publisher(params),
            methods::UNREGISTER_PUBLISHER => self.unregister_publisher(params),
            methods::REGISTER_SUBSCRIBER => self.register_subscriber(params),
            methods::UNREGISTER_SUBSCRIBER => self.unregister_subscriber(params),
            methods::REGISTER_SERVICE => self.register_service(params),
            methods::UNREGISTER_SERVICE => self.unregister_service(params),
            methods::LOOKUP_NODE => self.lookup_node(params),
            methods::LOOKUP_SERVICE => self.lookup_service(params),
            methods::GET_PUBLISHED_TOPICS => self.get_published_topics(params),
            methods::GET_SYSTEM_STATE => {
                caller_id(params)?;
                Ok(Response::success(
                    "current system state",
                    self.registry.system_state().to_json(),
                ))
            }
            methods::GET_URI => {
                caller_id(params)?;
                let uri = self.uri.get().map(Url::as_str).unwrap_or_default();
                Ok(Response::success("", json!(uri)))
            }
            other => Err(RpcFault::MethodNotFound(other.to_string())),
        }
    }
}

/// The caller id, anchored at the root.
fn caller_id(params: &[Value]) -> Result<GraphName, RpcFault> {
    let raw = param_str(params, 0, "caller_id")?;
    GraphName::new(raw)
        .map(|name| name.to_global())
        .map_err(|e| RpcFault::InvalidParams(e.to_string()))
}

/// A name parameter resolved in the caller's namespace.
fn graph_name(
    params: &[Value],
    index: usize,
    field: &str,
    caller: &GraphName,
) -> Result<GraphName, RpcFault> {
    let raw = param_str(params, index, field)?;
    NameResolver::for_node(caller, HashMap::new())
        .and_then(|resolver| resolver.resolve(raw))
        .map_err(|e| RpcFault::InvalidParams(e.to_string()))
}

fn uri_param(params: &[Value], index: usize, field: &str) -> Result<Url, RpcFault> {
    let raw = param_str(params, index, field)?;
    parse_uri(raw).map_err(|e| RpcFault::InvalidParams(e.to_string()))
}

fn uri_list(uris: &[Url]) -> Value {
    json!(uris.iter().map(Url::as_str).collect::<Vec<_>>())
}
