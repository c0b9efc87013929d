//! Declarations and identifiers for nodes, topics and services.

use crate::error::{RosError, RosResult};
use crate::message::{MessageDescriptor, ServiceDescriptor};
use crate::name::GraphName;
use url::Url;

/// URI scheme of service endpoints.
pub const ROSRPC_SCHEME: &str = "rosrpc";

/// Parse a URI, mapping failures into [`RosError::InvalidUri`].
pub fn parse_uri(uri: &str) -> RosResult<Url> {
    Url::parse(uri).map_err(|e| RosError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}

/// Host and port of a URI, as needed to open a socket.
pub fn host_port(uri: &Url) -> RosResult<(String, u16)> {
    let host = uri.host_str().ok_or_else(|| RosError::InvalidUri {
        uri: uri.to_string(),
        reason: "missing host".to_string(),
    })?;
    let port = uri.port_or_known_default().ok_or_else(|| RosError::InvalidUri {
        uri: uri.to_string(),
        reason: "missing port".to_string(),
    })?;
    Ok((host.to_string(), port))
}

/// A node known by name and control endpoint.
///
/// Publisher lists pushed by the master carry only URIs, so the name is
/// optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentifier {
    name: Option<GraphName>,
    uri: Url,
}

impl NodeIdentifier {
    pub fn new(name: GraphName, uri: Url) -> Self {
        Self {
            name: Some(name),
            uri,
        }
    }

    pub fn anonymous(uri: Url) -> Self {
        Self { name: None, uri }
    }

    pub fn name(&self) -> Option<&GraphName> {
        self.name.as_ref()
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }
}

/// A topic name together with the type carried on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicDeclaration {
    pub name: GraphName,
    pub descriptor: MessageDescriptor,
}

impl TopicDeclaration {
    pub fn new(name: GraphName, descriptor: MessageDescriptor) -> Self {
        Self { name, descriptor }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublisherIdentifier {
    pub node: NodeIdentifier,
    pub topic: TopicDeclaration,
}

impl PublisherIdentifier {
    pub fn new(node: NodeIdentifier, topic: TopicDeclaration) -> Self {
        Self { node, topic }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberIdentifier {
    pub node: NodeIdentifier,
    pub topic: TopicDeclaration,
}

impl SubscriberIdentifier {
    pub fn new(node: NodeIdentifier, topic: TopicDeclaration) -> Self {
        Self { node, topic }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDeclaration {
    pub name: GraphName,
    pub descriptor: ServiceDescriptor,
}

impl ServiceDeclaration {
    pub fn new(name: GraphName, descriptor: ServiceDescriptor) -> Self {
        Self { name, descriptor }
    }
}

/// A service as registered with the master: its name, providing node and
/// `rosrpc://host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentifier {
    pub name: GraphName,
    pub node: NodeIdentifier,
    pub uri: Url,
}

impl ServiceIdentifier {
    pub fn new(name: GraphName, node: NodeIdentifier, uri: Url) -> Self {
        Self { name, node, uri }
    }
}

/// Build the `rosrpc://host:port` URI of a service endpoint.
pub fn rosrpc_uri(host: &str, port: u16) -> RosResult<Url> {
    parse_uri(&format!("{ROSRPC_SCHEME}://{host}:{port}"))
}
