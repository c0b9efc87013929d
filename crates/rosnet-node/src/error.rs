//! Node-level errors.

use crate::service::ServiceError;
use rosnet_rpc::RpcError;
use rosnet_types::{GraphName, NameError, RosError};
use rosnet_wire::WireError;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Ros(#[from] RosError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// An endpoint with this name exists with a different type.
    #[error("{name} is already in use with type {existing}, requested {requested}")]
    TypeMismatch {
        name: GraphName,
        existing: String,
        requested: String,
    },
    /// The master rejected or never answered a registration.
    #[error("Registration of {name} failed: {reason}")]
    Registration { name: GraphName, reason: String },
    /// No provider is registered for the service.
    #[error("Service not found: {0}")]
    ServiceNotFound(GraphName),
    /// The subscriber already has a connection to this publisher.
    #[error("Already connected to publisher {0}")]
    AlreadyConnected(Url),
    /// The negotiated transport is not one this node speaks.
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("Node is shut down")]
    Shutdown,
}

pub type NodeResult<T> = Result<T, NodeError>;
