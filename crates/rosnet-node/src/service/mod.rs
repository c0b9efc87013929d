//! Services: request/response over TCPROS.

mod client;
pub(crate) mod manager;
mod server;

pub(crate) use manager::ServiceManager;
pub(crate) use server::{ServiceHandle, ServiceServerCore};

pub use client::ServiceClient;
pub use server::{ResponseBuilder, ServiceServer};

use rosnet_types::RosError;
use rosnet_wire::WireError;
use thiserror::Error;

/// Failure reported by a [`ResponseBuilder`]. Its message travels back to
/// the caller in an error frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ServiceException(pub String);

impl ServiceException {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by [`ServiceClient::call`].
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The server ran the request and reported a failure.
    #[error("Service failed: {0}")]
    Application(String),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("Cannot decode response: {0}")]
    Decode(#[from] RosError),
    #[error("Service client is closed")]
    Closed,
}
