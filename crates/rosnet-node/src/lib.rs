//! rosnet nodes.
//!
//! A [`Node`] runs a control server (slave) and a TCPROS data server,
//! registers its publishers, subscribers and services with the master, and
//! exchanges data directly with peer nodes.

pub mod endpoint;
pub mod error;
pub mod node;
pub mod registration;
pub mod service;
pub mod slave;
mod tcpros;
pub mod topic;

pub use endpoint::{ConnectionInfo, Direction, Endpoint, Role};
pub use error::{NodeError, NodeResult};
pub use node::Node;
pub use service::{
    ResponseBuilder, ServiceClient, ServiceError, ServiceException, ServiceServer,
};
pub use topic::{ListenerId, NeverReconnect, Publisher, ReconnectPolicy, Subscriber};
