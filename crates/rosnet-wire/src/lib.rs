//! TCPROS data plane for rosnet.
//!
//! Every peer connection starts with a connection header exchange
//! ([`header`]), after which topic messages flow as length-prefixed frames
//! and service calls as request frames answered by status-tagged response
//! frames ([`frame`]). [`queue`] holds the sender and receiver loops and
//! [`server`] the per-node accept loop.

pub mod error;
pub mod frame;
pub mod header;
pub mod queue;
pub mod server;

pub use error::WireError;
pub use frame::{ServiceResponseFrame, MAX_FRAME_SIZE};
pub use header::ConnectionHeader;
pub use queue::{wait_cancelled, IncomingQueue, OutgoingQueue};
pub use server::{ConnectionHandler, TcpRosServer};

/// Protocol name announced in `requestTopic` negotiation.
pub const TCPROS: &str = "TCPROS";
