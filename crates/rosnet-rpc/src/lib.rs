//! Registry control protocol.
//!
//! Masters and node control servers (slaves) speak JSON-RPC 2.0 over HTTP
//! `POST /`. Every call's first parameter is the caller id and every result
//! is the triple `[statusCode, statusMessage, value]`.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{MasterClient, RpcClient, SlaveClient};
pub use error::RpcError;
pub use protocol::{ProtocolDescription, Response, RpcFault, StatusCode, SystemState};
pub use server::{RpcHandler, RpcServer};
