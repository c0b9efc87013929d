//! Control protocol errors.

use crate::protocol::StatusCode;
use rosnet_types::RosError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The peer answered with a JSON-RPC error object.
    #[error("RPC fault {code}: {message}")]
    Fault { code: i64, message: String },
    /// The call reached the peer but did not succeed.
    #[error("Remote {status:?}: {message}")]
    Remote { status: StatusCode, message: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Ros(#[from] RosError),
}
