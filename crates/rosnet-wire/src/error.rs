//! Data plane errors.

use thiserror::Error;

/// Errors raised on a TCPROS connection.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Cancelled")]
    Cancelled,
}

impl WireError {
    /// Whether the error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            WireError::ConnectionClosed | WireError::Cancelled => true,
            WireError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
