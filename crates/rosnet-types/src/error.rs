//! Shared error types for rosnet.

use thiserror::Error;

/// A graph name could not be constructed or resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The string does not match the graph name grammar.
    #[error("Invalid graph name '{0}': must start with a letter, '/' or '~' and contain only [A-Za-z0-9_/]")]
    Invalid(String),

    /// A private (`~`) name was given where no node context exists.
    #[error("Cannot resolve private name '{0}' without a node name")]
    PrivateNotAllowed(String),

    /// An explicit resolution namespace was relative.
    #[error("Namespace '{0}' is not global")]
    NamespaceNotGlobal(String),
}

/// Top-level error type for the shared types.
#[derive(Error, Debug)]
pub enum RosError {
    /// A graph name error.
    #[error(transparent)]
    Name(#[from] NameError),

    /// A message payload could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A URI could not be parsed.
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri {
        /// The offending text.
        uri: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for results using [`RosError`].
pub type RosResult<T> = Result<T, RosError>;
