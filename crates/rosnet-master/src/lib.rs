//! The rosnet master: a registry of publishers, subscribers and services
//! served over the control protocol.
//!
//! The master holds no leases. Nodes register as they create endpoints and
//! unregister on shutdown; subscriber nodes are told about publisher changes
//! through `publisherUpdate` pushes.

pub mod registry;
pub mod server;

pub use registry::{MasterRegistry, PublisherUpdate, RegistryError};
pub use server::MasterServer;

/// Caller id the master uses for its own outgoing calls.
pub const MASTER_CALLER_ID: &str = "/master";
