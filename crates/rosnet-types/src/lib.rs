//! Core types shared by every rosnet crate.
//!
//! Graph names and their resolution, topic and service declarations, the
//! opaque `Message` / `Service` capabilities, wall-clock timestamps and
//! configuration. This crate contains no networking.

pub mod config;
pub mod error;
pub mod message;
pub mod name;
pub mod resolver;
pub mod time;
pub mod topic;

pub use error::{NameError, RosError, RosResult};
pub use message::{Message, MessageDescriptor, Service, ServiceDescriptor};
pub use name::GraphName;
pub use resolver::NameResolver;
pub use time::Timestamp;
pub use topic::{
    NodeIdentifier, PublisherIdentifier, ServiceDeclaration, ServiceIdentifier,
    SubscriberIdentifier, TopicDeclaration,
};
