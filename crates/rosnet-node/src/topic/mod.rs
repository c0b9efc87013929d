//! Topics: typed publishers and subscribers plus the node's table of them.

pub(crate) mod manager;
mod publisher;
mod subscriber;

pub(crate) use manager::TopicManager;
pub(crate) use publisher::PublisherCore;
pub(crate) use subscriber::{SubscriberCore, SubscriberHandle};

pub use publisher::Publisher;
pub use subscriber::{ListenerId, NeverReconnect, ReconnectPolicy, Subscriber};
