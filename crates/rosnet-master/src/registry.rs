//! Master registry: who publishes, subscribes to and provides what.
//!
//! All state lives in one [`RwLock`]-guarded struct so every operation sees
//! and leaves a consistent snapshot. Operations that change a topic's
//! publisher set return a [`PublisherUpdate`] describing the push the caller
//! owes the topic's subscribers.

use rosnet_rpc::SystemState;
use rosnet_types::message::MessageDescriptor;
use rosnet_types::{
    GraphName, NodeIdentifier, PublisherIdentifier, ServiceIdentifier, SubscriberIdentifier,
    TopicDeclaration,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// The master only learns type names, so registrations carry a wildcard
/// checksum.
const UNKNOWN_MD5: &str = rosnet_types::message::WILDCARD_MD5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The topic is already registered with a different type.
    #[error("Topic {topic} has type {existing}, cannot register it as {requested}")]
    TypeMismatch {
        topic: GraphName,
        existing: String,
        requested: String,
    },
}

/// A change to a topic's publisher set that subscribers must hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherUpdate {
    pub topic: GraphName,
    /// Every current publisher's control URI.
    pub publishers: Vec<Url>,
    /// Control URIs to push the update to.
    pub subscribers: Vec<Url>,
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: HashMap<GraphName, NodeIdentifier>,
    publishers: BTreeMap<GraphName, Vec<PublisherIdentifier>>,
    subscribers: BTreeMap<GraphName, Vec<SubscriberIdentifier>>,
    services: BTreeMap<GraphName, ServiceIdentifier>,
    topic_types: HashMap<GraphName, String>,
}

impl RegistryState {
    fn upsert_node(&mut self, node: &NodeIdentifier) {
        let Some(name) = node.name() else {
            return;
        };
        self.relocate_node(node);
        self.nodes.insert(name.clone(), node.clone());
    }

    /// Point every registration held under `node`'s name at its current
    /// URI. Returns the topics whose publisher lists changed.
    fn relocate_node(&mut self, node: &NodeIdentifier) -> Vec<GraphName> {
        let Some(name) = node.name() else {
            return Vec::new();
        };
        match self.nodes.get(name) {
            Some(existing) if existing.uri() != node.uri() => {
                warn!(
                    node = %name,
                    old = %existing.uri(),
                    new = %node.uri(),
                    "Node re-registered with a new URI"
                );
            }
            _ => return Vec::new(),
        }
        let owned = |n: &NodeIdentifier| n.name() == Some(name);
        let mut moved = Vec::new();
        for (topic, publishers) in self.publishers.iter_mut() {
            let mut changed = false;
            for publisher in publishers.iter_mut().filter(|p| owned(&p.node)) {
                publisher.node = node.clone();
                changed = true;
            }
            if changed {
                moved.push(topic.clone());
            }
        }
        for subscriber in self.subscribers.values_mut().flatten().filter(|s| owned(&s.node)) {
            subscriber.node = node.clone();
        }
        for service in self.services.values_mut().filter(|s| owned(&s.node)) {
            service.node = node.clone();
        }
        self.nodes.insert(name.clone(), node.clone());
        moved
    }

    fn check_type(&self, topic: &GraphName, type_name: &str) -> Result<(), RegistryError> {
        match self.topic_types.get(topic) {
            Some(existing) if existing != type_name && existing != "*" && type_name != "*" => {
                Err(RegistryError::TypeMismatch {
                    topic: topic.clone(),
                    existing: existing.clone(),
                    requested: type_name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn record_type(&mut self, topic: &GraphName, type_name: &str) {
        let entry = self
            .topic_types
            .entry(topic.clone())
            .or_insert_with(|| type_name.to_string());
        if *entry == "*" {
            *entry = type_name.to_string();
        }
    }

    fn publisher_update(&self, topic: &GraphName) -> PublisherUpdate {
        PublisherUpdate {
            topic: topic.clone(),
            publishers: self
                .publishers
                .get(topic)
                .map(|p| p.iter().map(|p| p.node.uri().clone()).collect())
                .unwrap_or_default(),
            subscribers: self
                .subscribers
                .get(topic)
                .map(|s| s.iter().map(|s| s.node.uri().clone()).collect())
                .unwrap_or_default(),
        }
    }

    /// Drop empty topic entries, unused topic types and nodes that no longer
    /// own any registration.
    fn collect_garbage(&mut self, topic: Option<&GraphName>, node: &GraphName) {
        if let Some(topic) = topic {
            if self.publishers.get(topic).is_some_and(Vec::is_empty) {
                self.publishers.remove(topic);
            }
            if self.subscribers.get(topic).is_some_and(Vec::is_empty) {
                self.subscribers.remove(topic);
            }
            if !self.publishers.contains_key(topic) && !self.subscribers.contains_key(topic) {
                self.topic_types.remove(topic);
            }
        }
        let owns = |n: Option<&GraphName>| n == Some(node);
        let referenced = self
            .publishers
            .values()
            .flatten()
            .any(|p| owns(p.node.name()))
            || self
                .subscribers
                .values()
                .flatten()
                .any(|s| owns(s.node.name()))
            || self.services.values().any(|s| owns(s.node.name()));
        if !referenced {
            self.nodes.remove(node);
        }
    }
}

fn declaration(topic: &GraphName, type_name: &str) -> TopicDeclaration {
    TopicDeclaration::new(topic.clone(), MessageDescriptor::new(type_name, UNKNOWN_MD5))
}

fn same_node(a: &NodeIdentifier, name: &GraphName, uri: &Url) -> bool {
    a.name() == Some(name) && a.uri() == uri
}

/// Thread-safe registry of every registration in one graph.
#[derive(Debug, Default)]
pub struct MasterRegistry {
    state: RwLock<RegistryState>,
}

impl MasterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move every registration of `node`'s name to `node`'s URI. Returns
    /// the updates owed to subscribers of the topics it publishes, none
    /// when the URI is unchanged.
    pub fn refresh_node(&self, node: &NodeIdentifier) -> Vec<PublisherUpdate> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let moved = state.relocate_node(node);
        moved.iter().map(|topic| state.publisher_update(topic)).collect()
    }

    /// Register `node` as a publisher of `topic`. The returned update lists
    /// the subscribers to notify (and to hand back to the caller).
    pub fn register_publisher(
        &self,
        node: NodeIdentifier,
        topic: &GraphName,
        type_name: &str,
    ) -> Result<PublisherUpdate, RegistryError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.check_type(topic, type_name)?;
        state.upsert_node(&node);
        state.record_type(topic, type_name);

        let publishers = state.publishers.entry(topic.clone()).or_default();
        publishers.retain(|p| p.node.name() != node.name());
        publishers.push(PublisherIdentifier::new(node.clone(), declaration(topic, type_name)));

        info!(topic = %topic, node = ?node.name(), "Registered publisher");
        Ok(state.publisher_update(topic))
    }

    /// Remove a publisher registration. Returns the update to push when
    /// something was removed.
    pub fn unregister_publisher(
        &self,
        node: &GraphName,
        topic: &GraphName,
        caller_api: &Url,
    ) -> Option<PublisherUpdate> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let publishers = state.publishers.get_mut(topic)?;
        let before = publishers.len();
        publishers.retain(|p| !same_node(&p.node, node, caller_api));
        if publishers.len() == before {
            return None;
        }
        let update = state.publisher_update(topic);
        state.collect_garbage(Some(topic), node);
        info!(topic = %topic, node = %node, "Unregistered publisher");
        Some(update)
    }

    /// Register `node` as a subscriber of `topic`. Returns the control URIs
    /// of the topic's current publishers.
    pub fn register_subscriber(
        &self,
        node: NodeIdentifier,
        topic: &GraphName,
        type_name: &str,
    ) -> Result<Vec<Url>, RegistryError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.check_type(topic, type_name)?;
        state.upsert_node(&node);
        state.record_type(topic, type_name);

        let subscribers = state.subscribers.entry(topic.clone()).or_default();
        subscribers.retain(|s| s.node.name() != node.name());
        subscribers.push(SubscriberIdentifier::new(node.clone(), declaration(topic, type_name)));

        info!(topic = %topic, node = ?node.name(), "Registered subscriber");
        Ok(state.publisher_update(topic).publishers)
    }

    /// Returns the number of registrations removed.
    pub fn unregister_subscriber(
        &self,
        node: &GraphName,
        topic: &GraphName,
        caller_api: &Url,
    ) -> usize {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = state.subscribers.get_mut(topic) else {
            return 0;
        };
        let before = subscribers.len();
        subscribers.retain(|s| !same_node(&s.node, node, caller_api));
        let removed = before - subscribers.len();
        if removed > 0 {
            state.collect_garbage(Some(topic), node);
            info!(topic = %topic, node = %node, "Unregistered subscriber");
        }
        removed
    }

    /// Register a service provider. The last registration for a name wins.
    pub fn register_service(&self, service: ServiceIdentifier) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.upsert_node(&service.node);
        if let Some(previous) = state.services.get(&service.name) {
            if previous.uri != service.uri {
                info!(
                    service = %service.name,
                    old = %previous.uri,
                    new = %service.uri,
                    "Replacing service provider"
                );
            }
        }
        let replaced_node = state
            .services
            .insert(service.name.clone(), service.clone())
            .and_then(|prev| prev.node.name().cloned());
        if let Some(prev_node) = replaced_node {
            state.collect_garbage(None, &prev_node);
        }
        info!(service = %service.name, uri = %service.uri, "Registered service");
    }

    /// Remove a service registration if `service_uri` is the registered
    /// one. Returns the number of registrations removed.
    pub fn unregister_service(
        &self,
        node: &GraphName,
        service: &GraphName,
        service_uri: &Url,
    ) -> usize {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.services.get(service) {
            Some(registered) if &registered.uri == service_uri => {
                state.services.remove(service);
                state.collect_garbage(None, node);
                info!(service = %service, "Unregistered service");
                1
            }
            _ => 0,
        }
    }

    pub fn lookup_node(&self, node: &GraphName) -> Option<NodeIdentifier> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.nodes.get(node).cloned()
    }

    pub fn lookup_service(&self, service: &GraphName) -> Option<ServiceIdentifier> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.services.get(service).cloned()
    }

    /// `(topic, type)` for every topic with at least one publisher, limited
    /// to `subgraph` when it is neither empty nor the root.
    pub fn published_topics(&self, subgraph: &GraphName) -> Vec<(String, String)> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let prefix = format!("{}/", subgraph.as_str());
        state
            .publishers
            .keys()
            .filter(|topic| {
                subgraph.is_empty()
                    || subgraph.is_root()
                    || *topic == subgraph
                    || topic.as_str().starts_with(&prefix)
            })
            .map(|topic| {
                let type_name = state.topic_types.get(topic).cloned().unwrap_or_default();
                (topic.to_string(), type_name)
            })
            .collect()
    }

    pub fn system_state(&self) -> SystemState {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        SystemState {
            publishers: state
                .publishers
                .iter()
                .map(|(topic, p)| (topic.to_string(), node_names(p.iter().map(|p| &p.node))))
                .collect(),
            subscribers: state
                .subscribers
                .iter()
                .map(|(topic, s)| (topic.to_string(), node_names(s.iter().map(|s| &s.node))))
                .collect(),
            services: state
                .services
                .iter()
                .map(|(name, s)| (name.to_string(), node_names(std::iter::once(&s.node))))
                .collect(),
        }
    }
}

fn node_names<'a>(nodes: impl Iterator<Item = &'a NodeIdentifier>) -> Vec<String> {
    nodes
        .filter_map(NodeIdentifier::name)
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosnet_types::topic::{parse_uri, rosrpc_uri};

    fn name(s: &str) -> GraphName {
        GraphName::new(s).unwrap()
    }

    fn node(n: &str, port: u16) -> NodeIdentifier {
        NodeIdentifier::new(name(n), parse_uri(&format!("http://127.0.0.1:{port}/")).unwrap())
    }

    #[test]
    fn test_register_publisher_returns_subscribers() {
        let registry = MasterRegistry::new();
        let sub = node("/listener", 2000);
        assert!(registry
            .register_subscriber(sub.clone(), &name("/chatter"), "std_msgs/String")
            .unwrap()
            .is_empty());

        let update = registry
            .register_publisher(node("/talker", 1000), &name("/chatter"), "std_msgs/String")
            .unwrap();
        assert_eq!(update.subscribers, vec![sub.uri().clone()]);
        assert_eq!(update.publishers, vec![node("/talker", 1000).uri().clone()]);

        let publishers = registry
            .register_subscriber(node("/other", 3000), &name("/chatter"), "std_msgs/String")
            .unwrap();
        assert_eq!(publishers, update.publishers);
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = MasterRegistry::new();
        for _ in 0..3 {
            registry
                .register_publisher(node("/talker", 1000), &name("/chatter"), "std_msgs/String")
                .unwrap();
        }
        let state = registry.system_state();
        assert_eq!(state.publishers, vec![("/chatter".to_string(), vec!["/talker".to_string()])]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let registry = MasterRegistry::new();
        registry
            .register_publisher(node("/a", 1000), &name("/t"), "std_msgs/String")
            .unwrap();
        let err = registry
            .register_subscriber(node("/b", 2000), &name("/t"), "std_msgs/Int32")
            .unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
        assert!(registry.lookup_node(&name("/b")).is_none());
        assert!(registry.system_state().subscribers.is_empty());
    }

    #[test]
    fn test_wildcard_type_takes_concrete_type() {
        let registry = MasterRegistry::new();
        registry
            .register_subscriber(node("/b", 2000), &name("/t"), "*")
            .unwrap();
        registry
            .register_publisher(node("/a", 1000), &name("/t"), "std_msgs/String")
            .unwrap();
        assert_eq!(
            registry.published_topics(&GraphName::empty()),
            vec![("/t".to_string(), "std_msgs/String".to_string())]
        );
    }

    #[test]
    fn test_unregister_publisher_counts_and_updates() {
        let registry = MasterRegistry::new();
        let talker = node("/talker", 1000);
        registry
            .register_subscriber(node("/listener", 2000), &name("/chatter"), "std_msgs/String")
            .unwrap();
        registry
            .register_publisher(talker.clone(), &name("/chatter"), "std_msgs/String")
            .unwrap();

        let wrong_uri = parse_uri("http://127.0.0.1:9/").unwrap();
        assert!(registry
            .unregister_publisher(&name("/talker"), &name("/chatter"), &wrong_uri)
            .is_none());

        let update = registry
            .unregister_publisher(&name("/talker"), &name("/chatter"), talker.uri())
            .unwrap();
        assert!(update.publishers.is_empty());
        assert_eq!(update.subscribers.len(), 1);
        assert!(registry.lookup_node(&name("/talker")).is_none());
        assert!(registry.lookup_node(&name("/listener")).is_some());
        assert!(registry
            .unregister_publisher(&name("/talker"), &name("/chatter"), talker.uri())
            .is_none());
    }

    #[test]
    fn test_unregister_subscriber() {
        let registry = MasterRegistry::new();
        let listener = node("/listener", 2000);
        registry
            .register_subscriber(listener.clone(), &name("/chatter"), "std_msgs/String")
            .unwrap();
        assert_eq!(
            registry.unregister_subscriber(&name("/listener"), &name("/chatter"), listener.uri()),
            1
        );
        assert_eq!(
            registry.unregister_subscriber(&name("/listener"), &name("/chatter"), listener.uri()),
            0
        );
        // the topic type goes with the last registration
        registry
            .register_subscriber(listener, &name("/chatter"), "std_msgs/Int32")
            .unwrap();
    }

    #[test]
    fn test_services_last_registration_wins() {
        let registry = MasterRegistry::new();
        let first = ServiceIdentifier::new(
            name("/add"),
            node("/server1", 1000),
            rosrpc_uri("127.0.0.1", 5001).unwrap(),
        );
        let second = ServiceIdentifier::new(
            name("/add"),
            node("/server2", 1001),
            rosrpc_uri("127.0.0.1", 5002).unwrap(),
        );
        registry.register_service(first.clone());
        registry.register_service(second.clone());
        assert_eq!(registry.lookup_service(&name("/add")), Some(second.clone()));
        assert!(registry.lookup_node(&name("/server1")).is_none());

        assert_eq!(
            registry.unregister_service(&name("/server1"), &name("/add"), &first.uri),
            0
        );
        assert_eq!(
            registry.unregister_service(&name("/server2"), &name("/add"), &second.uri),
            1
        );
        assert!(registry.lookup_service(&name("/add")).is_none());
    }

    #[test]
    fn test_new_uri_moves_every_registration() {
        let registry = MasterRegistry::new();
        let old = node("/a", 1000);
        let moved = node("/a", 1001);
        registry
            .register_subscriber(node("/listener", 2000), &name("/t1"), "std_msgs/String")
            .unwrap();
        registry
            .register_publisher(old.clone(), &name("/t1"), "std_msgs/String")
            .unwrap();
        registry
            .register_subscriber(old.clone(), &name("/t2"), "std_msgs/String")
            .unwrap();
        registry.register_service(ServiceIdentifier::new(
            name("/srv"),
            old.clone(),
            rosrpc_uri("127.0.0.1", 5001).unwrap(),
        ));
        assert!(registry.refresh_node(&old).is_empty());

        let updates = registry.refresh_node(&moved);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].topic, name("/t1"));
        assert_eq!(updates[0].publishers, vec![moved.uri().clone()]);
        assert_eq!(updates[0].subscribers, vec![node("/listener", 2000).uri().clone()]);

        registry
            .register_publisher(moved.clone(), &name("/t3"), "std_msgs/String")
            .unwrap();
        assert_eq!(registry.lookup_node(&name("/a")), Some(moved.clone()));
        let publishers = registry
            .register_subscriber(node("/other", 3000), &name("/t1"), "std_msgs/String")
            .unwrap();
        assert_eq!(publishers, vec![moved.uri().clone()]);
        assert_eq!(registry.lookup_service(&name("/srv")).unwrap().node, moved);

        // the old URI no longer owns anything
        assert!(registry
            .unregister_publisher(&name("/a"), &name("/t1"), old.uri())
            .is_none());
        assert!(registry
            .unregister_publisher(&name("/a"), &name("/t1"), moved.uri())
            .is_some());
    }

    #[test]
    fn test_reregistration_under_new_uri_without_refresh() {
        let registry = MasterRegistry::new();
        registry
            .register_publisher(node("/a", 1000), &name("/t1"), "std_msgs/String")
            .unwrap();
        registry
            .register_subscriber(node("/a", 1001), &name("/t2"), "std_msgs/String")
            .unwrap();
        let update = registry
            .register_publisher(node("/b", 4000), &name("/t1"), "std_msgs/String")
            .unwrap();
        assert!(update.publishers.contains(node("/a", 1001).uri()));
        assert!(!update.publishers.contains(node("/a", 1000).uri()));
    }

    #[test]
    fn test_published_topics_subgraph() {
        let registry = MasterRegistry::new();
        for topic in ["/a/x", "/a/y", "/ab", "/b"] {
            registry
                .register_publisher(node("/p", 1000), &name(topic), "t/T")
                .unwrap();
        }
        let topics: Vec<String> = registry
            .published_topics(&name("/a"))
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(topics, vec!["/a/x", "/a/y"]);
        assert_eq!(registry.published_topics(&name("/")).len(), 4);
    }

    #[test]
    fn test_system_state() {
        let registry = MasterRegistry::new();
        registry
            .register_publisher(node("/talker", 1000), &name("/chatter"), "std_msgs/String")
            .unwrap();
        registry
            .register_subscriber(node("/listener", 2000), &name("/chatter"), "std_msgs/String")
            .unwrap();
        registry.register_service(ServiceIdentifier::new(
            name("/add"),
            node("/server", 3000),
            rosrpc_uri("127.0.0.1", 5000).unwrap(),
        ));
        let state = registry.system_state();
        assert_eq!(state.publishers, vec![("/chatter".into(), vec!["/talker".into()])]);
        assert_eq!(state.subscribers, vec![("/chatter".into(), vec!["/listener".into()])]);
        assert_eq!(state.services, vec![("/add".into(), vec!["/server".into()])]);
    }
}
