//! The node's table of publishers and subscribers, one of each per topic.

use super::publisher::PublisherCore;
use super::subscriber::{SubscriberCore, SubscriberHandle};
use crate::endpoint::Endpoint;
use crate::error::{NodeError, NodeResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rosnet_types::{GraphName, Message, MessageDescriptor, TopicDeclaration};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct TopicManager {
    publishers: DashMap<GraphName, Arc<PublisherCore>>,
    subscribers: DashMap<GraphName, Arc<dyn SubscriberHandle>>,
}

fn mismatch(name: &GraphName, existing: &MessageDescriptor, requested: &MessageDescriptor) -> NodeError {
    NodeError::TypeMismatch {
        name: name.clone(),
        existing: existing.type_name.clone(),
        requested: requested.type_name.clone(),
    }
}

impl TopicManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The live publisher for the topic, or a new one from `create`.
    /// The flag tells whether it was created.
    pub(crate) fn publisher_or_insert(
        &self,
        declaration: &TopicDeclaration,
        create: impl FnOnce() -> PublisherCore,
    ) -> NodeResult<(Arc<PublisherCore>, bool)> {
        match self.publishers.entry(declaration.name.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                if !existing.is_shutdown() {
                    let descriptor = &existing.declaration().descriptor;
                    if !descriptor.same_type(&declaration.descriptor) {
                        return Err(mismatch(&declaration.name, descriptor, &declaration.descriptor));
                    }
                    return Ok((Arc::clone(existing), false));
                }
                let core = Arc::new(create());
                entry.insert(Arc::clone(&core));
                Ok((core, true))
            }
            Entry::Vacant(entry) => {
                let core = Arc::new(create());
                entry.insert(Arc::clone(&core));
                Ok((core, true))
            }
        }
    }

    /// The live subscriber for the topic, or a new one from `create`.
    /// The flag tells whether it was created.
    pub(crate) fn subscriber_or_insert<M: Message>(
        &self,
        declaration: &TopicDeclaration,
        create: impl FnOnce() -> Arc<SubscriberCore<M>>,
    ) -> NodeResult<(Arc<SubscriberCore<M>>, bool)> {
        match self.subscribers.entry(declaration.name.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                if !existing.is_shutdown() {
                    let descriptor = &existing.declaration().descriptor;
                    if !descriptor.same_type(&declaration.descriptor) {
                        return Err(mismatch(&declaration.name, descriptor, &declaration.descriptor));
                    }
                    // Same descriptor, but a different Rust type is still a mismatch.
                    let typed = Arc::clone(existing)
                        .as_any()
                        .downcast::<SubscriberCore<M>>()
                        .map_err(|_| mismatch(&declaration.name, descriptor, &declaration.descriptor))?;
                    return Ok((typed, false));
                }
                let core = create();
                entry.insert(core.clone());
                Ok((core, true))
            }
            Entry::Vacant(entry) => {
                let core = create();
                entry.insert(core.clone());
                Ok((core, true))
            }
        }
    }

    pub(crate) fn publisher(&self, topic: &GraphName) -> Option<Arc<PublisherCore>> {
        self.publishers
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|core| !core.is_shutdown())
    }

    pub(crate) fn subscriber(&self, topic: &GraphName) -> Option<Arc<dyn SubscriberHandle>> {
        self.subscribers
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|core| !core.is_shutdown())
    }

    /// Remove the entry only if it is still `core`.
    pub(crate) fn remove_publisher(&self, topic: &GraphName, core: &Arc<PublisherCore>) {
        self.publishers
            .remove_if(topic, |_, existing| Arc::ptr_eq(existing, core));
    }

    pub(crate) fn remove_subscriber<M: Message>(&self, topic: &GraphName, core: &Arc<SubscriberCore<M>>) {
        let target = Arc::as_ptr(core) as *const ();
        self.subscribers
            .remove_if(topic, |_, existing| Arc::as_ptr(existing) as *const () == target);
    }

    pub(crate) fn publishers(&self) -> Vec<Arc<PublisherCore>> {
        self.publishers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) fn subscribers(&self) -> Vec<Arc<dyn SubscriberHandle>> {
        self.subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Declarations of every live publisher, sorted by topic.
    pub(crate) fn publications(&self) -> Vec<TopicDeclaration> {
        let mut declarations: Vec<_> = self
            .publishers()
            .into_iter()
            .filter(|core| !core.is_shutdown())
            .map(|core| core.declaration().clone())
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Declarations of every live subscriber, sorted by topic.
    pub(crate) fn subscriptions(&self) -> Vec<TopicDeclaration> {
        let mut declarations: Vec<_> = self
            .subscribers()
            .into_iter()
            .filter(|core| !core.is_shutdown())
            .map(|core| core.declaration().clone())
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Shut down and forget every endpoint.
    pub(crate) async fn shutdown_all(&self) {
        let publishers = self.publishers();
        let subscribers = self.subscribers();
        self.publishers.clear();
        self.subscribers.clear();
        for publisher in publishers {
            publisher.shutdown().await;
        }
        for subscriber in subscribers {
            subscriber.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosnet_types::RosResult;
    use std::time::Duration;

    struct Text(String);

    impl Message for Text {
        fn descriptor() -> MessageDescriptor {
            MessageDescriptor::new("test_msgs/Text", "t1")
        }

        fn serialize(&self) -> Vec<u8> {
            self.0.as_bytes().to_vec()
        }

        fn deserialize(bytes: &[u8]) -> RosResult<Self> {
            Ok(Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }

    /// Same wire identity as `Text`, different Rust type.
    struct Alias;

    impl Message for Alias {
        fn descriptor() -> MessageDescriptor {
            Text::descriptor()
        }

        fn serialize(&self) -> Vec<u8> {
            Vec::new()
        }

        fn deserialize(_bytes: &[u8]) -> RosResult<Self> {
            Ok(Alias)
        }
    }

    fn declaration(topic: &str, descriptor: MessageDescriptor) -> TopicDeclaration {
        TopicDeclaration::new(GraphName::new(topic).unwrap(), descriptor)
    }

    fn caller() -> GraphName {
        GraphName::new("/node").unwrap()
    }

    #[tokio::test]
    async fn test_publisher_shared_per_topic() {
        let manager = TopicManager::new();
        let decl = declaration("/chatter", Text::descriptor());
        let (first, created) = manager
            .publisher_or_insert(&decl, || PublisherCore::new(caller(), decl.clone(), false))
            .unwrap();
        assert!(created);
        let (second, created) = manager
            .publisher_or_insert(&decl, || panic!("must reuse"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.publications(), vec![decl]);
    }

    #[tokio::test]
    async fn test_publisher_type_mismatch() {
        let manager = TopicManager::new();
        let decl = declaration("/chatter", Text::descriptor());
        manager
            .publisher_or_insert(&decl, || PublisherCore::new(caller(), decl.clone(), false))
            .unwrap();
        let other = declaration("/chatter", MessageDescriptor::new("test_msgs/Int", "i1"));
        let err = manager
            .publisher_or_insert(&other, || PublisherCore::new(caller(), other.clone(), false))
            .unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_dead_publisher_is_replaced() {
        let manager = TopicManager::new();
        let decl = declaration("/chatter", Text::descriptor());
        let (first, _) = manager
            .publisher_or_insert(&decl, || PublisherCore::new(caller(), decl.clone(), false))
            .unwrap();
        first.shutdown().await;
        assert!(manager.publisher(&decl.name).is_none());
        let (second, created) = manager
            .publisher_or_insert(&decl, || PublisherCore::new(caller(), decl.clone(), false))
            .unwrap();
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_subscriber_downcast() {
        let manager = TopicManager::new();
        let decl = declaration("/chatter", Text::descriptor());
        let timeout = Duration::from_secs(1);
        let (first, _) = manager
            .subscriber_or_insert::<Text>(&decl, || {
                SubscriberCore::start(caller(), decl.clone(), timeout)
            })
            .unwrap();
        let (second, created) = manager
            .subscriber_or_insert::<Text>(&decl, || panic!("must reuse"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));

        let err = manager
            .subscriber_or_insert::<Alias>(&decl, || panic!("must not create"))
            .unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch { .. }));

        manager.remove_subscriber(&decl.name, &first);
        assert!(manager.subscriber(&decl.name).is_none());
        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_all_clears() {
        let manager = TopicManager::new();
        let decl = declaration("/chatter", Text::descriptor());
        let (core, _) = manager
            .publisher_or_insert(&decl, || PublisherCore::new(caller(), decl.clone(), true))
            .unwrap();
        manager.shutdown_all().await;
        assert!(core.is_shutdown());
        assert!(manager.publications().is_empty());
    }
}
