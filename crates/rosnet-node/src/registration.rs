//! Keeps the master informed of what this node provides and consumes.

use crate::endpoint::Role;
use crate::error::{NodeError, NodeResult};
use dashmap::DashSet;
use futures::future::join_all;
use rosnet_rpc::{MasterClient, RpcError};
use rosnet_types::{GraphName, TopicDeclaration};
use std::future::Future;
use tracing::{debug, info, warn};
use url::Url;

/// Performs registrations with the master on the calling task and tracks
/// the ones still outstanding.
pub struct MasterRegistrationAgent {
    master: MasterClient,
    caller_api: Url,
    pending: DashSet<(GraphName, Role)>,
}

impl MasterRegistrationAgent {
    /// `caller_api` is this node's control URI.
    pub fn new(master: MasterClient, caller_api: Url) -> Self {
        Self {
            master,
            caller_api,
            pending: DashSet::new(),
        }
    }

    pub fn master(&self) -> &MasterClient {
        &self.master
    }

    /// True when no registration is outstanding.
    pub fn is_registered(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outstanding registrations.
    pub fn pending(&self) -> Vec<(GraphName, Role)> {
        self.pending.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Forget a registration that failed and was rolled back.
    pub fn cancel(&self, name: &GraphName, role: Role) {
        self.pending.remove(&(name.clone(), role));
    }

    async fn perform<T, F>(&self, name: &GraphName, role: Role, call: F) -> NodeResult<T>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        let key = (name.clone(), role);
        self.pending.insert(key.clone());
        match call.await {
            Ok(value) => {
                self.pending.remove(&key);
                debug!(name = %name, role = ?role, "Registered with master");
                Ok(value)
            }
            Err(e) => {
                warn!(name = %name, role = ?role, error = %e, "Registration failed");
                Err(NodeError::Registration {
                    name: name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Check that the master is reachable under the node's name.
    pub async fn register_node(&self, node_name: &GraphName) -> NodeResult<()> {
        let master_uri = self
            .perform(node_name, Role::Node, self.master.get_uri())
            .await?;
        info!(node = %node_name, master = %master_uri, "Node registered");
        Ok(())
    }

    /// Returns the control URIs of the topic's current subscribers.
    pub async fn register_publisher(&self, topic: &TopicDeclaration) -> NodeResult<Vec<Url>> {
        self.perform(
            &topic.name,
            Role::Publisher,
            self.master.register_publisher(
                &topic.name,
                &topic.descriptor.type_name,
                &self.caller_api,
            ),
        )
        .await
    }

    /// Returns the control URIs of the topic's current publishers.
    pub async fn register_subscriber(&self, topic: &TopicDeclaration) -> NodeResult<Vec<Url>> {
        self.perform(
            &topic.name,
            Role::Subscriber,
            self.master.register_subscriber(
                &topic.name,
                &topic.descriptor.type_name,
                &self.caller_api,
            ),
        )
        .await
    }

    pub async fn register_service(&self, service: &GraphName, service_api: &Url) -> NodeResult<()> {
        self.perform(
            service,
            Role::Service,
            self.master
                .register_service(service, service_api, &self.caller_api),
        )
        .await
    }

    /// Best-effort removal of every registration. Failures are logged.
    pub async fn unregister_all(
        &self,
        publications: &[GraphName],
        subscriptions: &[GraphName],
        services: &[(GraphName, Url)],
    ) {
        let publishers = publications.iter().map(|topic| async move {
            let result = self.master.unregister_publisher(topic, &self.caller_api).await;
            (topic, Role::Publisher, result)
        });
        let subscribers = subscriptions.iter().map(|topic| async move {
            let result = self.master.unregister_subscriber(topic, &self.caller_api).await;
            (topic, Role::Subscriber, result)
        });
        let providers = services.iter().map(|(service, uri)| async move {
            let result = self.master.unregister_service(service, uri).await;
            (service, Role::Service, result)
        });

        let mut results = join_all(publishers).await;
        results.extend(join_all(subscribers).await);
        results.extend(join_all(providers).await);
        for (name, role, result) in results {
            if let Err(e) = result {
                warn!(name = %name, role = ?role, error = %e, "Unregistration failed");
            }
        }
        self.pending.clear();
    }
}
