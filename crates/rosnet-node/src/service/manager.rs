//! The node's table of service servers, one per service name.

use super::server::{ServiceHandle, ServiceServerCore};
use crate::error::{NodeError, NodeResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rosnet_types::{GraphName, Service, ServiceDeclaration, ServiceDescriptor};
use std::sync::Arc;
use url::Url;

#[derive(Default)]
pub(crate) struct ServiceManager {
    servers: DashMap<GraphName, Arc<dyn ServiceHandle>>,
}

fn mismatch(name: &GraphName, existing: &ServiceDescriptor, requested: &ServiceDescriptor) -> NodeError {
    NodeError::TypeMismatch {
        name: name.clone(),
        existing: existing.type_name.clone(),
        requested: requested.type_name.clone(),
    }
}

impl ServiceManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The live server for the service, or a new one from `create`.
    /// The flag tells whether it was created.
    pub(crate) fn server_or_insert<S: Service>(
        &self,
        declaration: &ServiceDeclaration,
        create: impl FnOnce() -> ServiceServerCore<S>,
    ) -> NodeResult<(Arc<ServiceServerCore<S>>, bool)> {
        let mut entry = match self.servers.entry(declaration.name.clone()) {
            Entry::Vacant(entry) => {
                let core = Arc::new(create());
                entry.insert(core.clone());
                return Ok((core, true));
            }
            Entry::Occupied(entry) => entry,
        };
        let existing = entry.get();
        if existing.is_shutdown() {
            let core = Arc::new(create());
            entry.insert(core.clone());
            return Ok((core, true));
        }
        let descriptor = &existing.declaration().descriptor;
        if !descriptor.same_type(&declaration.descriptor) {
            return Err(mismatch(&declaration.name, descriptor, &declaration.descriptor));
        }
        let typed = Arc::clone(existing)
            .as_any()
            .downcast::<ServiceServerCore<S>>()
            .map_err(|_| mismatch(&declaration.name, descriptor, &declaration.descriptor))?;
        Ok((typed, false))
    }

    pub(crate) fn server(&self, name: &GraphName) -> Option<Arc<dyn ServiceHandle>> {
        self.servers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|server| !server.is_shutdown())
    }

    /// Remove the entry only if it is still `core`.
    pub(crate) fn remove<S: Service>(&self, name: &GraphName, core: &Arc<ServiceServerCore<S>>) {
        let target = Arc::as_ptr(core) as *const ();
        self.servers
            .remove_if(name, |_, existing| Arc::as_ptr(existing) as *const () == target);
    }

    pub(crate) fn servers(&self) -> Vec<Arc<dyn ServiceHandle>> {
        self.servers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// `(name, uri)` of every live server.
    pub(crate) fn registrations(&self) -> Vec<(GraphName, Url)> {
        self.servers()
            .into_iter()
            .filter(|server| !server.is_shutdown())
            .map(|server| (server.declaration().name.clone(), server.uri().clone()))
            .collect()
    }

    pub(crate) async fn shutdown_all(&self) {
        let servers = self.servers();
        self.servers.clear();
        for server in servers {
            server.shutdown().await;
        }
    }
}
