//! Name resolution against a namespace, a node name and a remapping table.

use crate::error::NameError;
use crate::name::{GraphName, PRIVATE_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves relative and private names to global ones.
///
/// Remappings are keyed by the name exactly as the caller spells it and are
/// applied before any other rule.
#[derive(Debug, Clone)]
pub struct NameResolver {
    namespace: GraphName,
    node_name: Option<GraphName>,
    remappings: Arc<HashMap<GraphName, GraphName>>,
}

impl NameResolver {
    /// A resolver for `namespace`, which must be global.
    pub fn new(
        namespace: GraphName,
        remappings: HashMap<GraphName, GraphName>,
    ) -> Result<Self, NameError> {
        if !namespace.is_global() {
            return Err(NameError::NamespaceNotGlobal(namespace.to_string()));
        }
        Ok(Self {
            namespace,
            node_name: None,
            remappings: Arc::new(remappings),
        })
    }

    /// A resolver rooted at `/` with no remappings.
    pub fn root() -> Self {
        Self {
            namespace: GraphName::root(),
            node_name: None,
            remappings: Arc::new(HashMap::new()),
        }
    }

    /// The resolver for a node: relative names resolve in the node's parent
    /// namespace and private names resolve under the node name itself.
    pub fn for_node(
        node_name: &GraphName,
        remappings: HashMap<GraphName, GraphName>,
    ) -> Result<Self, NameError> {
        if !node_name.is_global() {
            return Err(NameError::NamespaceNotGlobal(node_name.to_string()));
        }
        let mut resolver = Self::new(node_name.parent(), remappings)?;
        resolver.node_name = Some(node_name.clone());
        Ok(resolver)
    }

    /// A resolver for the sub-namespace `ns`, sharing this resolver's
    /// remappings and node name.
    pub fn child(&self, ns: &str) -> Result<Self, NameError> {
        let namespace = self.resolve(ns)?;
        Ok(Self {
            namespace,
            node_name: self.node_name.clone(),
            remappings: Arc::clone(&self.remappings),
        })
    }

    pub fn namespace(&self) -> &GraphName {
        &self.namespace
    }

    pub fn node_name(&self) -> Option<&GraphName> {
        self.node_name.as_ref()
    }

    /// Resolve `name` in an explicit global `namespace`.
    ///
    /// Private names are rejected because the namespace carries no node.
    pub fn resolve_in(&self, namespace: &str, name: &str) -> Result<GraphName, NameError> {
        let namespace = GraphName::new(namespace)?;
        if !namespace.is_global() {
            return Err(NameError::NamespaceNotGlobal(namespace.to_string()));
        }
        let name = self.remap(GraphName::new(name)?);
        if name.is_private() {
            return Err(NameError::PrivateNotAllowed(name.to_string()));
        }
        namespace.join(&name)
    }

    /// Resolve `name` in this resolver's namespace.
    pub fn resolve(&self, name: &str) -> Result<GraphName, NameError> {
        let name = self.remap(GraphName::new(name)?);
        if name.is_private() {
            let Some(node_name) = &self.node_name else {
                return Err(NameError::PrivateNotAllowed(name.to_string()));
            };
            let relative = name.as_str().trim_start_matches(PRIVATE_PREFIX);
            return node_name.join(&GraphName::new(relative)?);
        }
        self.namespace.join(&name)
    }

    fn remap(&self, name: GraphName) -> GraphName {
        match self.remappings.get(&name) {
            Some(target) => target.clone(),
            None => name,
        }
    }
}
