//! The opaque message and service capabilities.
//!
//! Concrete message types (normally generated from an IDL) implement
//! [`Message`]; rosnet only moves their bytes and checks their descriptors.

use crate::error::RosResult;
use serde::{Deserialize, Serialize};

/// Checksum value accepted in place of any other.
pub const WILDCARD_MD5: &str = "*";

/// Type identity of a message: `pkg/Type`, schema checksum and definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub type_name: String,
    pub md5sum: String,
    #[serde(default)]
    pub definition: String,
}

impl MessageDescriptor {
    pub fn new(type_name: impl Into<String>, md5sum: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            md5sum: md5sum.into(),
            definition: String::new(),
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    /// Whether a peer announcing `type_name` / `md5sum` can exchange data
    /// with this descriptor.
    pub fn accepts(&self, type_name: &str, md5sum: &str) -> bool {
        let type_ok = self.type_name == type_name || type_name == "*" || self.type_name == "*";
        type_ok && checksums_match(&self.md5sum, md5sum)
    }

    /// Same type name and checksum. The definition text is not compared.
    pub fn same_type(&self, other: &MessageDescriptor) -> bool {
        self.type_name == other.type_name && self.md5sum == other.md5sum
    }
}

/// Checksum equality with `*` matching anything.
pub fn checksums_match(a: &str, b: &str) -> bool {
    a == WILDCARD_MD5 || b == WILDCARD_MD5 || a == b
}

/// A value that can travel over a topic or as a service request/response.
pub trait Message: Send + Sync + Sized + 'static {
    fn descriptor() -> MessageDescriptor;

    fn serialize(&self) -> Vec<u8>;

    fn deserialize(bytes: &[u8]) -> RosResult<Self>;
}

/// Type identity of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub type_name: String,
    pub md5sum: String,
    pub request_type: String,
    pub response_type: String,
}

impl ServiceDescriptor {
    /// A descriptor whose request and response types follow the usual
    /// `<Type>Request` / `<Type>Response` naming.
    pub fn new(type_name: impl Into<String>, md5sum: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            request_type: format!("{type_name}Request"),
            response_type: format!("{type_name}Response"),
            type_name,
            md5sum: md5sum.into(),
        }
    }

    pub fn accepts(&self, type_name: Option<&str>, md5sum: &str) -> bool {
        let type_ok = match type_name {
            Some(t) => t == self.type_name || t == "*",
            None => true,
        };
        type_ok && checksums_match(&self.md5sum, md5sum)
    }

    pub fn same_type(&self, other: &ServiceDescriptor) -> bool {
        self.type_name == other.type_name && self.md5sum == other.md5sum
    }
}

/// A remote procedure: a request type, a response type and their identity.
pub trait Service: Send + Sync + 'static {
    type Request: Message;
    type Response: Message;

    fn descriptor() -> ServiceDescriptor;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_accepts_exact_and_wildcard() {
        let d = MessageDescriptor::new("std_msgs/String", "992ce8a1687cec8c8bd883ec73ca41d1");
        assert!(d.accepts("std_msgs/String", "992ce8a1687cec8c8bd883ec73ca41d1"));
        assert!(d.accepts("std_msgs/String", "*"));
        assert!(!d.accepts("std_msgs/String", "0000"));
        assert!(!d.accepts("std_msgs/Int32", "992ce8a1687cec8c8bd883ec73ca41d1"));

        let wild = MessageDescriptor::new("std_msgs/String", "*");
        assert!(wild.accepts("std_msgs/String", "abc"));
    }

    #[test]
    fn test_same_type_ignores_definition() {
        let a = MessageDescriptor::new("a/B", "1").with_definition("int32 x");
        let b = MessageDescriptor::new("a/B", "1");
        assert!(a.same_type(&b));
        assert!(!a.same_type(&MessageDescriptor::new("a/B", "2")));
    }

    #[test]
    fn test_service_descriptor_names() {
        let d = ServiceDescriptor::new("test_srvs/AddTwoInts", "6a2e34150c00229791cc89ff309fff21");
        assert_eq!(d.request_type, "test_srvs/AddTwoIntsRequest");
        assert_eq!(d.response_type, "test_srvs/AddTwoIntsResponse");
        assert!(d.accepts(None, "6a2e34150c00229791cc89ff309fff21"));
        assert!(!d.accepts(Some("other/Srv"), "6a2e34150c00229791cc89ff309fff21"));
    }
}
