#![allow(dead_code)]

use rosnet_master::MasterServer;
use rosnet_node::{Node, ServiceException};
use rosnet_types::config::NodeConfig;
use rosnet_types::{Message, MessageDescriptor, RosError, RosResult, Service, ServiceDescriptor};
use std::future::Future;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text(pub String);

impl Message for Text {
    fn descriptor() -> MessageDescriptor {
        MessageDescriptor::new("std_msgs/String", "992ce8a1687cec8c8bd883ec73ca41d1")
            .with_definition("string data\n")
    }

    fn serialize(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    fn deserialize(bytes: &[u8]) -> RosResult<Self> {
        String::from_utf8(bytes.to_vec())
            .map(Text)
            .map_err(|e| RosError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int(pub i64);

fn read_i64(bytes: &[u8]) -> RosResult<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| RosError::Deserialization(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(i64::from_le_bytes(raw))
}

impl Message for Int {
    fn descriptor() -> MessageDescriptor {
        MessageDescriptor::new("std_msgs/Int64", "34add168574510e6e17f5d23ecc077ef")
    }

    fn serialize(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    fn deserialize(bytes: &[u8]) -> RosResult<Self> {
        read_i64(bytes).map(Int)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddTwoIntsRequest {
    pub a: i64,
    pub b: i64,
}

impl Message for AddTwoIntsRequest {
    fn descriptor() -> MessageDescriptor {
        MessageDescriptor::new("test_srvs/AddTwoIntsRequest", "36d09b846be0b371c5f190354dd3153e")
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = self.a.to_le_bytes().to_vec();
        out.extend_from_slice(&self.b.to_le_bytes());
        out
    }

    fn deserialize(bytes: &[u8]) -> RosResult<Self> {
        if bytes.len() != 16 {
            return Err(RosError::Deserialization(format!(
                "expected 16 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            a: read_i64(&bytes[..8])?,
            b: read_i64(&bytes[8..])?,
        })
    }
}

pub struct AddTwoInts;

impl Service for AddTwoInts {
    type Request = AddTwoIntsRequest;
    type Response = Int;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new("test_srvs/AddTwoInts", "6a2e34150c00229791cc89ff309fff21")
    }
}

/// Adds, failing on overflow.
pub fn add(request: AddTwoIntsRequest) -> Result<Int, ServiceException> {
    request
        .a
        .checked_add(request.b)
        .map(Int)
        .ok_or_else(|| ServiceException::new("overflow"))
}

pub async fn start_master() -> MasterServer {
    MasterServer::start_on("127.0.0.1:0".parse().unwrap(), "127.0.0.1")
        .await
        .unwrap()
}

pub fn config(name: &str, master: &MasterServer) -> NodeConfig {
    let mut config = NodeConfig::new(name, master.uri().as_str());
    config.rpc_timeout_secs = 5;
    config
}

pub async fn start_node(name: &str, master: &MasterServer) -> Node {
    Node::start(config(name, master)).await.unwrap()
}

/// Poll `check` until it holds, failing the test after [`TIMEOUT`].
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached in time");
}
