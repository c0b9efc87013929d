//! Control protocol clients for masters and slaves.

use crate::error::RpcError;
use crate::protocol::{
    methods, topic_types_from_json, uri_from_json, uris_from_json, ProtocolDescription,
    Response, RpcRequest, SystemState,
};
use rosnet_types::GraphName;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Untyped client: posts one JSON-RPC request per call, prefixing the
/// caller id to the parameters.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    uri: Url,
    caller_id: GraphName,
}

impl RpcClient {
    pub fn new(uri: Url, caller_id: GraphName, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            uri,
            caller_id,
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn caller_id(&self) -> &GraphName {
        &self.caller_id
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Response<Value>, RpcError> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(json!(self.caller_id.as_str()));
        params.extend(args);
        let request = RpcRequest::new(method, params);

        debug!(uri = %self.uri, method, "RPC call");
        let body: Value = self
            .http
            .post(self.uri.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = body.get("error") {
            return Err(RpcError::Fault {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        let result = body
            .get("result")
            .ok_or_else(|| RpcError::MalformedResponse("missing result".to_string()))?;
        Response::from_json(result)
    }

    /// Call and keep only the value of a successful response.
    async fn call_value(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call(method, args).await?.into_result()
    }
}

/// Typed client for a master.
#[derive(Debug, Clone)]
pub struct MasterClient {
    rpc: RpcClient,
}

impl MasterClient {
    pub fn new(master_uri: Url, caller_id: GraphName, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            rpc: RpcClient::new(master_uri, caller_id, timeout)?,
        })
    }

    pub fn uri(&self) -> &Url {
        self.rpc.uri()
    }

    /// Returns the control URIs of the topic's current subscribers.
    pub async fn register_publisher(
        &self,
        topic: &GraphName,
        type_name: &str,
        caller_api: &Url,
    ) -> Result<Vec<Url>, RpcError> {
        let value = self
            .rpc
            .call_value(
                methods::REGISTER_PUBLISHER,
                vec![json!(topic.as_str()), json!(type_name), json!(caller_api.as_str())],
            )
            .await?;
        uris_from_json(&value)
    }

    /// Returns the number of registrations removed.
    pub async fn unregister_publisher(
        &self,
        topic: &GraphName,
        caller_api: &Url,
    ) -> Result<i64, RpcError> {
        let value = self
            .rpc
            .call_value(
                methods::UNREGISTER_PUBLISHER,
                vec![json!(topic.as_str()), json!(caller_api.as_str())],
            )
            .await?;
        Ok(value.as_i64().unwrap_or_default())
    }

    /// Returns the control URIs of the topic's current publishers.
    pub async fn register_subscriber(
        &self,
        topic: &GraphName,
        type_name: &str,
        caller_api: &Url,
    ) -> Result<Vec<Url>, RpcError> {
        let value = self
            .rpc
            .call_value(
                methods::REGISTER_SUBSCRIBER,
                vec![json!(topic.as_str()), json!(type_name), json!(caller_api.as_str())],
            )
            .await?;
        uris_from_json(&value)
    }

    pub async fn unregister_subscriber(
        &self,
        topic: &GraphName,
        caller_api: &Url,
    ) -> Result<i64, RpcError> {
        let value = self
            .rpc
            .call_value(
                methods::UNREGISTER_SUBSCRIBER,
                vec![json!(topic.as_str()), json!(caller_api.as_str())],
            )
            .await?;
        Ok(value.as_i64().unwrap_or_default())
    }

    pub async fn register_service(
        &self,
        service: &GraphName,
        service_api: &Url,
        caller_api: &Url,
    ) -> Result<(), RpcError> {
        self.rpc
            .call_value(
                methods::REGISTER_SERVICE,
                vec![
                    json!(service.as_str()),
                    json!(service_api.as_str()),
                    json!(caller_api.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn unregister_service(
        &self,
        service: &GraphName,
        service_api: &Url,
    ) -> Result<i64, RpcError> {
        let value = self
            .rpc
            .call_value(
                methods::UNREGISTER_SERVICE,
                vec![json!(service.as_str()), json!(service_api.as_str())],
            )
            .await?;
        Ok(value.as_i64().unwrap_or_default())
    }

    pub async fn lookup_node(&self, node: &GraphName) -> Result<Url, RpcError> {
        let value = self
            .rpc
            .call_value(methods::LOOKUP_NODE, vec![json!(node.as_str())])
            .await?;
        uri_from_json(&value)
    }

    /// Returns the service's `rosrpc://` URI.
    pub async fn lookup_service(&self, service: &GraphName) -> Result<Url, RpcError> {
        let value = self
            .rpc
            .call_value(methods::LOOKUP_SERVICE, vec![json!(service.as_str())])
            .await?;
        uri_from_json(&value)
    }

    /// `(topic, type)` pairs under `subgraph` (empty for all).
    pub async fn get_published_topics(
        &self,
        subgraph: &str,
    ) -> Result<Vec<(String, String)>, RpcError> {
        let value = self
            .rpc
            .call_value(methods::GET_PUBLISHED_TOPICS, vec![json!(subgraph)])
            .await?;
        topic_types_from_json(&value)
    }

    pub async fn get_system_state(&self) -> Result<SystemState, RpcError> {
        let value = self.rpc.call_value(methods::GET_SYSTEM_STATE, vec![]).await?;
        SystemState::from_json(&value)
    }

    pub async fn get_uri(&self) -> Result<Url, RpcError> {
        let value = self.rpc.call_value(methods::GET_URI, vec![]).await?;
        uri_from_json(&value)
    }
}

/// Typed client for a node's control server.
#[derive(Debug, Clone)]
pub struct SlaveClient {
    rpc: RpcClient,
}

impl SlaveClient {
    pub fn new(slave_uri: Url, caller_id: GraphName, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            rpc: RpcClient::new(slave_uri, caller_id, timeout)?,
        })
    }

    pub fn uri(&self) -> &Url {
        self.rpc.uri()
    }

    pub async fn publisher_update(
        &self,
        topic: &GraphName,
        publishers: &[Url],
    ) -> Result<(), RpcError> {
        let uris: Vec<&str> = publishers.iter().map(Url::as_str).collect();
        self.rpc
            .call_value(
                methods::PUBLISHER_UPDATE,
                vec![json!(topic.as_str()), json!(uris)],
            )
            .await?;
        Ok(())
    }

    /// Ask the publisher node for a transport. Each protocol is sent as a
    /// one-element list.
    pub async fn request_topic(
        &self,
        topic: &GraphName,
        protocols: &[&str],
    ) -> Result<ProtocolDescription, RpcError> {
        let protocols: Vec<Value> = protocols.iter().map(|p| json!([p])).collect();
        let value = self
            .rpc
            .call_value(
                methods::REQUEST_TOPIC,
                vec![json!(topic.as_str()), Value::Array(protocols)],
            )
            .await?;
        ProtocolDescription::from_json(&value)
    }

    pub async fn get_pid(&self) -> Result<i64, RpcError> {
        let value = self.rpc.call_value(methods::GET_PID, vec![]).await?;
        value
            .as_i64()
            .ok_or_else(|| RpcError::MalformedResponse(format!("bad pid {value}")))
    }

    pub async fn get_bus_info(&self) -> Result<Vec<Value>, RpcError> {
        let value = self.rpc.call_value(methods::GET_BUS_INFO, vec![]).await?;
        match value {
            Value::Array(items) => Ok(items),
            other => Err(RpcError::MalformedResponse(format!("bad bus info {other}"))),
        }
    }

    pub async fn get_master_uri(&self) -> Result<Url, RpcError> {
        let value = self.rpc.call_value(methods::GET_MASTER_URI, vec![]).await?;
        uri_from_json(&value)
    }

    pub async fn get_publications(&self) -> Result<Vec<(String, String)>, RpcError> {
        let value = self.rpc.call_value(methods::GET_PUBLICATIONS, vec![]).await?;
        topic_types_from_json(&value)
    }

    pub async fn get_subscriptions(&self) -> Result<Vec<(String, String)>, RpcError> {
        let value = self.rpc.call_value(methods::GET_SUBSCRIPTIONS, vec![]).await?;
        topic_types_from_json(&value)
    }

    pub async fn shutdown(&self, message: &str) -> Result<(), RpcError> {
        self.rpc
            .call_value(methods::SHUTDOWN, vec![json!(message)])
            .await?;
        Ok(())
    }
}
