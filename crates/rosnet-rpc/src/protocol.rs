//! Wire shapes of the control protocol.

use crate::error::RpcError;
use rosnet_types::topic::parse_uri;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names served by masters and slaves.
pub mod methods {
    pub const REGISTER_PUBLISHER: &str = "registerPublisher";
    pub const UNREGISTER_PUBLISHER: &str = "unregisterPublisher";
    pub const REGISTER_SUBSCRIBER: &str = "registerSubscriber";
    pub const UNREGISTER_SUBSCRIBER: &str = "unregisterSubscriber";
    pub const REGISTER_SERVICE: &str = "registerService";
    pub const UNREGISTER_SERVICE: &str = "unregisterService";
    pub const LOOKUP_NODE: &str = "lookupNode";
    pub const LOOKUP_SERVICE: &str = "lookupService";
    pub const GET_PUBLISHED_TOPICS: &str = "getPublishedTopics";
    pub const GET_SYSTEM_STATE: &str = "getSystemState";
    pub const GET_URI: &str = "getUri";

    pub const PUBLISHER_UPDATE: &str = "publisherUpdate";
    pub const REQUEST_TOPIC: &str = "requestTopic";
    pub const GET_PID: &str = "getPid";
    pub const GET_BUS_INFO: &str = "getBusInfo";
    pub const GET_MASTER_URI: &str = "getMasterUri";
    pub const GET_PUBLICATIONS: &str = "getPublications";
    pub const GET_SUBSCRIPTIONS: &str = "getSubscriptions";
    pub const SHUTDOWN: &str = "shutdown";
}

/// JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(json!(uuid::Uuid::new_v4().to_string())),
            method: method.to_string(),
            params,
        }
    }
}

/// Build a JSON-RPC 2.0 success response.
pub fn make_response(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Build a JSON-RPC 2.0 error response.
pub fn make_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Problems with a call itself rather than with what it asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcFault {
    MethodNotFound(String),
    InvalidParams(String),
}

impl RpcFault {
    pub fn code(&self) -> i64 {
        match self {
            RpcFault::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            RpcFault::InvalidParams(_) => error_codes::INVALID_PARAMS,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RpcFault::MethodNotFound(method) => format!("Method not found: {method}"),
            RpcFault::InvalidParams(reason) => format!("Invalid params: {reason}"),
        }
    }
}

/// First element of every result triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Error,
    Failure,
    Success,
}

impl StatusCode {
    pub fn as_i64(self) -> i64 {
        match self {
            StatusCode::Error => -1,
            StatusCode::Failure => 0,
            StatusCode::Success => 1,
        }
    }

    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            -1 => Some(StatusCode::Error),
            0 => Some(StatusCode::Failure),
            1 => Some(StatusCode::Success),
            _ => None,
        }
    }
}

/// A `[statusCode, statusMessage, value]` result.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub status: StatusCode,
    pub message: String,
    pub value: T,
}

impl<T> Response<T> {
    pub fn success(message: impl Into<String>, value: T) -> Self {
        Self {
            status: StatusCode::Success,
            message: message.into(),
            value,
        }
    }

    pub fn failure(message: impl Into<String>, value: T) -> Self {
        Self {
            status: StatusCode::Failure,
            message: message.into(),
            value,
        }
    }

    pub fn error(message: impl Into<String>, value: T) -> Self {
        Self {
            status: StatusCode::Error,
            message: message.into(),
            value,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Success
    }

    /// The value of a successful response, or [`RpcError::Remote`].
    pub fn into_result(self) -> Result<T, RpcError> {
        if self.is_success() {
            Ok(self.value)
        } else {
            Err(RpcError::Remote {
                status: self.status,
                message: self.message,
            })
        }
    }
}

impl Response<Value> {
    pub fn to_json(&self) -> Value {
        json!([self.status.as_i64(), self.message, self.value])
    }

    pub fn from_json(result: &Value) -> Result<Self, RpcError> {
        let triple = result
            .as_array()
            .filter(|a| a.len() == 3)
            .ok_or_else(|| RpcError::MalformedResponse(format!("expected a triple, got {result}")))?;
        let status = triple[0]
            .as_i64()
            .and_then(StatusCode::from_i64)
            .ok_or_else(|| RpcError::MalformedResponse(format!("bad status code {}", triple[0])))?;
        let message = triple[1].as_str().unwrap_or_default().to_string();
        Ok(Self {
            status,
            message,
            value: triple[2].clone(),
        })
    }
}

/// A negotiated transport: `[name, host, port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDescription {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl ProtocolDescription {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn to_json(&self) -> Value {
        json!([self.name, self.host, self.port])
    }

    pub fn from_json(value: &Value) -> Result<Self, RpcError> {
        let malformed = || RpcError::MalformedResponse(format!("bad protocol description {value}"));
        let parts = value.as_array().filter(|a| a.len() >= 3).ok_or_else(malformed)?;
        let name = parts[0].as_str().ok_or_else(malformed)?;
        let host = parts[1].as_str().ok_or_else(malformed)?;
        let port = parts[2]
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(malformed)?;
        Ok(Self::new(name, host, port))
    }
}

/// `[name, [node, ...]]` entries.
pub type NameNodes = Vec<(String, Vec<String>)>;

/// Snapshot of every registration held by a master.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemState {
    pub publishers: NameNodes,
    pub subscribers: NameNodes,
    pub services: NameNodes,
}

impl SystemState {
    pub fn to_json(&self) -> Value {
        json!([self.publishers, self.subscribers, self.services])
    }

    pub fn from_json(value: &Value) -> Result<Self, RpcError> {
        let (publishers, subscribers, services): (NameNodes, NameNodes, NameNodes) =
            serde_json::from_value(value.clone())?;
        Ok(Self {
            publishers,
            subscribers,
            services,
        })
    }
}

/// `[[name, type], ...]` as returned by `getPublishedTopics` and friends.
pub fn topic_types_from_json(value: &Value) -> Result<Vec<(String, String)>, RpcError> {
    Ok(serde_json::from_value(value.clone())?)
}

/// A list of URI strings.
pub fn uris_from_json(value: &Value) -> Result<Vec<Url>, RpcError> {
    let items = value
        .as_array()
        .ok_or_else(|| RpcError::MalformedResponse(format!("expected a URI list, got {value}")))?;
    items.iter().map(uri_from_json).collect()
}

pub fn uri_from_json(value: &Value) -> Result<Url, RpcError> {
    let text = value
        .as_str()
        .ok_or_else(|| RpcError::MalformedResponse(format!("expected a URI, got {value}")))?;
    Ok(parse_uri(text)?)
}

/// String parameter `index`.
pub fn param_str<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, RpcFault> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFault::InvalidParams(format!("parameter {index} ({name}) must be a string")))
}

/// Array parameter `index`.
pub fn param_array<'a>(
    params: &'a [Value],
    index: usize,
    name: &str,
) -> Result<&'a Vec<Value>, RpcFault> {
    params
        .get(index)
        .and_then(Value::as_array)
        .ok_or_else(|| RpcFault::InvalidParams(format!("parameter {index} ({name}) must be an array")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_triple() {
        let response = Response::success("ok", json!(["a"]));
        assert_eq!(response.to_json(), json!([1, "ok", ["a"]]));
        let parsed = Response::from_json(&json!([-1, "bad", 0])).unwrap();
        assert_eq!(parsed.status, StatusCode::Error);
        assert!(matches!(
            parsed.into_result(),
            Err(RpcError::Remote {
                status: StatusCode::Error,
                ..
            })
        ));
    }

    #[test]
    fn test_response_rejects_non_triple() {
        assert!(Response::from_json(&json!([1, "x"])).is_err());
        assert!(Response::from_json(&json!([7, "x", 0])).is_err());
    }

    #[test]
    fn test_protocol_description() {
        let desc = ProtocolDescription::new("TCPROS", "127.0.0.1", 4321);
        assert_eq!(desc.to_json(), json!(["TCPROS", "127.0.0.1", 4321]));
        assert_eq!(ProtocolDescription::from_json(&desc.to_json()).unwrap(), desc);
        assert!(ProtocolDescription::from_json(&json!(["TCPROS", "h", 70000])).is_err());
    }

    #[test]
    fn test_system_state_shape() {
        let state = SystemState {
            publishers: vec![("/chatter".into(), vec!["/talker".into()])],
            subscribers: vec![],
            services: vec![("/add".into(), vec!["/server".into()])],
        };
        let value = state.to_json();
        assert_eq!(
            value,
            json!([[["/chatter", ["/talker"]]], [], [["/add", ["/server"]]]])
        );
        assert_eq!(SystemState::from_json(&value).unwrap(), state);
    }

    #[test]
    fn test_params() {
        let params = vec![json!("/caller"), json!(["x"]), json!(3)];
        assert_eq!(param_str(&params, 0, "caller_id").unwrap(), "/caller");
        assert_eq!(param_array(&params, 1, "list").unwrap().len(), 1);
        assert!(matches!(
            param_str(&params, 2, "n"),
            Err(RpcFault::InvalidParams(_))
        ));
        assert!(param_str(&params, 5, "missing").is_err());
    }

    #[test]
    fn test_envelopes() {
        let ok = make_response(Some(json!(1)), json!([1, "", 0]));
        assert_eq!(ok["result"], json!([1, "", 0]));
        let err = make_error(None, error_codes::METHOD_NOT_FOUND, "nope");
        assert_eq!(err["error"]["code"], json!(-32601));
    }
}
