//! Master control API tests.
//!
//! Runs a real master on a random port and drives it with `MasterClient`.
//! A recording slave endpoint observes the `publisherUpdate` pushes.

use async_trait::async_trait;
use rosnet_master::MasterServer;
use rosnet_rpc::protocol::{methods, param_array, param_str};
use rosnet_rpc::{MasterClient, Response, RpcError, RpcFault, RpcHandler, RpcServer, StatusCode};
use rosnet_types::topic::{parse_uri, rosrpc_uri};
use rosnet_types::GraphName;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(5);

fn name(s: &str) -> GraphName {
    GraphName::new(s).unwrap()
}

/// Records every `publisherUpdate` it receives.
struct RecordingSlave {
    updates: mpsc::UnboundedSender<(String, Vec<String>)>,
}

#[async_trait]
impl RpcHandler for RecordingSlave {
    async fn handle(&self, method: &str, params: &[Value]) -> Result<Response<Value>, RpcFault> {
        match method {
            methods::PUBLISHER_UPDATE => {
                let topic = param_str(params, 1, "topic")?.to_string();
                let publishers = param_array(params, 2, "publishers")?
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                let _ = self.updates.send((topic, publishers));
                Ok(Response::success("", json!(0)))
            }
            other => Err(RpcFault::MethodNotFound(other.to_string())),
        }
    }
}

async fn start_master() -> MasterServer {
    MasterServer::start_on("127.0.0.1:0".parse().unwrap(), "127.0.0.1")
        .await
        .unwrap()
}

fn client(master: &MasterServer, caller: &str) -> MasterClient {
    MasterClient::new(master.uri().clone(), name(caller), TIMEOUT).unwrap()
}

async fn start_recording_slave() -> (RpcServer, mpsc::UnboundedReceiver<(String, Vec<String>)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let server = RpcServer::start(
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1",
        Arc::new(RecordingSlave { updates: tx }),
    )
    .await
    .unwrap();
    (server, rx)
}

#[tokio::test]
async fn test_get_uri() {
    let master = start_master().await;
    let uri = client(&master, "/probe").get_uri().await.unwrap();
    assert_eq!(&uri, master.uri());
}

#[tokio::test]
async fn test_register_publisher_pushes_update_to_subscribers() {
    let master = start_master().await;
    let (slave, mut updates) = start_recording_slave().await;

    let listener = client(&master, "/listener");
    let publishers = listener
        .register_subscriber(&name("/chatter"), "std_msgs/String", slave.uri())
        .await
        .unwrap();
    assert!(publishers.is_empty());

    let talker_api = parse_uri("http://127.0.0.1:45001/").unwrap();
    let talker = client(&master, "/talker");
    let subscribers = talker
        .register_publisher(&name("/chatter"), "std_msgs/String", &talker_api)
        .await
        .unwrap();
    assert_eq!(subscribers, vec![slave.uri().clone()]);

    let (topic, uris) = tokio::time::timeout(TIMEOUT, updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic, "/chatter");
    assert_eq!(uris, vec![talker_api.to_string()]);

    // unregistering pushes the remaining (empty) publisher list
    assert_eq!(
        talker
            .unregister_publisher(&name("/chatter"), &talker_api)
            .await
            .unwrap(),
        1
    );
    let (_, uris) = tokio::time::timeout(TIMEOUT, updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(uris.is_empty());
}

#[tokio::test]
async fn test_register_subscriber_returns_publishers() {
    let master = start_master().await;
    let talker_api = parse_uri("http://127.0.0.1:45002/").unwrap();
    client(&master, "/talker")
        .register_publisher(&name("/chatter"), "std_msgs/String", &talker_api)
        .await
        .unwrap();

    let listener_api = parse_uri("http://127.0.0.1:45003/").unwrap();
    let publishers = client(&master, "/listener")
        .register_subscriber(&name("/chatter"), "std_msgs/String", &listener_api)
        .await
        .unwrap();
    assert_eq!(publishers, vec![talker_api]);
}

#[tokio::test]
async fn test_type_mismatch_is_error_status() {
    let master = start_master().await;
    let api = parse_uri("http://127.0.0.1:45004/").unwrap();
    client(&master, "/a")
        .register_publisher(&name("/t"), "std_msgs/String", &api)
        .await
        .unwrap();
    let err = client(&master, "/b")
        .register_subscriber(&name("/t"), "std_msgs/Int32", &api)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::Remote {
            status: StatusCode::Error,
            ..
        }
    ));
}

#[tokio::test]
async fn test_relative_names_resolve_in_caller_namespace() {
    let master = start_master().await;
    let api = parse_uri("http://127.0.0.1:45005/").unwrap();
    client(&master, "/robot/talker")
        .register_publisher(&name("chatter"), "std_msgs/String", &api)
        .await
        .unwrap();
    let topics = client(&master, "/probe")
        .get_published_topics("")
        .await
        .unwrap();
    assert_eq!(
        topics,
        vec![("/robot/chatter".to_string(), "std_msgs/String".to_string())]
    );
}

#[tokio::test]
async fn test_services_and_lookups() {
    let master = start_master().await;
    let server = client(&master, "/adder");
    let caller_api = parse_uri("http://127.0.0.1:45006/").unwrap();
    let service_api: Url = rosrpc_uri("127.0.0.1", 45007).unwrap();
    server
        .register_service(&name("/add_two_ints"), &service_api, &caller_api)
        .await
        .unwrap();

    let probe = client(&master, "/probe");
    assert_eq!(
        probe.lookup_service(&name("/add_two_ints")).await.unwrap(),
        service_api
    );
    assert_eq!(probe.lookup_node(&name("/adder")).await.unwrap(), caller_api);
    assert!(probe.lookup_node(&name("/nobody")).await.is_err());

    let state = probe.get_system_state().await.unwrap();
    assert_eq!(
        state.services,
        vec![("/add_two_ints".to_string(), vec!["/adder".to_string()])]
    );

    let stale = rosrpc_uri("127.0.0.1", 1).unwrap();
    assert_eq!(
        server
            .unregister_service(&name("/add_two_ints"), &stale)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        server
            .unregister_service(&name("/add_two_ints"), &service_api)
            .await
            .unwrap(),
        1
    );
    assert!(probe.lookup_service(&name("/add_two_ints")).await.is_err());
}

#[tokio::test]
async fn test_unknown_method_is_fault() {
    let master = start_master().await;
    let rpc = rosnet_rpc::RpcClient::new(master.uri().clone(), name("/probe"), TIMEOUT).unwrap();
    assert!(matches!(
        rpc.call("noSuchMethod", vec![]).await,
        Err(RpcError::Fault { code: -32601, .. })
    ));
}
