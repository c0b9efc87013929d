//! End-to-end service tests against a real master.

mod common;

use common::{add, start_master, start_node, AddTwoInts, AddTwoIntsRequest, Int};
use futures::future::join_all;
use rosnet_node::{NodeError, ServiceError, ServiceException};
use rosnet_types::{GraphName, Service};
use rosnet_wire::header::{fields, read_header, write_header};
use rosnet_wire::ConnectionHeader;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_add_two_ints_persistent() {
    let master = start_master().await;
    let server_node = start_node("/adder", &master).await;
    let server = server_node
        .create_service_server::<AddTwoInts, _>("add_two_ints", add)
        .await
        .unwrap();
    assert_eq!(server.uri().scheme(), "rosrpc");

    let client_node = start_node("/caller", &master).await;
    let client = client_node
        .service_client::<AddTwoInts>("/add_two_ints", true)
        .await
        .unwrap();
    assert!(client.is_persistent());

    for (a, b) in [(1, 2), (40, 2), (-5, 5)] {
        let sum = client.call(&AddTwoIntsRequest { a, b }).await.unwrap();
        assert_eq!(sum, Int(a + b));
    }
    client.shutdown().await;
    assert!(matches!(
        client.call(&AddTwoIntsRequest { a: 1, b: 1 }).await,
        Err(ServiceError::Closed)
    ));
}

#[tokio::test]
async fn test_add_two_ints_transient() {
    let master = start_master().await;
    let server_node = start_node("/adder", &master).await;
    server_node
        .create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();

    let client_node = start_node("/caller", &master).await;
    let client = client_node
        .service_client::<AddTwoInts>("/add_two_ints", false)
        .await
        .unwrap();
    for i in 0..3 {
        let sum = client.call(&AddTwoIntsRequest { a: i, b: i }).await.unwrap();
        assert_eq!(sum, Int(2 * i));
    }
}

#[tokio::test]
async fn test_persistent_calls_answer_in_order() {
    let master = start_master().await;
    let server_node = start_node("/adder", &master).await;
    server_node
        .create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();
    let client_node = start_node("/caller", &master).await;
    let client = client_node
        .service_client::<AddTwoInts>("/add_two_ints", true)
        .await
        .unwrap();

    let calls = (0..10).map(|i| {
        let client = client.clone();
        async move { client.call(&AddTwoIntsRequest { a: i, b: 100 }).await }
    });
    let results = join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), Int(i as i64 + 100));
    }
}

#[tokio::test]
async fn test_application_error_keeps_session_open() {
    let master = start_master().await;
    let server_node = start_node("/adder", &master).await;
    server_node
        .create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();
    let client_node = start_node("/caller", &master).await;
    let client = client_node
        .service_client::<AddTwoInts>("/add_two_ints", true)
        .await
        .unwrap();

    match client.call(&AddTwoIntsRequest { a: i64::MAX, b: 1 }).await {
        Err(ServiceError::Application(message)) => assert_eq!(message, "overflow"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(
        client.call(&AddTwoIntsRequest { a: 2, b: 3 }).await.unwrap(),
        Int(5)
    );
}

#[tokio::test]
async fn test_closure_response_builder() {
    let master = start_master().await;
    let node = start_node("/adder", &master).await;
    node.create_service_server::<AddTwoInts, _>(
        "/refuse",
        |_: AddTwoIntsRequest| -> Result<Int, ServiceException> {
            Err(ServiceException::new("not today"))
        },
    )
    .await
    .unwrap();
    let client = node.create_service_client::<AddTwoInts>("/refuse").await.unwrap();
    assert!(matches!(
        client.call(&AddTwoIntsRequest { a: 1, b: 1 }).await,
        Err(ServiceError::Application(m)) if m == "not today"
    ));
}

#[tokio::test]
async fn test_unknown_service() {
    let master = start_master().await;
    let node = start_node("/caller", &master).await;
    let err = node
        .create_service_client::<AddTwoInts>("/missing")
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::ServiceNotFound(name) if name.as_str() == "/missing"));
}

#[tokio::test]
async fn test_probe_returns_server_header() {
    let master = start_master().await;
    let node = start_node("/adder", &master).await;
    node.create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();

    let (host, port) = node.data_address();
    let mut stream = TcpStream::connect((host.as_str(), port)).await.unwrap();
    let probe = ConnectionHeader::new()
        .with(fields::CALLER_ID, "/probe")
        .with(fields::SERVICE, "/add_two_ints")
        .with(fields::MD5SUM, "*")
        .with(fields::PROBE, "1");
    write_header(&mut stream, &probe).await.unwrap();
    let reply = read_header(&mut stream).await.unwrap();
    assert_eq!(reply.get(fields::TYPE), Some("test_srvs/AddTwoInts"));
    assert_eq!(
        reply.get(fields::MD5SUM),
        Some(AddTwoInts::descriptor().md5sum.as_str())
    );
}

#[tokio::test]
async fn test_service_handshake_mismatch() {
    let master = start_master().await;
    let node = start_node("/adder", &master).await;
    node.create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();

    let (host, port) = node.data_address();
    let mut stream = TcpStream::connect((host.as_str(), port)).await.unwrap();
    let header = ConnectionHeader::new()
        .with(fields::CALLER_ID, "/caller")
        .with(fields::SERVICE, "/add_two_ints")
        .with(fields::MD5SUM, "0000");
    write_header(&mut stream, &header).await.unwrap();
    let reply = read_header(&mut stream).await.unwrap();
    assert!(reply.get(fields::ERROR).is_some());
}

#[tokio::test]
async fn test_second_server_shares_first() {
    let master = start_master().await;
    let node = start_node("/adder", &master).await;
    let first = node
        .create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();
    let second = node
        .create_service_server::<AddTwoInts, _>("/add_two_ints", add)
        .await
        .unwrap();
    assert!(first.is_same(&second));
    assert_eq!(first.name(), &GraphName::new("/add_two_ints").unwrap());
}
