//! HTTP server side of the control protocol.

use crate::error::RpcError;
use crate::protocol::{
    error_codes, make_error, make_response, Response, RpcFault, RpcRequest, JSONRPC_VERSION,
};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rosnet_types::topic::parse_uri;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};
use url::Url;

/// Serves control protocol methods.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Handle `method`. `params[0]` is the caller id.
    async fn handle(&self, method: &str, params: &[Value]) -> Result<Response<Value>, RpcFault>;
}

/// A running control endpoint.
pub struct RpcServer {
    local_addr: SocketAddr,
    uri: Url,
    shutdown_tx: watch::Sender<bool>,
}

impl RpcServer {
    /// Bind `bind_addr` and serve `handler` at `POST /`. The advertised URI
    /// uses `advertise_host` and the bound port.
    pub async fn start(
        bind_addr: SocketAddr,
        advertise_host: &str,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<Self, RpcError> {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let uri = parse_uri(&format!("http://{advertise_host}:{}/", local_addr.port()))?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let app = Router::new().route("/", post(dispatch)).with_state(handler);

        info!(addr = %local_addr, uri = %uri, "RPC server listening");
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|v| *v).await;
                debug!(addr = %local_addr, "RPC server received shutdown signal");
            });
            if let Err(e) = server.await {
                error!(error = %e, "RPC server error");
            }
        });

        Ok(Self {
            local_addr,
            uri,
            shutdown_tx,
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn dispatch(State(handler): State<Arc<dyn RpcHandler>>, body: Bytes) -> Json<Value> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Json(make_error(
                None,
                error_codes::PARSE_ERROR,
                &format!("Parse error: {e}"),
            ))
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Json(make_error(
            request.id,
            error_codes::INVALID_REQUEST,
            "Invalid request: jsonrpc must be \"2.0\"",
        ));
    }

    match handler.handle(&request.method, &request.params).await {
        Ok(response) => Json(make_response(request.id, response.to_json())),
        Err(fault) => {
            debug!(method = %request.method, error = %fault.message(), "RPC fault");
            Json(make_error(request.id, fault.code(), &fault.message()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::protocol::{param_str, StatusCode};
    use rosnet_types::GraphName;
    use serde_json::json;
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(
            &self,
            method: &str,
            params: &[Value],
        ) -> Result<Response<Value>, RpcFault> {
            match method {
                "echo" => {
                    let caller = param_str(params, 0, "caller_id")?;
                    let text = param_str(params, 1, "text")?;
                    Ok(Response::success(caller, json!(text)))
                }
                "refuse" => Ok(Response::failure("refused", json!(0))),
                other => Err(RpcFault::MethodNotFound(other.to_string())),
            }
        }
    }

    async fn start() -> (RpcServer, RpcClient) {
        let server = RpcServer::start(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1",
            Arc::new(EchoHandler),
        )
        .await
        .unwrap();
        let client = RpcClient::new(
            server.uri().clone(),
            GraphName::new("/tester").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (server, client) = start().await;
        assert_eq!(server.uri().port(), Some(server.local_addr().port()));

        let response = client.call("echo", vec![json!("hi")]).await.unwrap();
        assert_eq!(response.status, StatusCode::Success);
        assert_eq!(response.message, "/tester");
        assert_eq!(response.value, json!("hi"));

        let refused = client.call("refuse", vec![]).await.unwrap();
        assert_eq!(refused.status, StatusCode::Failure);
    }

    #[tokio::test]
    async fn test_faults() {
        let (_server, client) = start().await;
        match client.call("nope", vec![]).await {
            Err(RpcError::Fault { code, .. }) => assert_eq!(code, error_codes::METHOD_NOT_FOUND),
            other => panic!("unexpected: {other:?}"),
        }
        match client.call("echo", vec![json!(5)]).await {
            Err(RpcError::Fault { code, .. }) => assert_eq!(code, error_codes::INVALID_PARAMS),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (server, _client) = start().await;
        let body: Value = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .post(server.uri().clone())
            .body("{not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["error"]["code"], json!(error_codes::PARSE_ERROR));
    }
}
