//! Minimal JSON-over-HTTP/1.1 transport shared by the gateway clients.
//!
//! Each call opens one connection, sends one `POST` with a JSON body and
//! reads the whole response. The entire exchange, connect included, runs
//! under the configured timeout.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use fleetmend_core::ProviderError;

const USER_AGENT: &str = concat!("fleetmend/", env!("CARGO_PKG_VERSION"));

/// Address and timeout for one gateway endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    address: String,
    timeout: Duration,
}

impl Gateway {
    /// `address` is `host:port`.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `body` as JSON to `path` and decode the JSON response.
    ///
    /// An empty success body decodes as `null`.
    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, ProviderError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ProviderError::Decode(format!("encode request: {e}")))?;

        let (status, body) = match tokio::time::timeout(self.timeout, self.exchange(path, payload)).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(address = %self.address, %path, "gateway request timed out");
                return Err(ProviderError::Timeout(self.timeout.as_millis() as u64));
            }
        };

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).trim().to_string();
            debug!(address = %self.address, %path, %status, "gateway returned non-2xx");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn exchange(&self, path: &str, payload: Vec<u8>) -> Result<(http::StatusCode, Bytes), ProviderError> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| ProviderError::Transport(format!("connect {}: {e}", self.address)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProviderError::Transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "gateway connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri(path)
            .header(http::header::HOST, self.address.as_str())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::USER_AGENT, USER_AGENT)
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ProviderError::Transport(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProviderError::Transport(format!("send: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProviderError::Transport(format!("read body: {e}")))?
            .to_bytes();

        Ok((status, body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;

    /// Serve `router` on an ephemeral local port and return its address.
    pub(crate) async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn non_success_status_maps_to_api_error() {
        let addr = serve(Router::new().route(
            "/fail",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "throttled") }),
        ))
        .await;
        let gateway = Gateway::new(addr, Duration::from_secs(2));

        let err = gateway
            .post_json::<_, serde_json::Value>("/fail", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProviderError::Api {
                status: 503,
                message: "throttled".to_string()
            }
        );
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let addr = serve(Router::new().route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "{}"
            }),
        ))
        .await;
        let gateway = Gateway::new(addr, Duration::from_millis(50));

        let err = gateway
            .post_json::<_, serde_json::Value>("/slow", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::Timeout(50));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let gateway = Gateway::new(addr, Duration::from_secs(2));

        let err = gateway
            .post_json::<_, serde_json::Value>("/anything", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn undecodable_body_is_decode_error() {
        let addr = serve(Router::new().route("/garbage", post(|| async { "not json" }))).await;
        let gateway = Gateway::new(addr, Duration::from_secs(2));

        let err = gateway
            .post_json::<_, Vec<f64>>("/garbage", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn empty_success_body_decodes_as_null() {
        let addr = serve(Router::new().route("/empty", post(|| async { StatusCode::NO_CONTENT }))).await;
        let gateway = Gateway::new(addr, Duration::from_secs(2));

        let value: serde_json::Value = gateway
            .post_json("/empty", &serde_json::json!({}))
            .await
            .unwrap();

        assert!(value.is_null());
    }
}
