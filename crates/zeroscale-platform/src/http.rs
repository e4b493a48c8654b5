//! JSON-over-HTTP binding of [`PlatformClient`].
//!
//! Each request opens a fresh http1 connection: the control-plane call
//! rate here is a handful per scaling action, far below where pooling
//! would matter.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::debug;

use zeroscale_core::{AppSummary, RouteEntity};

use crate::client::{PlatformClient, PlatformError, PlatformResult};

/// HTTP client for the platform control plane and routing API.
pub struct HttpPlatform {
    api_url: String,
    routing_api_url: String,
    auth_token: Option<String>,
}

#[derive(Deserialize)]
struct InstanceCountBody {
    running: u32,
}

#[derive(Deserialize)]
struct AppRoutesBody {
    routes: Vec<String>,
}

impl HttpPlatform {
    pub fn new(api_url: String, routing_api_url: String, auth_token: Option<String>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            routing_api_url: routing_api_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    /// Send one request and collect the response body.
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> PlatformResult<Bytes> {
        let uri: Uri = url
            .parse()
            .map_err(|_| PlatformError::InvalidEndpoint(url.to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| PlatformError::InvalidEndpoint(url.to_string()))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);
        let authority = format!("{host}:{port}");

        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut builder = Request::builder()
            .method(method)
            .uri(&path)
            .header(http::header::HOST, &authority)
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?
            .to_bytes();

        debug!(%url, status = status.as_u16(), "platform request finished");
        if !status.is_success() {
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }

    async fn post_routes(&self, path: &str, routes: &[RouteEntity]) -> PlatformResult<()> {
        let body =
            serde_json::to_vec(routes).map_err(|e| PlatformError::Decode(e.to_string()))?;
        let url = format!("{}{path}", self.routing_api_url);
        self.request(Method::POST, &url, Some(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for HttpPlatform {
    async fn start_app(&self, app_id: &str) -> PlatformResult<()> {
        let url = format!("{}/v3/apps/{app_id}/actions/start", self.api_url);
        self.request(Method::POST, &url, None).await?;
        Ok(())
    }

    async fn stop_app(&self, app_id: &str) -> PlatformResult<()> {
        let url = format!("{}/v3/apps/{app_id}/actions/stop", self.api_url);
        self.request(Method::POST, &url, None).await?;
        Ok(())
    }

    async fn get_app_summary(&self, app_id: &str) -> PlatformResult<AppSummary> {
        let url = format!("{}/v3/apps/{app_id}/summary", self.api_url);
        let bytes = self.request(Method::GET, &url, None).await?;
        serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(e.to_string()))
    }

    async fn get_running_instance_count(&self, app_id: &str) -> PlatformResult<u32> {
        let url = format!("{}/v3/apps/{app_id}/instances", self.api_url);
        let bytes = self.request(Method::GET, &url, None).await?;
        let body: InstanceCountBody =
            serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(body.running)
    }

    async fn get_app_routes(&self, app_id: &str) -> PlatformResult<Vec<String>> {
        let url = format!("{}/v3/apps/{app_id}/routes", self.api_url);
        let bytes = self.request(Method::GET, &url, None).await?;
        let body: AppRoutesBody =
            serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(body.routes)
    }

    async fn register_routes(&self, routes: &[RouteEntity]) -> PlatformResult<()> {
        self.post_routes("/v1/routes", routes).await
    }

    async fn unregister_routes(&self, routes: &[RouteEntity]) -> PlatformResult<()> {
        self.post_routes("/v1/routes/remove", routes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::service_fn;

    /// One-shot http1 server returning a canned JSON body.
    async fn serve_once(body: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let svc = service_fn(move |_req| async move {
                Ok::<_, hyper::Error>(hyper::Response::new(Full::new(Bytes::from(body))))
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, svc)
                .await;
        });
        addr
    }

    #[tokio::test]
    async fn summary_decodes_platform_state() {
        let addr = serve_once("{\"state\":\"STOPPED\"}").await;
        let platform = HttpPlatform::new(format!("http://{addr}"), format!("http://{addr}"), None);

        let summary = platform.get_app_summary("app-1").await.unwrap();
        assert_eq!(summary.state, zeroscale_core::AppState::Stopped);
    }

    #[tokio::test]
    async fn instance_count_decodes() {
        let addr = serve_once("{\"running\":2}").await;
        let platform = HttpPlatform::new(format!("http://{addr}"), format!("http://{addr}"), None);

        assert_eq!(platform.get_running_instance_count("app-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Nothing listens on port 1.
        let platform = HttpPlatform::new(
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:1".to_string(),
            None,
        );
        let err = platform.start_app("app-1").await.unwrap_err();
        assert!(matches!(err, PlatformError::Transport(_)));
    }

    #[tokio::test]
    async fn garbage_url_is_an_endpoint_error() {
        let platform = HttpPlatform::new("not a url".to_string(), String::new(), None);
        let err = platform.get_app_summary("app-1").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidEndpoint(_)));
    }
}
