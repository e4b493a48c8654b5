//! The listener HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http::header::HOST;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use zeroscale_core::ErrorResponse;

use crate::proxy;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Capability wrapping `ScalingEngine::start_app`.
pub type StartAppFn = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Capability wrapping the route manager's host→app lookup.
pub type ResolveAppFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// HTTP server that intercepts traffic for stopped apps.
pub struct RouteListener {
    listener: TcpListener,
    start_app: StartAppFn,
    resolve_app: ResolveAppFn,
}

impl RouteListener {
    /// Bind the listening socket up front so startup failures surface
    /// before any background task runs.
    pub async fn bind(
        bind_addr: SocketAddr,
        start_app: StartAppFn,
        resolve_app: ResolveAppFn,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .context("failed to bind route listener")?;
        Ok(Self {
            listener,
            start_app,
            resolve_app,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("listener local addr")
    }

    /// Serve until the shutdown signal. One task per connection, http1.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "route listener listening");

        let listener = self.listener;
        let start_app = self.start_app;
        let resolve_app = self.resolve_app;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted.context("accept failed")?;
                    let start_app = start_app.clone();
                    let resolve_app = resolve_app.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let start_app = start_app.clone();
                            let resolve_app = resolve_app.clone();
                            async move {
                                Ok::<_, hyper::Error>(hijack(req, start_app, resolve_app).await)
                            }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                            debug!(%peer_addr, error = %e, "listener connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("route listener shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Start the app behind the requested hostname, then proxy the request.
async fn hijack(
    req: Request<Incoming>,
    start_app: StartAppFn,
    resolve_app: ResolveAppFn,
) -> Response<ResponseBody> {
    let Some(host) = request_host(&req) else {
        info!("request without a host header");
        return scaling_error_response();
    };

    let Some(app_id) = resolve_app(&host) else {
        info!(%host, "no app found for route");
        return scaling_error_response();
    };
    debug!(%app_id, %host, "intercepted request for stopped app");

    if let Err(e) = start_app(app_id.clone()).await {
        error!(%app_id, error = %e, "failed to start application");
        return scaling_error_response();
    }

    match proxy::forward(req, &host).await {
        Ok(response) => response.map(|body| body.boxed()),
        Err(e) => {
            error!(%app_id, %host, error = %e, "failed to proxy request upstream");
            scaling_error_response()
        }
    }
}

fn request_host(req: &Request<Incoming>) -> Option<String> {
    if let Some(value) = req.headers().get(HOST) {
        return value.to_str().ok().map(str::to_string);
    }
    req.uri().host().map(str::to_string)
}

/// The listener's single failure surface: any lookup, scaling or proxy
/// problem is an infrastructure error to the caller.
fn scaling_error_response() -> Response<ResponseBody> {
    let body = serde_json::to_vec(&ErrorResponse {
        code: "Internal-server-error".to_string(),
        message: "Error taking scaling action".to_string(),
    })
    .unwrap_or_default();

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .unwrap()
}
