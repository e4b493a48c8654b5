//! Transparent reverse proxy for the triggering request.

use anyhow::Context;
use http::header::{HOST, USER_AGENT};
use http::{HeaderValue, Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;

/// Forward a request to `http://{host}` and hand back the upstream
/// response. The scheme is fixed to http: the hostname is the
/// platform's canonical upstream and its router terminates TLS.
pub async fn forward(mut req: Request<Incoming>, host: &str) -> anyhow::Result<Response<Incoming>> {
    let authority = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:80")
    };

    let stream = tokio::net::TcpStream::connect(&authority)
        .await
        .context("connect upstream")?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("upstream handshake")?;

    // Drive the connection until the relayed body completes.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    *req.uri_mut() = path.parse().context("upstream request uri")?;
    req.headers_mut()
        .insert(HOST, HeaderValue::from_str(host).context("host header")?);
    // Explicitly blank User-Agent when the client sent none, so the
    // upstream doesn't see a default injected on its behalf.
    if !req.headers().contains_key(USER_AGENT) {
        req.headers_mut().insert(USER_AGENT, HeaderValue::from_static(""));
    }

    let response = sender
        .send_request(req)
        .await
        .context("forward request upstream")?;
    Ok(response)
}
