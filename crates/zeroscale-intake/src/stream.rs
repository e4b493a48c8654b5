//! Envelope stream contract and the NDJSON-over-HTTP binding.
//!
//! The egress endpoint accepts a shard id (consumer-group identifier)
//! and message-kind selectors, and replies with an unbounded response
//! whose body is newline-delimited JSON envelopes. Consumers sharing a
//! shard id split the firehose between them.

use anyhow::Context;
use async_trait::async_trait;
use http::{Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tracing::debug;

use zeroscale_core::{Envelope, Selector};

/// An open subscription to the egress stream.
#[async_trait]
pub trait EnvelopeStream: Send {
    /// Next batch of envelopes, or `None` once the stream has closed.
    async fn next_batch(&mut self) -> Option<Vec<Envelope>>;
}

/// Factory for [`EnvelopeStream`] subscriptions.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(
        &self,
        shard_id: &str,
        selectors: &[Selector],
    ) -> anyhow::Result<Box<dyn EnvelopeStream>>;
}

/// Production connector: long-lived HTTP GET, envelopes arrive as JSON
/// lines in the response body.
pub struct NdjsonStreamConnector {
    egress_addr: String,
}

impl NdjsonStreamConnector {
    pub fn new(egress_addr: String) -> Self {
        Self {
            egress_addr: egress_addr.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StreamConnector for NdjsonStreamConnector {
    async fn connect(
        &self,
        shard_id: &str,
        selectors: &[Selector],
    ) -> anyhow::Result<Box<dyn EnvelopeStream>> {
        let mut query = format!("shard_id={shard_id}");
        for selector in selectors {
            let kind = match selector {
                Selector::Gauge => "gauge",
                Selector::Timer => "timer",
            };
            query.push_str("&selector=");
            query.push_str(kind);
        }
        let url = format!("{}/v2/read?{query}", self.egress_addr);

        let uri: Uri = url.parse().context("egress url")?;
        let host = uri.host().context("egress url missing host")?.to_string();
        let port = uri.port_u16().unwrap_or(80);
        let authority = format!("{host}:{port}");

        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .context("connect egress endpoint")?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .context("egress handshake")?;

        // Drive the connection for as long as the body is read.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let request = Request::builder()
            .uri(&path)
            .header(http::header::HOST, &authority)
            .body(Empty::<bytes::Bytes>::new())?;

        let response = sender
            .send_request(request)
            .await
            .context("egress subscribe request")?;
        anyhow::ensure!(
            response.status().is_success(),
            "egress endpoint returned {}",
            response.status()
        );

        Ok(Box::new(NdjsonEnvelopeStream {
            body: response.into_body(),
            pending: Vec::new(),
        }))
    }
}

struct NdjsonEnvelopeStream {
    body: Incoming,
    /// Bytes of a line the last frame cut short.
    pending: Vec<u8>,
}

#[async_trait]
impl EnvelopeStream for NdjsonEnvelopeStream {
    async fn next_batch(&mut self) -> Option<Vec<Envelope>> {
        loop {
            let frame = match self.body.frame().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    debug!(error = %e, "egress stream read failed");
                    return None;
                }
                None => return None,
            };

            let Some(data) = frame.data_ref() else {
                continue; // trailers
            };
            self.pending.extend_from_slice(data);

            let batch = drain_lines(&mut self.pending);
            if !batch.is_empty() {
                return Some(batch);
            }
        }
    }
}

/// Parse every complete line out of `pending`, leaving a partial
/// trailing line in place. Malformed lines are skipped.
fn drain_lines(pending: &mut Vec<u8>) -> Vec<Envelope> {
    let mut batch = Vec::new();
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let line = &line[..line.len() - 1];
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Envelope>(line) {
            Ok(envelope) => batch.push(envelope),
            Err(e) => debug!(error = %e, "skipping malformed envelope line"),
        }
    }
    batch
}
