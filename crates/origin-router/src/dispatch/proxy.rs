//! Transparent forwarding to a route's destination.
//!
//! Bodies are piped in both directions as byte streams; neither the inbound
//! request nor the backend response is ever materialised, so memory use does
//! not depend on payload size and backpressure flows end to end.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_core::Stream;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::error::DispatchError;

/// Headers scoped to a single connection; never relayed in either direction.
/// `host` is rebuilt from the destination.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Outbound client shared by every proxied request.
///
/// Redirects are not followed (a backend's 3xx goes back to the client as
/// is) and environment proxy settings are ignored. There is no total
/// request timeout: only connecting and gaps between reads are bounded, so
/// long downloads and event streams relay in full.
pub fn build_client(config: &ProxyConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .read_timeout(Duration::from_secs(config.read_timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
}

/// Backend body relayed to the client.
///
/// Passes chunks through untouched, records how much was streamed once the
/// backend finishes, and logs copy failures. Dropping it before the end (the
/// client went away) drops the backend response and closes that connection.
struct RelayBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    span: tracing::Span,
    start: Instant,
    bytes_streamed: u64,
    finished: bool,
}

impl Stream for RelayBody {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_streamed += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                let _enter = self.span.enter();
                tracing::warn!(
                    error = %e,
                    bytes_streamed = self.bytes_streamed,
                    "Error copying response body"
                );
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                self.span.record("bytes_streamed", self.bytes_streamed);
                self.span
                    .record("total_duration_ms", self.start.elapsed().as_millis() as u64);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        if !self.finished {
            let _enter = self.span.enter();
            tracing::debug!(
                bytes_streamed = self.bytes_streamed,
                "Client disconnected before response body completed, abandoning backend stream"
            );
        }
    }
}

/// Forward `request` to `url` with the same method, headers and body, and
/// relay the backend's status, headers and body.
///
/// Fails before anything is written to the client if the outbound request
/// cannot be built or the backend cannot be reached.
pub async fn forward(
    client: &reqwest::Client,
    url: &str,
    request: Request,
    request_id: &str,
) -> Result<Response, DispatchError> {
    let target = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(url);
    let span = router_tracing::proxy_forward_span!(request_id, target);

    relay(client, url, request).instrument(span).await
}

async fn relay(
    client: &reqwest::Client,
    url: &str,
    request: Request,
) -> Result<Response, DispatchError> {
    let start = Instant::now();
    let (parts, body) = request.into_parts();

    let mut req_builder = client.request(parts.method, url);

    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        req_builder = req_builder.header(name, value);
    }

    // A finished body (GET, HEAD, empty POST) must not turn into an empty
    // chunked upload.
    if !body.is_end_stream() {
        req_builder = req_builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let outbound = req_builder
        .build()
        .map_err(|source| DispatchError::OutboundRequest {
            url: url.to_string(),
            source,
        })?;

    let upstream = client.execute(outbound).await.map_err(|source| {
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);
        DispatchError::OutboundTransport {
            url: url.to_string(),
            source,
        }
    })?;

    let status = upstream.status();
    let latency = start.elapsed().as_millis() as u64;
    tracing::Span::current().record("latency_ms", latency);
    tracing::Span::current().record("status", status.as_u16());

    tracing::info!(
        status = status.as_u16(),
        latency_ms = latency,
        "Forward complete"
    );

    let mut response_builder = Response::builder().status(status);
    for (name, value) in upstream.headers().iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        response_builder = response_builder.header(name, value);
    }

    let body = RelayBody {
        inner: Box::pin(upstream.bytes_stream()),
        span: tracing::Span::current(),
        start,
        bytes_streamed: 0,
        finished: false,
    };

    Ok(response_builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }))
}
