//! Span builder helpers for origin-router instrumentation.

/// Create the span covering one inbound request on the dispatch listener.
///
/// Usage: `let span = dispatch_request_span!(request_id, peer, method, path);`
///
/// Fields recorded once the route is known:
/// - `route_key`: the candidate key that matched
/// - `action`: `redirect` or `proxy`
/// - `destination`: the route's `host[:port]`
/// - `status`: response status written by the dispatcher
#[macro_export]
macro_rules! dispatch_request_span {
    ($request_id:expr, $peer:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "dispatch_request",
            request_id = %$request_id,
            peer = %$peer,
            method = %$method,
            path = %$path,
            route_key = tracing::field::Empty,
            action = tracing::field::Empty,
            destination = tracing::field::Empty,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create the span for a proxied request to a backend.
///
/// `bytes_streamed` and `total_duration_ms` are recorded by the response body
/// wrapper when the backend stream ends.
#[macro_export]
macro_rules! proxy_forward_span {
    ($request_id:expr, $target:expr) => {
        tracing::info_span!(
            "proxy_forward",
            request_id = %$request_id,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            bytes_streamed = tracing::field::Empty,
            total_duration_ms = tracing::field::Empty,
        )
    };
}

/// Create the span for an administrative route mutation or listing.
#[macro_export]
macro_rules! admin_request_span {
    ($operation:expr, $key:expr) => {
        tracing::info_span!(
            "admin_request",
            operation = %$operation,
            key = %$key,
            status = tracing::field::Empty,
        )
    };
}
