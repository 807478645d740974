//! Request dispatch by peer identity.
//!
//! Each inbound request moves through `resolve -> match -> act`:
//! the peer address is expanded into candidate keys, the first key present
//! in the route table wins, and the route's action produces the response.
//! The table is read once per request and no lock is held while the proxy
//! action talks to the backend.

pub mod proxy;
pub mod redirect;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::routing::{candidate_keys, RouteAction, RouteEntry, RouteTable};

/// Scheme the peer connected with; also used for the outbound target URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn for_connection(tls_terminated: bool) -> Self {
        if tls_terminated {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// `scheme://destination` followed by the original path and query.
pub fn target_url(scheme: Scheme, destination: &str, uri: &Uri) -> String {
    let path = match uri.path() {
        "" => "/",
        path => path,
    };
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{}://{}{path}{query}", scheme.as_str(), destination)
}

/// Stateless request handler sharing the route table with the admin layer.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>, client: reqwest::Client) -> Self {
        Self { routes, client }
    }

    /// First candidate key with a configured route, and that route.
    pub fn match_route(&self, candidates: &[String]) -> Option<(String, RouteEntry)> {
        candidates
            .iter()
            .find_map(|key| self.routes.get(key).map(|entry| (key.clone(), entry)))
    }

    /// Handle one request from `peer`. Every outcome, including failures,
    /// is a response for this request only.
    pub async fn dispatch(&self, peer: SocketAddr, scheme: Scheme, request: Request) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let span = router_tracing::dispatch_request_span!(
            request_id,
            peer,
            request.method(),
            request.uri().path()
        );
        let start = Instant::now();

        let response = match self
            .route(peer, scheme, request, &request_id)
            .instrument(span.clone())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let _enter = span.enter();
                e.into_response()
            }
        };

        span.record("status", response.status().as_u16());
        span.record("latency_ms", start.elapsed().as_millis() as u64);
        response
    }

    async fn route(
        &self,
        peer: SocketAddr,
        scheme: Scheme,
        request: Request,
        request_id: &str,
    ) -> Result<Response, DispatchError> {
        let candidates = candidate_keys(&format!("{}://{}", scheme.as_str(), peer))?;

        let Some((key, entry)) = self.match_route(&candidates) else {
            return Err(DispatchError::NoRouteMatched {
                peer: peer.to_string(),
                candidates,
            });
        };

        let span = tracing::Span::current();
        span.record("route_key", key.as_str());
        span.record("action", entry.action.as_str());
        span.record("destination", entry.to.as_str());

        let url = target_url(scheme, &entry.to, request.uri());

        match entry.action {
            RouteAction::Redirect => Ok(redirect::redirect(&url)),
            RouteAction::Proxy => proxy::forward(&self.client, &url, request, request_id).await,
            RouteAction::Unknown => Err(DispatchError::UnknownActionKind {
                key,
                action: entry.action,
            }),
        }
    }
}

/// Fallback handler for the dispatch listener: every method and path.
///
/// The listener is plaintext, so peers are always addressed as `http`.
pub async fn handle(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    dispatcher
        .dispatch(peer, Scheme::for_connection(false), request)
        .await
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::Router;
    use bytes::Bytes;
    use futures_core::Stream;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::config::ProxyConfig;

    /// Backend that counts calls and echoes what it received.
    struct StubBackend {
        addr: SocketAddr,
        calls: Arc<AtomicUsize>,
    }

    impl StubBackend {
        async fn spawn() -> Self {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();

            let app = Router::new().fallback(move |request: Request| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    echo(request).await
                }
            });

            Self {
                addr: serve(app).await,
                calls,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    async fn echo(request: Request) -> Response {
        if request.uri().path() == "/moved" {
            return (StatusCode::FOUND, [(header::LOCATION, "/elsewhere")]).into_response();
        }

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let custom = parts
            .headers
            .get("x-custom")
            .cloned()
            .unwrap_or_else(|| header::HeaderValue::from_static("missing"));
        let host = parts.headers.get(header::HOST).cloned().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-backend", header::HeaderValue::from_static("stub"));
        headers.insert(
            "x-echo-path",
            parts.uri.path_and_query().unwrap().as_str().parse().unwrap(),
        );
        headers.insert("x-echo-method", parts.method.as_str().parse().unwrap());
        headers.insert("x-echo-custom", custom);
        headers.insert("x-echo-host", host);
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());

        (StatusCode::CREATED, headers, body).into_response()
    }

    fn dispatcher(routes: &[(&str, RouteEntry)]) -> Dispatcher {
        let table = RouteTable::from_routes(
            routes
                .iter()
                .map(|(key, entry)| (key.to_string(), entry.clone())),
        );
        let client = proxy::build_client(&ProxyConfig::default()).unwrap();
        Dispatcher::new(Arc::new(table), client)
    }

    /// Backend response body fed chunk by chunk from a channel. The sender
    /// sees `send` fail once the server drops the body.
    struct ChannelBody(mpsc::Receiver<Result<Bytes, std::io::Error>>);

    impl Stream for ChannelBody {
        type Item = Result<Bytes, std::io::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.0.poll_recv(cx)
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn proxy_to(backend: SocketAddr, config: &ProxyConfig) -> Dispatcher {
        let table = RouteTable::from_routes([(
            "10.0.0.5".to_string(),
            RouteEntry::new(backend.to_string(), RouteAction::Proxy),
        )]);
        Dispatcher::new(Arc::new(table), proxy::build_client(config).unwrap())
    }

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let uri: Uri = "/x/y?z=1".parse().unwrap();
        assert_eq!(
            target_url(Scheme::Http, "backend:80", &uri),
            "http://backend:80/x/y?z=1"
        );

        let uri: Uri = "http://ignored.example".parse().unwrap();
        assert_eq!(
            target_url(Scheme::Https, "backend", &uri),
            "https://backend/"
        );
    }

    #[test]
    fn test_scheme_for_connection() {
        assert_eq!(Scheme::for_connection(false), Scheme::Http);
        assert_eq!(Scheme::for_connection(true), Scheme::Https);
    }

    #[test]
    fn test_match_route_prefers_first_candidate() {
        let dispatcher = dispatcher(&[
            ("127.0.0.1", RouteEntry::new("portless:1", RouteAction::Proxy)),
            ("localhost:9000", RouteEntry::new("ported:1", RouteAction::Proxy)),
        ]);
        let candidates = candidate_keys("http://[::1]:9000").unwrap();

        let (key, entry) = dispatcher.match_route(&candidates).unwrap();
        assert_eq!(key, "localhost:9000");
        assert_eq!(entry.to, "ported:1");
    }

    #[tokio::test]
    async fn test_redirect_to_destination_with_original_path() {
        let dispatcher = dispatcher(&[(
            "127.0.0.1:9000",
            RouteEntry::new("backend:80", RouteAction::Redirect),
        )]);

        let response = dispatcher
            .dispatch(peer("127.0.0.1:9000"), Scheme::Http, get("/x"))
            .await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "http://backend:80/x"
        );
    }

    #[tokio::test]
    async fn test_redirect_preserves_query_and_scheme() {
        let dispatcher = dispatcher(&[(
            "10.1.2.3",
            RouteEntry::new("secure.internal", RouteAction::Redirect),
        )]);

        let response = dispatcher
            .dispatch(peer("10.1.2.3:1234"), Scheme::Https, get("/a/b?c=d&e=f"))
            .await;

        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://secure.internal/a/b?c=d&e=f"
        );
    }

    #[tokio::test]
    async fn test_port_qualified_route_outranks_portless() {
        let dispatcher = dispatcher(&[
            ("10.0.0.5", RouteEntry::new("host-wide:1", RouteAction::Redirect)),
            ("10.0.0.5:54321", RouteEntry::new("port-specific:1", RouteAction::Redirect)),
        ]);

        let response = dispatcher
            .dispatch(peer("10.0.0.5:54321"), Scheme::Http, get("/"))
            .await;
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "http://port-specific:1/"
        );

        let response = dispatcher
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/"))
            .await;
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "http://host-wide:1/"
        );
    }

    #[tokio::test]
    async fn test_loopback_spellings_share_one_route() {
        let dispatcher = dispatcher(&[(
            "localhost",
            RouteEntry::new("dev:3000", RouteAction::Redirect),
        )]);

        for addr in ["[::1]:5555", "127.0.0.1:5555"] {
            let response = dispatcher.dispatch(peer(addr), Scheme::Http, get("/p")).await;
            assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
            assert_eq!(
                response.headers().get(header::LOCATION).unwrap(),
                "http://dev:3000/p"
            );
        }
    }

    #[tokio::test]
    async fn test_proxy_relays_request_and_response() {
        let backend = StubBackend::spawn().await;
        let dispatcher = dispatcher(&[(
            "10.0.0.5",
            RouteEntry::new(backend.addr.to_string(), RouteAction::Proxy),
        )]);

        let request = Request::builder()
            .method("POST")
            .uri("/echo?q=1")
            .header("x-custom", "abc")
            .header(header::HOST, "router.example")
            .body(Body::from("payload bytes"))
            .unwrap();

        let response = dispatcher
            .dispatch(peer("10.0.0.5:54321"), Scheme::Http, request)
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let headers = response.headers().clone();
        assert_eq!(headers.get("x-backend").unwrap(), "stub");
        assert_eq!(headers.get("x-echo-path").unwrap(), "/echo?q=1");
        assert_eq!(headers.get("x-echo-method").unwrap(), "POST");
        assert_eq!(headers.get("x-echo-custom").unwrap(), "abc");
        assert_eq!(
            headers.get("x-echo-host").unwrap(),
            backend.addr.to_string().as_str()
        );
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
        assert_eq!(body_string(response).await, "payload bytes");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_proxy_streams_large_body() {
        let backend = StubBackend::spawn().await;
        let dispatcher = dispatcher(&[(
            "10.0.0.7",
            RouteEntry::new(backend.addr.to_string(), RouteAction::Proxy),
        )]);

        let payload = "x".repeat(4 * 1024 * 1024);
        let request = Request::builder()
            .method("PUT")
            .uri("/upload")
            .body(Body::from(payload.clone()))
            .unwrap();

        let response = dispatcher
            .dispatch(peer("10.0.0.7:4000"), Scheme::Http, request)
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_string(response).await.len(), payload.len());
    }

    #[tokio::test]
    async fn test_proxy_relays_backend_redirect_without_following() {
        let backend = StubBackend::spawn().await;
        let dispatcher = dispatcher(&[(
            "10.0.0.5",
            RouteEntry::new(backend.addr.to_string(), RouteAction::Proxy),
        )]);

        let response = dispatcher
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/moved"))
            .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/elsewhere");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_peer_is_bad_gateway_without_backend_call() {
        let backend = StubBackend::spawn().await;
        let dispatcher = dispatcher(&[(
            "10.0.0.5",
            RouteEntry::new(backend.addr.to_string(), RouteAction::Proxy),
        )]);

        let response = dispatcher
            .dispatch(peer("10.0.0.6:54321"), Scheme::Http, get("/x"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_is_internal_error() {
        let dispatcher = dispatcher(&[(
            "10.0.0.5",
            RouteEntry::new("backend:80", RouteAction::Unknown),
        )]);

        let response = dispatcher
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/"))
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = dispatcher(&[(
            "10.0.0.5",
            RouteEntry::new(addr.to_string(), RouteAction::Proxy),
        )]);

        let response = dispatcher
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_route_changes_apply_to_next_request() {
        let table = Arc::new(RouteTable::new());
        let client = proxy::build_client(&ProxyConfig::default()).unwrap();
        let dispatcher = Dispatcher::new(table.clone(), client);

        let response = dispatcher
            .dispatch(peer("10.0.0.9:1"), Scheme::Http, get("/"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        table.set("10.0.0.9", RouteEntry::new("new:1", RouteAction::Redirect));
        let response = dispatcher
            .dispatch(peer("10.0.0.9:1"), Scheme::Http, get("/"))
            .await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

        table.remove("10.0.0.9");
        let response = dispatcher
            .dispatch(peer("10.0.0.9:1"), Scheme::Http, get("/"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unmatched_error_carries_candidates() {
        let dispatcher = dispatcher(&[]);

        let err = dispatcher
            .route(peer("10.0.0.6:54321"), Scheme::Http, get("/"), "test")
            .await
            .unwrap_err();

        match err {
            DispatchError::NoRouteMatched { peer, candidates } => {
                assert_eq!(peer, "10.0.0.6:54321");
                assert_eq!(candidates, vec!["10.0.0.6:54321", "10.0.0.6"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_proxy_relays_slow_stream_longer_than_read_timeout() {
        let app = Router::new().fallback(|| async {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                for chunk in ["a", "b", "c", "d"] {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                        return;
                    }
                }
            });
            Body::from_stream(ChannelBody(rx))
        });
        let backend = serve(app).await;

        let config = ProxyConfig {
            read_timeout_secs: 1,
            connect_timeout_secs: 1,
        };
        let response = proxy_to(backend, &config)
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/events"))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "abcd");
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_backend_stream() {
        let (closed_tx, closed_rx) = oneshot::channel::<()>();
        let closed = Arc::new(std::sync::Mutex::new(Some(closed_tx)));

        let app = Router::new().fallback(move || {
            let closed = closed.clone();
            async move {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let chunk = Bytes::from(vec![b'x'; 16 * 1024]);
                    while tx.send(Ok(chunk.clone())).await.is_ok() {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    if let Some(closed) = closed.lock().unwrap().take() {
                        let _ = closed.send(());
                    }
                });
                Body::from_stream(ChannelBody(rx))
            }
        });
        let backend = serve(app).await;

        let response = proxy_to(backend, &ProxyConfig::default())
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/download"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut stream = Box::pin(response.into_body().into_data_stream());
        let first = std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await;
        assert!(matches!(first, Some(Ok(_))));

        // The client goes away mid-body.
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("backend kept streaming after the client disconnected")
            .unwrap();
    }

    #[tokio::test]
    async fn test_backend_reset_mid_body_fails_relayed_body() {
        let app = Router::new().fallback(|| async {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let _ = tx.send(Ok(Bytes::from_static(b"partial"))).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = tx
                    .send(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "backend reset",
                    )))
                    .await;
            });
            Body::from_stream(ChannelBody(rx))
        });
        let backend = serve(app).await;

        let response = proxy_to(backend, &ProxyConfig::default())
            .dispatch(peer("10.0.0.5:1"), Scheme::Http, get("/download"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let relayed = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(relayed.is_err());
    }
}
