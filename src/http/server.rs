//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (timeout, request ID, tracing)
//! - Serve plain TCP or TLS through `axum-server` with graceful shutdown
//! - Dispatch each request against the generation it was admitted to
//! - Forward requests to the selected endpoint

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode, Version},
    response::Response,
    routing::any,
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::request::{request_id, upstream_uri, MakeRequestUuid, X_REQUEST_ID};
use crate::http::response::{proxy_error, strip_hop_by_hop};
use crate::http::body::PinnedBody;
use crate::load_balancer::{EndpointGuard, ServerPool};
use crate::observability::metrics;
use crate::switchboard::{Admission, Switchboard};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub switchboard: Arc<Switchboard>,
    pub client: Client<HttpConnector, Body>,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server dispatching through `switchboard`.
    pub fn new(switchboard: Arc<Switchboard>, config: &ProxyConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.timeouts.idle_secs))
            .build(connector);

        let state = AppState { switchboard, client };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `handle` is told to shut down.
    pub async fn serve(
        self,
        listener: std::net::TcpListener,
        tls: Option<RustlsConfig>,
        handle: Handle,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        match tls {
            Some(tls) => {
                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::from_tcp_rustls(listener, tls).handle(handle).serve(app).await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum_server::from_tcp(listener).handle(handle).serve(app).await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Pins a generation, matches a route, runs its chain, and forwards.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(request.headers()).to_string();

    let admission = match state.switchboard.admit() {
        Ok(admission) => admission,
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Request refused");
            metrics::record_request(&method, 503, "none", start_time);
            return proxy_error(StatusCode::SERVICE_UNAVAILABLE, "Proxy is shutting down");
        }
    };

    let generation = Arc::clone(admission.generation());
    let Some(entry) = generation.table().match_request(&request) else {
        tracing::debug!(request_id = %request_id, path = %request.uri().path(), "No route matched");
        metrics::record_request(&method, 404, "none", start_time);
        return proxy_error(StatusCode::NOT_FOUND, "No matching route found");
    };

    tracing::debug!(
        request_id = %request_id,
        route = %entry.name,
        generation = generation.id(),
        path = %request.uri().path(),
        "Proxying request"
    );

    // The admission moves into the forwarded response body; a request
    // answered by an interceptor releases it when the chain returns.
    let response = tokio::select! {
        response = entry.chain.handle(request, |req| forward(&state, &entry.pool, req, &request_id, admission)) => response,
        _ = generation.retired() => {
            tracing::warn!(request_id = %request_id, generation = generation.id(), "Request cancelled by drain deadline");
            proxy_error(StatusCode::SERVICE_UNAVAILABLE, "Request cancelled")
        }
    };

    metrics::record_request(&method, response.status().as_u16(), &entry.name, start_time);
    response
}

/// Select an endpoint from `pool` and forward the request to it.
async fn forward(
    state: &AppState,
    pool: &ServerPool,
    request: Request<Body>,
    request_id: &str,
    admission: Admission,
) -> Response {
    let selection = match pool.next_endpoint(request.headers()) {
        Ok(selection) => selection,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Endpoint selection failed");
            return proxy_error(StatusCode::SERVICE_UNAVAILABLE, "No available endpoints");
        }
    };
    let endpoint = selection.endpoint.track();

    let (mut parts, body) = request.into_parts();
    let Some(uri) = upstream_uri(&endpoint.url, &parts.uri) else {
        tracing::error!(request_id = %request_id, endpoint = %endpoint.address(), "Cannot build upstream URI");
        return proxy_error(StatusCode::BAD_GATEWAY, "Upstream request failed");
    };
    // HTTP/2 requests carry the authority in the URI only
    if !parts.headers.contains_key(header::HOST) {
        if let Some(host) = parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()) {
            parts.headers.insert(header::HOST, host);
        }
    }
    parts.uri = uri;
    // upstream connections are HTTP/1.1 regardless of the client's version
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        parts.headers.insert(X_REQUEST_ID, value);
    }

    tracing::debug!(
        request_id = %request_id,
        endpoint = %endpoint.address(),
        sticky = selection.stuck,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => relay(response, selection.set_cookie, admission, endpoint),
        Err(e) => {
            tracing::error!(request_id = %request_id, endpoint = %endpoint.address(), error = %e, "Upstream error");
            proxy_error(StatusCode::BAD_GATEWAY, "Upstream request failed")
        }
    }
}

/// Convert an upstream response for the client, attaching the affinity cookie.
/// The request stays counted against its generation and endpoint until the
/// body has been relayed.
fn relay(
    response: hyper::Response<Incoming>,
    set_cookie: Option<HeaderValue>,
    admission: Admission,
    endpoint: EndpointGuard,
) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    if let Some(cookie) = set_cookie {
        parts.headers.append(header::SET_COOKIE, cookie);
    }
    Response::from_parts(parts, Body::new(PinnedBody::new(Body::new(body), admission, endpoint)))
}
