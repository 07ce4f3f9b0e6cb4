//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::Request,
    Router,
};
use dynamic_proxy::config::ProxyConfig;
use dynamic_proxy::provider::{EndpointSpec, MemoryProvider, MiddlewareDirective, Provider, RawServiceDescriptor};
use dynamic_proxy::Proxy;
use tokio::net::TcpListener;

/// Start a backend on an ephemeral port that answers
/// `"<name> <path> <x-forwarded-prefix or ->"` after `delay`.
pub async fn start_backend(name: &'static str, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(move |req: Request<Body>| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let prefix = req
            .headers()
            .get("x-forwarded-prefix")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        format!("{name} {} {prefix}", req.uri().path())
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend that answers with `chunks` lines, the first at once and
/// each following one after `interval`.
pub async fn start_streaming_backend(chunks: usize, interval: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(move || async move {
        let stream = futures_util::stream::unfold(0usize, move |i| async move {
            if i == chunks {
                return None;
            }
            if i > 0 {
                tokio::time::sleep(interval).await;
            }
            Some((Ok::<_, std::io::Error>(Bytes::from(format!("chunk {i}\n"))), i + 1))
        });
        Body::from_stream(stream)
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn service(name: &str, rule: &str, endpoints: &[(SocketAddr, u32)]) -> RawServiceDescriptor {
    RawServiceDescriptor {
        name: name.to_string(),
        rule: rule.to_string(),
        endpoints: endpoints
            .iter()
            .map(|(addr, weight)| EndpointSpec {
                address: format!("http://{addr}"),
                weight: *weight,
            })
            .collect(),
        middlewares: Vec::new(),
        priority: 0,
        affinity_cookie: None,
    }
}

pub fn directive(kind: &str, option: &str, value: &str) -> MiddlewareDirective {
    MiddlewareDirective {
        kind: kind.to_string(),
        options: BTreeMap::from([(option.to_string(), value.to_string())]),
    }
}

/// Config bound to an ephemeral port with short windows.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.providers.debounce_ms = 50;
    config.lifecycle.drain_grace_secs = 5;
    config.lifecycle.shutdown_grace_secs = 2;
    config
}

/// Start a proxy fed by one memory provider.
pub async fn start_proxy(config: ProxyConfig, descriptors: Vec<RawServiceDescriptor>) -> (Proxy, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new("memory", descriptors));
    let proxy = Proxy::start_with_providers(config, vec![provider.clone() as Arc<dyn Provider>])
        .await
        .expect("proxy starts");
    (proxy, provider)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn url(proxy: &Proxy, path: &str) -> String {
    format!("http://{}{}", proxy.local_addr(), path)
}

/// GET `path` and return (status, body).
pub async fn get(client: &reqwest::Client, proxy: &Proxy, path: &str) -> (u16, String) {
    let res = client.get(url(proxy, path)).send().await.expect("proxy reachable");
    let status = res.status().as_u16();
    (status, res.text().await.unwrap_or_default())
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Wait until the proxy serves generation `id` or later.
pub async fn wait_for_generation(proxy: &Proxy, id: u64) -> bool {
    eventually(|| async move { proxy.switchboard().current().id() >= id }).await
}
