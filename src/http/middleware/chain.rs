//! Interceptor chain.
//!
//! A chain is compiled once per route and never modified afterwards. Each
//! interceptor either lets the request continue (possibly rewritten) or
//! answers it directly, in which case the remaining interceptors and the
//! terminal handler are skipped.

use std::fmt;
use std::future::Future;

use axum::{body::Body, http::Request, response::Response};

/// Decision taken by an interceptor.
#[derive(Debug)]
pub enum Flow {
    /// Hand the request to the next stage.
    Continue,
    /// Answer the request now.
    Respond(Response),
}

/// A request interceptor.
pub trait Interceptor: Send + Sync + fmt::Debug {
    /// Short name used in logs and the admin API.
    fn name(&self) -> &'static str;

    /// Inspect or rewrite the request.
    fn intercept(&self, req: &mut Request<Body>) -> Flow;
}

/// Ordered, immutable list of interceptors.
#[derive(Debug, Default)]
pub struct Chain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl Chain {
    pub fn new(interceptors: Vec<Box<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Names of the interceptors in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Run the interceptors in order. Returns the short-circuit response of
    /// the first interceptor that answers, if any.
    pub fn apply(&self, req: &mut Request<Body>) -> Option<Response> {
        for interceptor in &self.interceptors {
            if let Flow::Respond(response) = interceptor.intercept(req) {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    status = %response.status(),
                    "Request short-circuited"
                );
                return Some(response);
            }
        }
        None
    }

    /// Run the chain around `terminal`.
    pub async fn handle<F, Fut>(&self, mut req: Request<Body>, terminal: F) -> Response
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Response>,
    {
        match self.apply(&mut req) {
            Some(response) => response,
            None => terminal(req).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Tag(&'static str);

    impl Interceptor for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn intercept(&self, req: &mut Request<Body>) -> Flow {
            req.headers_mut().append("x-seen", self.0.parse().unwrap());
            Flow::Continue
        }
    }

    #[derive(Debug)]
    struct Deny;

    impl Interceptor for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        fn intercept(&self, _req: &mut Request<Body>) -> Flow {
            Flow::Respond((StatusCode::FORBIDDEN, "no").into_response())
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let chain = Chain::new(vec![Box::new(Tag("a")), Box::new(Tag("b"))]);
        assert_eq!(chain.names(), vec!["a", "b"]);

        let res = chain
            .handle(Request::new(Body::empty()), |req| async move {
                let seen: Vec<String> = req
                    .headers()
                    .get_all("x-seen")
                    .iter()
                    .map(|v| v.to_str().unwrap().to_string())
                    .collect();
                assert_eq!(seen, vec!["a", "b"]);
                StatusCode::OK.into_response()
            })
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![Box::new(Deny), Box::new(Tag("never"))]);

        let c = calls.clone();
        let res = chain
            .handle(Request::new(Body::empty()), |_req| async move {
                c.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK.into_response()
            })
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_passes_through() {
        let chain = Chain::default();
        assert!(chain.is_empty());
        let res = chain
            .handle(Request::new(Body::empty()), |_req| async { StatusCode::ACCEPTED.into_response() })
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }
}
