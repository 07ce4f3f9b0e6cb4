//! Response body that keeps its request pinned until the transfer ends.
//!
//! The handler returns as soon as the upstream head arrives, but the body may
//! stream for much longer. [`PinnedBody`] carries the request's admission and
//! endpoint tracking so both stay counted until the last frame is relayed.
//! When the generation is retired first (drain grace expired) the stream is
//! aborted with [`RelayError::Cancelled`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use thiserror::Error;

use crate::load_balancer::EndpointGuard;
use crate::switchboard::Admission;

/// Errors surfaced while relaying a response body.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("response cancelled by drain deadline")]
    Cancelled,

    #[error(transparent)]
    Upstream(#[from] axum::Error),
}

struct Hold {
    admission: Admission,
    endpoint: EndpointGuard,
}

/// Upstream body plus the guards of the request it answers.
pub struct PinnedBody {
    inner: Body,
    retired: Pin<Box<dyn Future<Output = ()> + Send>>,
    hold: Option<Hold>,
}

impl PinnedBody {
    pub fn new(inner: Body, admission: Admission, endpoint: EndpointGuard) -> Self {
        let generation = Arc::clone(admission.generation());
        Self {
            inner,
            retired: Box::pin(async move { generation.retired().await }),
            hold: Some(Hold {
                admission,
                endpoint,
            }),
        }
    }

    /// True while the request is still counted against its generation.
    pub fn is_pinned(&self) -> bool {
        self.hold.is_some()
    }
}

impl HttpBody for PinnedBody {
    type Data = Bytes;
    type Error = RelayError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, RelayError>>> {
        let this = self.get_mut();
        let Some(hold) = &this.hold else {
            return Poll::Ready(None);
        };

        if this.retired.as_mut().poll(cx).is_ready() {
            tracing::warn!(
                generation = hold.admission.generation().id(),
                endpoint = %hold.endpoint.address(),
                "Response body cancelled by drain deadline"
            );
            this.hold = None;
            return Poll::Ready(Some(Err(RelayError::Cancelled)));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(None) => {
                this.hold = None;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.hold = None;
                Poll::Ready(Some(Err(RelayError::Upstream(e))))
            }
            Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.hold.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
