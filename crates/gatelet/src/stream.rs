//! Exactly-once ticket release for streamed outputs.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;

use crate::limiter::RateLimit;

/// Wraps an output stream so the admission ticket is released exactly once.
///
/// Any terminal event counts: the inner stream finishing, an error item, an
/// explicit [`close`](Self::close), or dropping the wrapper mid-stream.
/// After the terminal event the wrapped stream is dropped and polling stays
/// exhausted. The release runs as a spawned task so no terminal path blocks;
/// without a runtime at that point the release is lost, logged, and left for
/// the periodic flush to reap.
pub struct ReleasingStream<S> {
    inner: Option<Pin<Box<S>>>,
    limiter: Arc<RateLimit>,
    request_id: String,
}

impl<S, T, E> ReleasingStream<S>
where
    S: Stream<Item = Result<T, E>>,
{
    pub fn new(limiter: Arc<RateLimit>, request_id: impl Into<String>, inner: S) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            limiter,
            request_id: request_id.into(),
        }
    }
}

impl<S> ReleasingStream<S> {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Release the ticket now and drop the wrapped stream unconsumed.
    pub fn close(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(inner) = self.inner.take() {
            dispatch_release(Arc::clone(&self.limiter), self.request_id.clone());
            drop(inner);
        }
    }
}

impl<S, T, E> Stream for ReleasingStream<S>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(error))) => {
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl<S> Drop for ReleasingStream<S> {
    fn drop(&mut self) {
        self.finish();
    }
}

fn dispatch_release(limiter: Arc<RateLimit>, request_id: String) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = limiter.exit(&request_id).await {
                    tracing::error!(
                        client_id = %limiter.client_id(),
                        request_id = %request_id,
                        error = %e,
                        "Failed to release admission ticket"
                    );
                }
            });
        }
        Err(_) => {
            tracing::error!(
                client_id = %limiter.client_id(),
                request_id = %request_id,
                "No runtime to release admission ticket - flush will reap it"
            );
        }
    }
}

impl RateLimit {
    /// Wrap a stream of outputs so `request_id` is released exactly once,
    /// however the stream ends.
    pub fn wrap<S, T, E>(
        self: Arc<Self>,
        request_id: impl Into<String>,
        stream: S,
    ) -> ReleasingStream<S>
    where
        S: Stream<Item = Result<T, E>>,
    {
        ReleasingStream::new(self, request_id, stream)
    }
}
