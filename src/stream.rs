use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use futures::{channel::oneshot, stream::BoxStream, Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::CallError;

/// The request stream handed to client and bidirectional streaming handlers.
///
/// Elements arrive in the order the caller sent them. If an element can't be converted to `T`
/// the stream ends early and the call fails with that error once the handler returns.
pub struct Streaming<T> {
    inner: BoxStream<'static, Result<T, CallError>>,
    error: Option<oneshot::Sender<CallError>>,
    done: bool,
}

impl<T: Send + 'static> Streaming<T> {
    /// Wrap an already native stream. Mostly useful for calling handlers directly.
    pub fn from_stream(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            inner: stream.map(Ok).boxed(),
            error: None,
            done: false,
        }
    }

    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(futures::stream::iter(iter))
    }

    pub(crate) fn new(
        inner: impl Stream<Item = Result<T, CallError>> + Send + 'static,
    ) -> (Self, InboundError) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: inner.boxed(),
                error: Some(tx),
                done: false,
            },
            InboundError(rx),
        )
    }
}

impl<T> Stream for Streaming<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match ready!(self.inner.poll_next_unpin(cx)) {
            Some(Ok(value)) => Poll::Ready(Some(value)),
            Some(Err(err)) => {
                if let Some(tx) = self.error.take() {
                    let _ = tx.send(err);
                }
                // Nothing after the failed element is yielded.
                self.done = true;
                Poll::Ready(None)
            }
            None => {
                self.done = true;
                Poll::Ready(None)
            }
        }
    }
}

impl<T> fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streaming").finish_non_exhaustive()
    }
}

/// The error which ended a [`Streaming`] early, if any.
pub(crate) struct InboundError(oneshot::Receiver<CallError>);

impl InboundError {
    pub(crate) fn take(mut self) -> Option<CallError> {
        self.0.try_recv().ok().flatten()
    }
}

pin_project! {
    /// Ends the inner stream once the call is cancelled.
    ///
    /// Nothing is raised, iteration simply stops on both sides of the call.
    pub(crate) struct Cancellable<S> {
        #[pin]
        stream: S,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
        done: bool,
    }
}

impl<S> Cancellable<S> {
    pub(crate) fn new(stream: S, token: CancellationToken) -> Self {
        Self {
            stream,
            cancelled: token.cancelled_owned(),
            done: false,
        }
    }
}

impl<S: Stream> Stream for Cancellable<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        if this.cancelled.poll(cx).is_ready() {
            *this.done = true;
            #[cfg(feature = "tracing")]
            tracing::debug!("stream ended by cancellation");
            return Poll::Ready(None);
        }

        let item = ready!(this.stream.poll_next(cx));
        if item.is_none() {
            *this.done = true;
        }
        Poll::Ready(item)
    }
}
