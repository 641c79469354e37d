//! The `Batch` middleware: a `Clone`-able `Service` handle that forwards
//! requests to a single background worker over a bounded channel, so many
//! callers (e.g. one per input of a block being validated) can share one
//! underlying, possibly non-`Clone`, service.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::mpsc;
use tower::Service;
use tracing::Span;

use crate::{
    error::Closed,
    message::Message,
    semaphore::Semaphore,
    worker::{Handle, Worker},
    BoxError,
};

/// Adds a bounded queue in front of an inner service, so many clones of the
/// returned `Batch` can submit requests to the single task driving the
/// inner service.
pub struct Batch<T, Request>
where
    T: Service<Request>,
{
    tx: mpsc::Sender<Message<Request, T::Future>>,
    semaphore: Semaphore,
    handle: Arc<Handle>,
}

impl<T, Request> Batch<T, Request>
where
    T: Service<Request>,
    T::Error: Into<BoxError>,
{
    /// Creates a new `Batch` wrapping `service`.
    ///
    /// `max_in_flight` bounds both the channel capacity and the number of
    /// requests that may be queued awaiting a worker slot; callers beyond
    /// that bound wait in `poll_ready` instead of piling up in memory.
    pub fn new(service: T, max_in_flight: usize) -> Self
    where
        T: Send + 'static,
        T::Future: Send + 'static,
        T::Error: Send + Sync + 'static,
        Request: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(max_in_flight);
        let handle = Worker::spawn(service, rx);
        let semaphore = Semaphore::new_with_permits(max_in_flight);
        Batch {
            tx,
            semaphore,
            handle,
        }
    }
}

impl<T, Request> Clone for Batch<T, Request>
where
    T: Service<Request>,
{
    fn clone(&self) -> Self {
        Batch {
            tx: self.tx.clone(),
            semaphore: self.semaphore.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T, Request> Service<Request> for Batch<T, Request>
where
    T: Service<Request>,
    T::Future: Send + 'static,
    T::Error: Into<BoxError>,
    Request: Send + 'static,
{
    type Response = T::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<T::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.handle.is_closed() {
            return Poll::Ready(Err(self.handle.get_error_on_closed()));
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let tx = self.tx.clone();
        let semaphore = self.semaphore.clone();
        let span = Span::current();

        Box::pin(async move {
            let permit = semaphore.acquire().await.map_err(|_| Closed::new())?;
            let (msg_tx, msg_rx) = tokio::sync::oneshot::channel();
            let msg = Message {
                request,
                tx: msg_tx,
                span,
                _permit: permit,
            };
            tx.send(msg).await.map_err(|_| Closed::new())?;
            let inner_fut = msg_rx.await.map_err(|_| Closed::new())??;
            inner_fut.await.map_err(Into::into)
        })
    }
}
