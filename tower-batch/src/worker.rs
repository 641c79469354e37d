//! The background task that actually drives a wrapped `Service`, taking
//! requests off the message queue one at a time and returning results to
//! the caller that submitted them.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use tower::Service;

use crate::{
    error::{Closed, ServiceError},
    message::Message,
};

/// A handle shared between a `Batch` and its `Worker`, used to observe
/// whether the worker is still alive and to propagate its failure.
#[derive(Debug)]
pub(crate) struct Handle {
    inner: std::sync::Mutex<Option<ServiceError>>,
    closed: AtomicBool,
}

impl Handle {
    fn new() -> Self {
        Handle {
            inner: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn get_error_on_closed(&self) -> crate::BoxError {
        if let Some(err) = self.inner.lock().expect("handle mutex poisoned").clone() {
            return Box::new(err);
        }
        Box::new(Closed::new())
    }

    fn set_error(&self, error: ServiceError) {
        let mut inner = self.inner.lock().expect("handle mutex poisoned");
        if inner.is_none() {
            *inner = Some(error);
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct Worker<T, Request>
where
    T: Service<Request>,
{
    rx: mpsc::Receiver<Message<Request, T::Future>>,
    service: T,
    handle: Arc<Handle>,
}

impl<T, Request> Worker<T, Request>
where
    T: Service<Request>,
    T::Error: Into<crate::BoxError>,
{
    pub(crate) fn spawn(service: T, rx: mpsc::Receiver<Message<Request, T::Future>>) -> Arc<Handle>
    where
        T: Send + 'static,
        T::Future: Send + 'static,
        T::Error: Send + Sync + 'static,
        Request: Send + 'static,
    {
        let handle = Arc::new(Handle::new());
        let worker = Worker {
            rx,
            service,
            handle: handle.clone(),
        };
        tokio::spawn(worker.run());
        handle
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            let Message {
                request,
                tx,
                span,
                _permit,
            } = msg;
            let _guard = span.enter();

            if let Err(e) = futures::future::poll_fn(|cx| self.service.poll_ready(cx)).await {
                let error = ServiceError::new(e.into());
                self.handle.set_error(error.clone());
                let _ = tx.send(Err(error));
                continue;
            }

            let fut = self.service.call(request);
            let _ = tx.send(Ok(fut));
        }
    }
}
