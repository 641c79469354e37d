//! A `tower::Layer` for wrapping a service in a `Batch`.

use std::{fmt, marker::PhantomData};

use tower::Service;

use crate::{Batch, BoxError};

/// Applies [`Batch`] to a wrapped `Service`.
pub struct BatchLayer<Request> {
    max_in_flight: usize,
    _p: PhantomData<fn(Request)>,
}

impl<Request> BatchLayer<Request> {
    /// Creates a new `BatchLayer` bounding the in-flight request queue to
    /// `max_in_flight` entries.
    pub fn new(max_in_flight: usize) -> Self {
        BatchLayer {
            max_in_flight,
            _p: PhantomData,
        }
    }
}

impl<Request> fmt::Debug for BatchLayer<Request> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLayer")
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

impl<T, Request> tower::Layer<T> for BatchLayer<Request>
where
    T: Service<Request> + Send + 'static,
    T::Future: Send + 'static,
    T::Error: Into<BoxError> + Send + Sync + 'static,
    Request: Send + 'static,
{
    type Service = Batch<T, Request>;

    fn layer(&self, service: T) -> Self::Service {
        Batch::new(service, self.max_in_flight)
    }
}
