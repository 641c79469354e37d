//! Error types for the batch service.

use std::{fmt, sync::Arc};

/// An error produced by a `Service` wrapped by a `Batch`.
#[derive(Debug, Clone)]
pub struct ServiceError {
    inner: Arc<dyn std::error::Error + Send + Sync>,
}

impl ServiceError {
    pub(crate) fn new(inner: Box<dyn std::error::Error + Send + Sync>) -> ServiceError {
        let inner = Arc::from(inner);
        ServiceError { inner }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batching service failed: {}", self.inner)
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.inner)
    }
}

/// An error produced when the batch worker closes unexpectedly.
#[derive(Debug)]
pub struct Closed {
    _p: (),
}

impl Closed {
    pub(crate) fn new() -> Closed {
        Closed { _p: () }
    }
}

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("batch worker closed")
    }
}

impl std::error::Error for Closed {}
