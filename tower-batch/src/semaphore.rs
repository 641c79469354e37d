//! A small wrapper around a bounded counting semaphore, used to bound the
//! number of in-flight requests a batch worker will accept before it starts
//! applying backpressure to callers.

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore as TokioSemaphore};

#[derive(Debug, Clone)]
pub(crate) struct Semaphore {
    inner: Arc<TokioSemaphore>,
}

/// A permit to submit one request to the batch worker.
///
/// Held by an in-flight `Message`; dropping it (on completion, or on
/// cancellation) returns the slot to the semaphore.
#[derive(Debug)]
pub(crate) struct Permit {
    _inner: Option<OwnedSemaphorePermit>,
}

impl Semaphore {
    pub(crate) fn new_with_permits(permits: usize) -> Self {
        Semaphore {
            inner: Arc::new(TokioSemaphore::new(permits)),
        }
    }

    pub(crate) async fn acquire(&self) -> Result<Permit, AcquireError> {
        let permit = self.inner.clone().acquire_owned().await?;
        Ok(Permit {
            _inner: Some(permit),
        })
    }
}

#[cfg(test)]
impl Permit {
    pub(crate) fn test_new() -> Self {
        Permit { _inner: None }
    }
}
