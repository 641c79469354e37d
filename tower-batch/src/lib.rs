//! A batching middleware for `tower::Service`s that don't implement
//! `Clone`, but whose requests are cheap to queue behind a single
//! background worker.
//!
//! `chain`'s script-verification service is the motivating use: one input
//! check per call, dispatched from many concurrent callers during block
//! validation, driven by a single worker task that owns the (non-`Clone`)
//! verifier and hands each caller back the verifier's own response future.

pub mod error;
mod layer;
mod message;
mod semaphore;
mod service;
mod worker;

pub use layer::BatchLayer;
pub use service::Batch;

/// A boxed, type-erased error, the common currency this crate's futures
/// resolve to on failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
