//! Formatting helpers.

use std::fmt;

/// Wraps a `Display` value so that its `Debug` impl defers to `Display`.
///
/// Useful inside `#[derive(Debug)]` structs that want one field shown in its
/// human-readable form (e.g. a block hash) rather than its derived shape.
pub struct DisplayToDebug<T>(pub T);

impl<T: fmt::Display> fmt::Debug for DisplayToDebug<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
