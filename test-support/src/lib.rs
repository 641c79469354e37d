//! Test-only fixtures and helpers shared across the workspace's crates:
//! tracing/error-report setup for test binaries, and raw-byte wire vectors.

use std::sync::Once;

pub mod vectors;

/// Common imports for test modules: a `color_eyre`-backed `Result` and
/// `Report`, so test functions can use `?` against arbitrary error types.
pub mod prelude {
    pub use color_eyre::eyre::Report;
    pub use color_eyre::Result;
}

static INIT: Once = Once::new();

/// Installs a tracing subscriber and `color_eyre`'s panic/error hooks.
///
/// Idempotent and safe to call at the top of every test: only the first
/// call in a process takes effect, since `tracing`/`color_eyre` can each
/// only be installed once per process.
pub fn init() {
    INIT.call_once(|| {
        let filter = std::env::var("CRATE_LOG").unwrap_or_else(|_| "info".to_owned());
        let builder = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        let subscriber = builder.finish();
        let _ = tracing::subscriber::set_global_default(subscriber);

        let _ = color_eyre::install();
    });
}
