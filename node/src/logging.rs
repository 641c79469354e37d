//! Logging initialization: a `tracing-subscriber` formatter writing to
//! `debug.log` under the data directory, mirroring `test-support::init`'s
//! subscriber setup but for the production binary rather than a test
//! process, and without reading any environment variable (ยง6 only honors
//! `HOME`, for `--datadir` defaulting).

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing_subscriber::EnvFilter;

/// Opens (creating if necessary) `datadir/debug.log` and installs it as the
/// global tracing subscriber at `level`.
pub fn init(datadir: &Path, level: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(datadir)?;
    let log_file = open_log_file(datadir)?;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(move || log_file.try_clone().expect("debug.log stays open"))
        .with_ansi(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("no subscriber installed yet for this process");

    color_eyre::install().expect("color_eyre installs exactly once per process");

    Ok(())
}

fn open_log_file(datadir: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(datadir.join("debug.log"))
}
