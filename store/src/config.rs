//! On-disk layout and tunables for the chain state store.

use std::path::PathBuf;

use primitives::parameters::Network;

/// Configuration for the persistent chain state.
#[derive(Clone, Debug)]
pub struct Config {
    /// The root directory under which `blocks/`, `chainstate/`, and the
    /// other on-disk artifacts named in ยง6 are created.
    pub cache_dir: PathBuf,

    /// Maximum size of the in-memory page cache sled is allowed to use, in
    /// bytes. Corresponds to the `--dbcache` CLI flag.
    pub db_cache_bytes: u64,

    /// If `Some`, refuses to commit any block above this height. Used by
    /// tests that want to pin the chain state at a known-good point.
    pub debug_stop_at_height: Option<u32>,

    /// Delete and rebuild the chain state from the block files on startup.
    /// Corresponds to the `--reindex` CLI flag.
    pub ephemeral: bool,
}

impl Default for Config {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crate-node");

        Config {
            cache_dir,
            db_cache_bytes: 450 * 1024 * 1024,
            debug_stop_at_height: None,
            ephemeral: false,
        }
    }
}

impl Config {
    /// Returns the sled database directory for a particular network.
    ///
    /// Each network gets its own subdirectory so that switching
    /// `--network` never mixes up chain data.
    pub fn net_dir(&self, network: Network) -> PathBuf {
        self.cache_dir.join("chainstate").join(match network {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet3",
            Network::Regtest => "regtest",
            Network::Signet => "signet",
        })
    }

    /// Builds a [`sled::Config`] for `network`, honoring `ephemeral` and
    /// `db_cache_bytes`.
    pub fn sled_config(&self, network: Network) -> sled::Config {
        let config = sled::Config::default()
            .cache_capacity(self.db_cache_bytes)
            .mode(sled::Mode::LowSpace);

        if self.ephemeral {
            config.temporary(true)
        } else {
            config.path(self.net_dir(network))
        }
    }
}
