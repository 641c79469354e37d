//! Aggregates `store::Config`, `pool::Config`, and `rpc::Config` behind the
//! CLI surface in [`crate::cli::Args`], resolving the `--datadir` default
//! from `HOME` the way `store::Config`'s own default resolves one from the
//! platform cache directory.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use primitives::parameters::Network;

use crate::cli::Args;

#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a default --datadir: $HOME is not set")]
    NoHome,
    #[error("--listen address {0:?} could not be parsed: {1}")]
    InvalidListen(String, String),
}

/// The node's fully resolved configuration, after CLI parsing and
/// environment defaulting.
#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub datadir: PathBuf,
    pub store: store::Config,
    pub pool: pool::Config,
    pub rpc: rpc::Config,
    /// Addresses to dial directly at startup, bypassing the address
    /// manager entirely (`--connect`/`--addnode`): `pool`'s addrman is only
    /// ever populated by gossiped `addr` messages, so a CLI-supplied peer
    /// has no other way into the node.
    pub outbound: Vec<SocketAddr>,
    /// If true, `--connect` was used: the node dials only `outbound` and
    /// disables the normal addrman-driven outbound connection loop.
    pub connect_only: bool,
    pub listen: Option<SocketAddr>,
    pub prune_target_mb: Option<u64>,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Config, ConfigError> {
        let network = args.network.0;

        let datadir = match &args.datadir {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHome)?
                .join(".crate-node"),
        };

        let mut store = store::Config::default();
        store.cache_dir = datadir.clone();
        store.ephemeral = args.reindex;
        if let Some(dbcache_mb) = args.dbcache {
            store.db_cache_bytes = dbcache_mb * 1024 * 1024;
        }

        let mut pool = pool::Config {
            network,
            ..pool::Config::default()
        };
        if let Some(max) = args.maxconnections {
            pool.max_outbound = pool.max_outbound.min(max);
            pool.max_inbound = max.saturating_sub(pool.max_outbound);
        }

        let rpc = rpc::Config::for_network(network);

        let listen = match &args.listen {
            Some(spec) => Some(resolve_listen(spec, network)?),
            None => None,
        };

        Ok(Config {
            network,
            datadir,
            store,
            pool,
            rpc,
            outbound: args
                .connect
                .iter()
                .chain(args.addnode.iter())
                .copied()
                .collect(),
            connect_only: !args.connect.is_empty(),
            listen,
            prune_target_mb: args.prune,
        })
    }
}

fn resolve_listen(spec: &str, network: Network) -> Result<SocketAddr, ConfigError> {
    let default_port = default_p2p_port(network);
    let candidate = if spec.contains(':') {
        spec.to_owned()
    } else {
        format!("0.0.0.0:{}", spec.parse::<u16>().unwrap_or(default_port))
    };

    candidate
        .to_socket_addrs()
        .map_err(|error| ConfigError::InvalidListen(spec.to_owned(), error.to_string()))?
        .next()
        .ok_or_else(|| ConfigError::InvalidListen(spec.to_owned(), "no address resolved".into()))
}

/// Standard Bitcoin Core P2P ports, used as `--listen`'s default port when
/// only a bind address is given.
fn default_p2p_port(network: Network) -> u16 {
    match network {
        Network::Mainnet => 8333,
        Network::Testnet => 18333,
        Network::Regtest => 18444,
        Network::Signet => 38333,
    }
}
