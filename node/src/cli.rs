//! Command-line surface: `--datadir`, `--network`, `--listen`, `--connect`,
//! `--addnode`, `--maxconnections`, `--dbcache`, `--reindex`, `--prune`.

use std::net::SocketAddr;
use std::path::PathBuf;

use gumdrop::Options;

use primitives::parameters::Network;

#[derive(Debug, Options)]
pub struct Args {
    #[options(help = "print this help message")]
    pub help: bool,

    #[options(help = "directory for blocks, chain state, and logs")]
    pub datadir: Option<PathBuf>,

    #[options(help = "main | test | regtest | signet", default = "main")]
    pub network: NetworkArg,

    #[options(help = "accept inbound connections on [addr:]port")]
    pub listen: Option<String>,

    #[options(help = "connect only to this peer (repeatable)")]
    pub connect: Vec<SocketAddr>,

    #[options(help = "add a peer to try in addition to automatic ones (repeatable)")]
    pub addnode: Vec<SocketAddr>,

    #[options(help = "maximum number of peer connections")]
    pub maxconnections: Option<usize>,

    #[options(help = "maximum size of the chain state page cache, in MB")]
    pub dbcache: Option<u64>,

    #[options(help = "delete and rebuild the chain state from the block files on startup")]
    pub reindex: bool,

    #[options(help = "target size for the block/chain state files on disk, in MB")]
    pub prune: Option<u64>,
}

/// A thin `gumdrop::Options`-compatible wrapper around [`Network`], since
/// the upstream type lives in `primitives` and can't derive `gumdrop`'s
/// `ParseFromStr` impl itself.
#[derive(Clone, Copy, Debug)]
pub struct NetworkArg(pub Network);

impl Default for NetworkArg {
    fn default() -> Self {
        NetworkArg(Network::Mainnet)
    }
}

impl std::str::FromStr for NetworkArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(NetworkArg(Network::Mainnet)),
            "test" | "testnet" => Ok(NetworkArg(Network::Testnet)),
            "regtest" => Ok(NetworkArg(Network::Regtest)),
            "signet" => Ok(NetworkArg(Network::Signet)),
            other => Err(format!("unknown network {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_networks() {
        assert!(matches!("main".parse::<NetworkArg>().unwrap().0, Network::Mainnet));
        assert!(matches!("regtest".parse::<NetworkArg>().unwrap().0, Network::Regtest));
    }

    #[test]
    fn rejects_unknown_network() {
        assert!("bogusnet".parse::<NetworkArg>().is_err());
    }
}
