//! Genesis block parameters for each supported network.

use chrono::{DateTime, TimeZone, Utc};

use crate::{block, parameters::Network};

/// The previous block hash for the genesis block.
///
/// All known networks use the Bitcoin `null` value for the parent of the
/// genesis block. (In Bitcoin, `null` is `[0; 32]`.)
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0; 32]);

/// Returns the hash for the genesis block in `network`.
pub fn genesis_hash(network: Network) -> block::Hash {
    match network {
        // bitcoin-cli getblockhash 0
        Network::Mainnet => "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        // bitcoin-cli -testnet getblockhash 0
        Network::Testnet => "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
        // bitcoin-cli -regtest getblockhash 0 (shared by regtest and simnet)
        Network::Regtest => "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
        // bitcoin-cli -signet getblockhash 0 (default signet parameters)
        Network::Signet => "00000008819873e925422c1ff0f99f7cc9bbb232af63a077a480a3633bee1ef6",
    }
    .parse()
    .expect("hard-coded hash parses")
}

/// Returns the genesis block's own header timestamp for `network`, used to
/// seed median-time-past and retarget calculations for the first
/// `POW_AVERAGING_WINDOW` headers, before any ancestor block is available.
pub fn genesis_time(network: Network) -> DateTime<Utc> {
    let unix_time = match network {
        // bitcoin-cli getblockheader <genesis> | .time
        Network::Mainnet => 1231006505,
        Network::Testnet => 1296688602,
        Network::Regtest => 1296688602,
        Network::Signet => 1598918400,
    };
    Utc.timestamp(unix_time, 0)
}
