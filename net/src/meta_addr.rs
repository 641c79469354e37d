//! Peer address gossip, as exchanged via `addr`/`getaddr`.

use std::{
    io,
    net::SocketAddr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, TimeZone, Utc};
use primitives::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use crate::protocol::external::types::PeerServices;

/// A single entry in an `addr` message: a peer's address, the services it
/// advertises, and the last time we (or our informant) saw it alive.
///
/// This is also the unit the address manager (`addrman`) stores and scores
/// for future connection attempts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MetaAddr {
    /// The peer's socket address.
    pub addr: SocketAddr,
    /// Services advertised by the peer.
    pub services: PeerServices,
    /// The last time this address was seen alive, truncated to the second.
    pub last_seen: DateTime<Utc>,
}

impl MetaAddr {
    pub fn new(addr: SocketAddr, services: PeerServices) -> MetaAddr {
        MetaAddr {
            addr,
            services,
            last_seen: Utc::now(),
        }
    }

    /// Returns how long ago this address was last seen alive.
    pub fn age(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Duration::from_secs((now - self.last_seen.timestamp()).max(0) as u64)
    }
}

impl BitcoinSerialize for MetaAddr {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        (self.last_seen.timestamp() as u32).bitcoin_serialize(&mut writer)?;
        self.services.bitcoin_serialize(&mut writer)?;
        self.addr.bitcoin_serialize(&mut writer)?;
        Ok(())
    }
}

impl BitcoinDeserialize for MetaAddr {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let time = u32::bitcoin_deserialize(&mut reader)?;
        let services = PeerServices::bitcoin_deserialize(&mut reader)?;
        let addr = SocketAddr::bitcoin_deserialize(&mut reader)?;
        Ok(MetaAddr {
            addr,
            services,
            last_seen: Utc.timestamp(time as i64, 0),
        })
    }
}
