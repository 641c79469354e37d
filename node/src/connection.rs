//! Owns the sockets `pool::Pool` schedules but never touches itself (see
//! `pool`'s crate-level doc comment): dials or accepts a `TcpStream`, frames
//! it with `net::Codec`, registers it with `Pool` via
//! [`pool::Request::Connected`], and bridges the codec's stream/sink to
//! `Pool`'s `Request::Message` calls until either side closes.
//!
//! [`Connections`] additionally tracks which peer addresses currently have
//! a live connection task, so that the `connect`/`disconnect` lists a
//! `Request::Tick` response comes back with can actually be acted on:
//! `connect` dials an address `Pool`'s addrman selected, `disconnect` aborts
//! the task owning a misbehaving peer's socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tower::{buffer::Buffer, ServiceExt};

use net::Message;
use pool::peer::Direction;
use pool::{Pool, Request as PoolRequest};
use primitives::parameters::Network;

type PoolHandle = Buffer<Pool, PoolRequest>;

/// The set of connection tasks this node currently owns, keyed by peer
/// address, so `Pool`'s `PoolActions.disconnect` list can be turned into an
/// actual socket teardown.
#[derive(Clone)]
pub struct Connections {
    pool: PoolHandle,
    network: Network,
    active: Arc<Mutex<HashMap<SocketAddr, reactor::Handle>>>,
}

impl Connections {
    pub fn new(pool: PoolHandle, network: Network) -> Self {
        Connections {
            pool,
            network,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dials `addr` in the background, unless a connection to it is
    /// already in flight or established.
    pub fn dial(&self, addr: SocketAddr) {
        if self.active.lock().expect("connection table").contains_key(&addr) {
            return;
        }

        let pool = self.pool.clone();
        let network = self.network;
        let active = self.active.clone();

        let handle = reactor::add_handle(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => drive(pool, network, stream, addr, Direction::Outbound).await,
                Err(error) => tracing::debug!(%addr, %error, "outbound connection failed"),
            }
            active.lock().expect("connection table").remove(&addr);
        });

        self.active.lock().expect("connection table").insert(addr, handle);
    }

    /// Aborts the connection task for `addr`, if one is running. `Pool`
    /// will separately see a `Request::Disconnected` once the task's
    /// teardown runs, but misbehaving peers need their socket killed
    /// immediately rather than waiting for it to notice on its own.
    pub fn disconnect(&self, addr: SocketAddr) {
        if let Some(handle) = self.active.lock().expect("connection table").remove(&addr) {
            reactor::remove_handle(handle);
        }
    }

    /// Accepts connections on `listener` until the reactor shuts down,
    /// tracking each in the connection table like an outbound [`Connections::dial`].
    pub async fn accept_loop(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let pool = self.pool.clone();
                    let network = self.network;
                    let active = self.active.clone();
                    let handle = reactor::add_handle(async move {
                        drive(pool, network, stream, addr, Direction::Inbound).await;
                        active.lock().expect("connection table").remove(&addr);
                    });
                    self.active.lock().expect("connection table").insert(addr, handle);
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to accept inbound connection");
                }
            }
        }
    }
}

async fn drive(
    pool: PoolHandle,
    network: Network,
    stream: TcpStream,
    addr: SocketAddr,
    direction: Direction,
) {
    let codec = net::Codec::builder().for_network(network).finish();
    let (mut sink, mut source) = tokio_util::codec::Framed::new(stream, codec).split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    if let Err(error) = pool
        .clone()
        .oneshot(PoolRequest::Connected {
            addr,
            direction,
            sink: outbound_tx,
        })
        .await
    {
        tracing::warn!(%addr, %error, "pool rejected new connection");
        return;
    }

    let writer = async {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        loop {
            match source.next().await {
                Some(Ok(message)) => {
                    let pool = pool.clone();
                    if pool
                        .oneshot(PoolRequest::Message { addr, message })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Err(error)) => {
                    tracing::debug!(%addr, %error, "peer connection error");
                    break;
                }
                None => break,
            }
        }
    };

    futures::pin_mut!(writer);
    futures::pin_mut!(reader);
    futures::future::select(writer, reader).await;

    let _ = pool.oneshot(PoolRequest::Disconnected(addr)).await;
}
