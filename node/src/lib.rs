//! The composition root: builds `store`, `chain`, `mempool`, `pool`, and
//! `rpc` in dependency order, wires `chain`'s event fan-out to the two
//! listeners that need it, and drives the whole thing on one
//! [`reactor::Reactor`].
//!
//! Mirrors the construction/teardown order of a node that builds its
//! subsystems bottom-up, tearing itself down in reverse if a later step
//! fails.

pub mod cli;
pub mod config;
pub mod connection;
pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use tower::{buffer::Buffer, ServiceExt};

use chain::FanOut;
use config::Config;

/// Errors that can prevent the node from starting. Each maps to one of the
/// CLI's exit codes.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("chain state is corrupt and requires --reindex: {0}")]
    CorruptState(String),
    #[error("fatal runtime error: {0}")]
    Fatal(String),
}

/// How often `Pool`'s `Request::Tick` runs: stall detection, deadline
/// reassignment, and topping up outbound connections.
const POOL_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Buffer depths for the services this crate constructs. `chain` and
/// `store` pick their own depth in their respective `init` functions;
/// `mempool` and `pool` don't have one, so the composition root picks a
/// depth matching the concurrency `rpc` and the connection tasks actually
/// need.
const SERVICE_BUFFER_DEPTH: usize = 32;

/// Builds every subsystem and runs the node until `rpc`'s `stop` method (or
/// an external shutdown signal) is called.
pub async fn run(config: Config) -> Result<(), NodeError> {
    let reactor = reactor::Reactor::new().map_err(|error| NodeError::Fatal(error.to_string()))?;
    let reactor_handle = reactor.handle();

    reactor.start(async move {
        if let Err(error) = run_inner(config, reactor_handle.clone()).await {
            tracing::error!(%error, "node failed to start");
        }
        reactor_handle.stop();
    });

    Ok(())
}

async fn run_inner(config: Config, reactor_handle: reactor::ReactorHandle) -> Result<(), NodeError> {
    let listeners = FanOut::new();

    let disk = store::init(config.store.clone(), config.network);
    let genesis_hash = primitives::parameters::genesis_hash(config.network);
    let chain = chain::init(config.network, disk, listeners.clone()).await;

    let mempool = Buffer::new(
        mempool::Mempool::new(mempool::Config::default(), config.network, chain.clone()),
        SERVICE_BUFFER_DEPTH,
    );
    listeners.register(Arc::new(mempool::ChainReactor::new(mempool.clone())));

    let pool = Buffer::new(
        pool::Pool::new(config.pool, genesis_hash, chain.clone(), mempool.clone()),
        SERVICE_BUFFER_DEPTH,
    );
    listeners.register(Arc::new(pool::PoolChainReactor::new(pool.clone())));

    let connections = connection::Connections::new(pool.clone(), config.network);

    if let Some(listen) = config.listen {
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .map_err(|error| NodeError::Fatal(format!("failed to bind {}: {}", listen, error)))?;
        tracing::info!(%listen, "listening for inbound connections");
        let connections = connections.clone();
        reactor::add_handle(async move { connections.accept_loop(listener).await });
    }

    for addr in &config.outbound {
        connections.dial(*addr);
    }

    if !config.connect_only {
        spawn_pool_timer(pool.clone(), connections);
    }

    let rpc_context = rpc::Context {
        network: config.network,
        chain,
        mempool,
        pool,
        reactor: reactor_handle,
    };
    reactor::add_handle(async move {
        if let Err(error) = rpc::serve(config.rpc, rpc_context).await {
            tracing::error!(%error, "rpc server exited");
        }
    });

    tracing::info!(network = %config.network, datadir = %config.datadir.display(), "node started");

    Ok(())
}

/// Drives `Pool`'s periodic maintenance and acts on whatever connect/
/// disconnect instructions each tick returns.
fn spawn_pool_timer(pool: Buffer<pool::Pool, pool::Request>, connections: connection::Connections) {
    reactor::add_timer(POOL_TICK_INTERVAL, true, move || {
        reactor::add_handle(apply_tick(pool.clone(), connections.clone()));
    });
}

async fn apply_tick(pool: Buffer<pool::Pool, pool::Request>, connections: connection::Connections) {
    let actions = match pool.oneshot(pool::Request::Tick).await {
        Ok(pool::Response::Actions(actions)) => actions,
        Ok(_) => return,
        Err(error) => {
            tracing::warn!(%error, "pool tick failed");
            return;
        }
    };

    for addr in actions.connect {
        connections.dial(addr);
    }
    for addr in actions.disconnect {
        connections.disconnect(addr);
    }
}

/// The CLI's documented exit codes (ยง6): 0 normal, 1 config error, 2 data
/// corruption requiring `--reindex`, 3 fatal runtime error.
pub fn exit_code(error: &NodeError) -> i32 {
    match error {
        NodeError::Config(_) => 1,
        NodeError::CorruptState(_) => 2,
        NodeError::Fatal(_) => 3,
    }
}
