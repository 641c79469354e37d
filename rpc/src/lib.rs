//! The JSON-RPC 2.0 surface (at minimum `getblockchaininfo`, `getblock`,
//! `getblockhash`, `getbestblockhash`, `sendrawtransaction`,
//! `getrawmempool`, `getpeerinfo`, `stop`), served over HTTP and bound to
//! loopback by default.
//!
//! State is reached through cloned `tower::Buffer` handles, the same way
//! `chain`/`mempool`/`pool` talk to each other, with the actual HTTP
//! plumbing kept to a thin `hyper::Service` wrapper around
//! [`methods::dispatch`].

pub mod error;
pub mod jsonrpc;
pub mod methods;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request as HttpRequest, Response as HttpResponse, Server, StatusCode};
use serde_json::Value;
use tower::buffer::Buffer;

use primitives::parameters::Network;

pub use error::RpcError;

/// Standard Bitcoin Core RPC ports, kept so existing RPC clients that
/// default to these need no configuration to find a locally-run node.
pub fn default_port(network: Network) -> u16 {
    match network {
        Network::Mainnet => 8332,
        Network::Testnet => 18332,
        Network::Regtest => 18443,
        Network::Signet => 38332,
    }
}

/// Configuration for the RPC server.
#[derive(Clone, Debug)]
pub struct Config {
    /// The address to bind the HTTP listener to. Defaults to loopback so
    /// the RPC port is never reachable off-host without an explicit
    /// operator opt-in.
    pub bind: SocketAddr,
}

impl Config {
    pub fn for_network(network: Network) -> Self {
        Config {
            bind: SocketAddr::from(([127, 0, 0, 1], default_port(network))),
        }
    }
}

/// Everything a dispatched RPC method needs: cloneable handles to the three
/// stateful services it might call into, plus the means to ask the node to
/// shut down.
#[derive(Clone)]
pub struct Context {
    pub network: Network,
    pub chain: Buffer<chain::service::StateService, chain::Request>,
    pub mempool: Buffer<mempool::Mempool, mempool::Request>,
    pub pool: Buffer<pool::Pool, pool::Request>,
    pub reactor: reactor::ReactorHandle,
}

async fn handle(request: HttpRequest<Body>, ctx: Arc<Context>) -> Result<HttpResponse<Body>, Infallible> {
    if request.method() != Method::POST {
        return Ok(HttpResponse::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::empty())
            .expect("static response is well-formed"));
    }

    let body = match hyper::body::to_bytes(request.into_body()).await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(%error, "failed to read RPC request body");
            return Ok(HttpResponse::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::empty())
                .expect("static response is well-formed"));
        }
    };

    let call: jsonrpc::Request = match serde_json::from_slice(&body) {
        Ok(call) => call,
        Err(error) => {
            let response = jsonrpc::Response::err(
                Value::Null,
                RpcError::InvalidParams(format!("malformed request: {}", error)),
            );
            return Ok(json_response(StatusCode::OK, &response));
        }
    };

    tracing::debug!(method = %call.method, "handling RPC call");

    let response = match methods::dispatch(&ctx, &call.method, call.params).await {
        Ok(result) => jsonrpc::Response::ok(call.id, result),
        Err(error) => jsonrpc::Response::err(call.id, error),
    };

    Ok(json_response(StatusCode::OK, &response))
}

fn json_response(status: StatusCode, body: &jsonrpc::Response) -> HttpResponse<Body> {
    let bytes = serde_json::to_vec(body).expect("jsonrpc::Response always serializes");
    HttpResponse::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("static response is well-formed")
}

/// Binds and serves the RPC HTTP listener until the reactor shuts down.
///
/// This future never resolves on its own; it's meant to be registered with
/// `reactor::add_handle` and left to run until the whole task set is torn
/// down at shutdown.
pub async fn serve(config: Config, context: Context) -> Result<(), hyper::Error> {
    let context = Arc::new(context);

    let make_service = make_service_fn(move |_conn| {
        let context = context.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request| handle(request, context.clone())))
        }
    });

    tracing::info!(bind = %config.bind, "starting RPC server");
    Server::bind(&config.bind).serve(make_service).await
}
