//! The minimum RPC surface (getblockchaininfo, getblock, getblockhash,
//! getbestblockhash, sendrawtransaction, getrawmempool, getpeerinfo, stop),
//! dispatched by method name against a [`Context`].

use std::sync::Arc;

use serde_json::{json, Value};
use tower::ServiceExt;

use primitives::{block, parameters::Network, transaction, BitcoinDeserialize, BitcoinSerialize};
use store::HashOrHeight;

use crate::error::RpcError;
use crate::Context;

fn param<T: serde::de::DeserializeOwned>(params: &Value, index: usize) -> Result<T, RpcError> {
    let value = params
        .get(index)
        .cloned()
        .ok_or_else(|| RpcError::InvalidParams(format!("missing parameter {}", index)))?;
    serde_json::from_value(value)
        .map_err(|error| RpcError::InvalidParams(format!("parameter {}: {}", index, error)))
}

fn param_opt<T: serde::de::DeserializeOwned>(params: &Value, index: usize) -> Option<T> {
    params
        .get(index)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
}

/// Dispatches one JSON-RPC call by method name.
pub async fn dispatch(ctx: &Context, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "getblockchaininfo" => get_blockchain_info(ctx).await,
        "getblock" => get_block(ctx, &params).await,
        "getblockhash" => get_block_hash(ctx, &params).await,
        "getbestblockhash" => get_best_block_hash(ctx).await,
        "sendrawtransaction" => send_raw_transaction(ctx, &params).await,
        "getrawmempool" => get_raw_mempool(ctx, &params).await,
        "getpeerinfo" => get_peer_info(ctx).await,
        "stop" => stop(ctx).await,
        _ => Err(RpcError::MethodNotFound),
    }
}

/// Bitcoin Core's `GetDifficulty`: converts an nBits target into the
/// familiar "multiple of the minimum difficulty" float RPC clients expect,
/// rather than reporting the raw 256-bit target.
fn bits_to_difficulty(bits: primitives::work::difficulty::CompactDifficulty) -> f64 {
    let bits = bits.to_bits();
    let mut shift = (bits >> 24) as i32;
    let mut value = (bits & 0x00ff_ffff) as f64;

    while shift < 29 {
        value *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        value /= 256.0;
        shift -= 1;
    }

    let genesis_value = 0x00ffffu32 as f64;
    genesis_value / value
}

fn network_name(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "main",
        Network::Testnet => "test",
        Network::Regtest => "regtest",
        Network::Signet => "signet",
    }
}

async fn tip(ctx: &Context) -> Result<(block::Height, block::Hash), RpcError> {
    match ctx
        .chain
        .clone()
        .oneshot(chain::Request::Tip)
        .await
        .map_err(|error| RpcError::Internal(error.to_string()))?
    {
        chain::Response::Tip(Some(tip)) => Ok(tip),
        chain::Response::Tip(None) => Err(RpcError::Internal("chain has no tip".into())),
        _ => unreachable!("Tip request returns Response::Tip"),
    }
}

async fn block_by(ctx: &Context, query: HashOrHeight) -> Result<Arc<primitives::block::Block>, RpcError> {
    match ctx
        .chain
        .clone()
        .oneshot(chain::Request::Block(query))
        .await
        .map_err(|error| RpcError::Internal(error.to_string()))?
    {
        chain::Response::Block(Some(block)) => Ok(block),
        chain::Response::Block(None) => Err(RpcError::BlockNotFound),
        _ => unreachable!("Block request returns Response::Block"),
    }
}

async fn median_time_past(ctx: &Context, tip_height: block::Height) -> Result<i64, RpcError> {
    let mut times = Vec::with_capacity(11);
    for back in 0..11u32 {
        let height = match tip_height - back {
            Some(height) => height,
            None => break,
        };
        match block_by(ctx, HashOrHeight::Height(height)).await {
            Ok(block) => times.push(block.header.time.timestamp()),
            Err(RpcError::BlockNotFound) => break,
            Err(other) => return Err(other),
        }
    }
    if times.is_empty() {
        return Err(RpcError::Internal(
            "no blocks available to compute median time past".into(),
        ));
    }
    times.sort_unstable();
    Ok(times[times.len() / 2])
}

async fn get_blockchain_info(ctx: &Context) -> Result<Value, RpcError> {
    let (height, hash) = tip(ctx).await?;
    let tip_block = block_by(ctx, HashOrHeight::Hash(hash)).await?;
    let difficulty = bits_to_difficulty(tip_block.header.difficulty_threshold);
    let mediantime = median_time_past(ctx, height).await?;

    Ok(json!({
        "chain": network_name(ctx.network),
        "blocks": height.0,
        "headers": height.0,
        "bestblockhash": hash.to_string(),
        "difficulty": difficulty,
        "mediantime": mediantime,
        "initialblockdownload": false,
    }))
}

async fn get_best_block_hash(ctx: &Context) -> Result<Value, RpcError> {
    let (_, hash) = tip(ctx).await?;
    Ok(json!(hash.to_string()))
}

async fn get_block_hash(ctx: &Context, params: &Value) -> Result<Value, RpcError> {
    let height: u32 = param(params, 0)?;
    let block = block_by(ctx, HashOrHeight::Height(block::Height(height))).await?;
    Ok(json!(block.hash().to_string()))
}

async fn get_block(ctx: &Context, params: &Value) -> Result<Value, RpcError> {
    let hash_hex: String = param(params, 0)?;
    let hash: block::Hash = hash_hex
        .parse()
        .map_err(|_| RpcError::InvalidParams("blockhash must be hex-encoded".into()))?;
    let verbose = param_opt::<bool>(params, 1).unwrap_or(true);

    let block = block_by(ctx, HashOrHeight::Hash(hash)).await?;

    if !verbose {
        let bytes = block
            .bitcoin_serialize_to_vec()
            .map_err(|error| RpcError::Internal(error.to_string()))?;
        return Ok(json!(hex::encode(bytes)));
    }

    let (tip_height, _) = tip(ctx).await?;
    let height = block.coinbase_height().unwrap_or(block::Height(0));
    let confirmations = tip_height.0.saturating_sub(height.0) + 1;

    let tx: Vec<String> = block
        .transactions
        .iter()
        .map(|tx| tx.hash().to_string())
        .collect();

    let mut previous_block_hash = Value::Null;
    if block.header.previous_block_hash != primitives::parameters::GENESIS_PREVIOUS_BLOCK_HASH {
        previous_block_hash = json!(block.header.previous_block_hash.to_string());
    }

    let mut merkle_root_bytes = block.header.merkle_root.0;
    merkle_root_bytes.reverse();

    Ok(json!({
        "hash": block.hash().to_string(),
        "confirmations": confirmations,
        "height": height.0,
        "version": block.header.version,
        "merkleroot": hex::encode(merkle_root_bytes),
        "time": block.header.time.timestamp(),
        "nonce": block.header.nonce,
        "bits": format!("{:08x}", block.header.difficulty_threshold.to_bits()),
        "previousblockhash": previous_block_hash,
        "tx": tx,
    }))
}

async fn send_raw_transaction(ctx: &Context, params: &Value) -> Result<Value, RpcError> {
    let hex_tx: String = param(params, 0)?;
    let bytes = hex::decode(&hex_tx)
        .map_err(|_| RpcError::InvalidParams("tx hex must be valid hex".into()))?;
    let transaction = transaction::Transaction::bitcoin_deserialize(&bytes[..])
        .map_err(|error| RpcError::VerifyError(error.to_string()))?;

    match ctx
        .mempool
        .clone()
        .oneshot(mempool::Request::AddTransaction(Arc::new(transaction)))
        .await
        .map_err(|error: tower::BoxError| RpcError::Internal(error.to_string()))?
    {
        mempool::Response::Added(txid) => Ok(json!(txid.to_string())),
        mempool::Response::Rejected(error) => Err(error.into()),
        _ => unreachable!("AddTransaction request returns Response::Added or Rejected"),
    }
}

async fn get_raw_mempool(ctx: &Context, params: &Value) -> Result<Value, RpcError> {
    let verbose = param_opt::<bool>(params, 0).unwrap_or(false);

    let txids = match ctx
        .mempool
        .clone()
        .oneshot(mempool::Request::TxIds)
        .await
        .map_err(|error: tower::BoxError| RpcError::Internal(error.to_string()))?
    {
        mempool::Response::TxIds(txids) => txids,
        _ => unreachable!("TxIds request returns Response::TxIds"),
    };

    if verbose {
        let mut entries = serde_json::Map::new();
        for txid in txids {
            entries.insert(txid.to_string(), json!({}));
        }
        Ok(Value::Object(entries))
    } else {
        Ok(json!(txids
            .into_iter()
            .map(|txid| txid.to_string())
            .collect::<Vec<_>>()))
    }
}

async fn get_peer_info(ctx: &Context) -> Result<Value, RpcError> {
    let peers = match ctx
        .pool
        .clone()
        .oneshot(pool::Request::GetPeerInfo)
        .await
        .map_err(|error: tower::BoxError| RpcError::Internal(error.to_string()))?
    {
        pool::Response::PeerInfo(peers) => peers,
        _ => unreachable!("GetPeerInfo request returns Response::PeerInfo"),
    };

    let info: Vec<Value> = peers
        .into_iter()
        .map(|peer| {
            json!({
                "addr": peer.addr.to_string(),
                "services": format!("{:016x}", peer.services.bits()),
                "inbound": matches!(peer.direction, pool::peer::Direction::Inbound),
                "version": peer.version,
                "subver": peer.user_agent,
                "startingheight": peer.best_height.map(|height| height.0),
                "banscore": peer.misbehavior_score,
            })
        })
        .collect();

    Ok(json!(info))
}

async fn stop(ctx: &Context) -> Result<Value, RpcError> {
    ctx.reactor.stop();
    Ok(json!("crate-node stopping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::work::difficulty::CompactDifficulty;

    #[test]
    fn genesis_difficulty_is_one() {
        let difficulty = bits_to_difficulty(CompactDifficulty::from_bits(0x1d00ffff));
        assert!((difficulty - 1.0).abs() < 1e-9);
    }

    #[test]
    fn harder_target_gives_larger_difficulty() {
        let easy = bits_to_difficulty(CompactDifficulty::from_bits(0x1d00ffff));
        let hard = bits_to_difficulty(CompactDifficulty::from_bits(0x1900_8000));
        assert!(hard > easy);
    }
}
