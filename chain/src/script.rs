//! Script verification via `bitcoinconsensus`, Bitcoin Core's own
//! interpreter compiled as a C library, batched through [`tower_batch`] so
//! one block's many inputs (and the mempool's concurrent transaction
//! checks) share a single bounded verification queue instead of each
//! spawning its own worker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::try_join_all;
use once_cell::sync::Lazy;
use tower::{Service, ServiceExt};

use primitives::{
    block::{Block, Height},
    parameters::{Network, NetworkUpgrade},
    transaction::Transaction,
    transparent, BitcoinSerialize,
};
use store::Utxo;

use crate::error::{BlockError, TransactionError};

/// Bounds how many script-verification jobs may be queued at once before a
/// caller waits in `poll_ready`, comfortably above a single block's input
/// count.
const MAX_IN_FLIGHT_SCRIPT_CHECKS: usize = 4096;

/// A single input's script verification job.
#[derive(Clone)]
pub struct Request {
    pub script_pubkey: Vec<u8>,
    pub amount: u64,
    pub transaction_bytes: Arc<Vec<u8>>,
    pub input_index: usize,
    /// The `bitcoinconsensus` verification flags active at the height this
    /// input is being checked at (ยง5's per-softfork script rules).
    pub flags: u32,
}

/// Verifies one input using `bitcoinconsensus`. Stateless and `Clone`, so
/// many can run concurrently; `tower_batch::Batch` still gives us a single
/// bounded queue in front of them.
#[derive(Clone, Default)]
pub struct Verifier;

impl Service<Request> for Verifier {
    type Response = ();
    type Error = tower_batch::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), tower_batch::BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                bitcoinconsensus::verify_with_flags(
                    &req.script_pubkey,
                    req.amount,
                    &req.transaction_bytes,
                    req.input_index,
                    req.flags,
                )
            })
            .await
            .map_err(|error| Box::new(error) as tower_batch::BoxError)?
            .map_err(|error| format!("{:?}", error).into())
        })
    }
}

/// The process-wide script verification queue. Every block and every
/// mempool transaction dispatches its inputs through this single `Batch`,
/// so the number of `bitcoinconsensus` calls running at once is bounded
/// regardless of how many callers are validating concurrently.
static SCRIPT_VERIFIER: Lazy<tower_batch::Batch<Verifier, Request>> =
    Lazy::new(|| tower_batch::Batch::new(Verifier::default(), MAX_IN_FLIGHT_SCRIPT_CHECKS));

fn verifier() -> tower_batch::Batch<Verifier, Request> {
    SCRIPT_VERIFIER.clone()
}

/// Computes the `bitcoinconsensus` verification flags active for a block at
/// `height` on `network`, derived from the softfork activation heights in
/// [`primitives::parameters::NetworkUpgrade`] (ยง5).
pub fn verify_flags(network: Network, height: Height) -> u32 {
    let activated = |upgrade: NetworkUpgrade| {
        upgrade
            .activation_height(network)
            .map_or(false, |activation| height >= activation)
    };

    // P2SH (BIP16) predates every network this node supports, so it is
    // always enforced.
    let mut flags = bitcoinconsensus::VERIFY_P2SH;
    if activated(NetworkUpgrade::BIP66) {
        flags |= bitcoinconsensus::VERIFY_DERSIG;
    }
    if activated(NetworkUpgrade::BIP65) {
        flags |= bitcoinconsensus::VERIFY_CHECKLOCKTIMEVERIFY;
    }
    if activated(NetworkUpgrade::CSV) {
        flags |=
            bitcoinconsensus::VERIFY_CHECKSEQUENCEVERIFY | bitcoinconsensus::VERIFY_NULLDUMMY;
    }
    if activated(NetworkUpgrade::SegWit) {
        flags |= bitcoinconsensus::VERIFY_WITNESS;
    }
    flags
}

/// Builds one [`Request`] per non-coinbase input across `transactions`,
/// resolving each against `spent_utxos`.
fn build_requests(
    transactions: &[Arc<Transaction>],
    spent_utxos: &HashMap<transparent::OutPoint, Utxo>,
    flags: u32,
) -> Result<Vec<Request>, TransactionError> {
    let mut requests = Vec::new();
    for tx in transactions {
        let mut tx_bytes = Vec::new();
        tx.bitcoin_serialize(&mut tx_bytes)
            .expect("serializing an in-memory transaction cannot fail");
        let tx_bytes = Arc::new(tx_bytes);

        for (index, input) in tx.inputs.iter().enumerate() {
            let outpoint = match input {
                transparent::Input::PrevOut { outpoint, .. } => outpoint,
                transparent::Input::Coinbase { .. } => continue,
            };
            let utxo = spent_utxos
                .get(outpoint)
                .ok_or(TransactionError::MissingInput(*outpoint))?;

            requests.push(Request {
                script_pubkey: utxo.output.lock_script.0.clone(),
                amount: utxo.output.value.satoshis() as u64,
                transaction_bytes: tx_bytes.clone(),
                input_index: index,
                flags,
            });
        }
    }
    Ok(requests)
}

/// Runs every built `Request` concurrently against the shared
/// [`SCRIPT_VERIFIER`] queue, failing with the first input index that did
/// not verify.
async fn run_requests(requests: Vec<Request>) -> Result<(), usize> {
    let verifier = verifier();
    try_join_all(requests.into_iter().map(|request| {
        let verifier = verifier.clone();
        let input_index = request.input_index;
        async move {
            verifier
                .oneshot(request)
                .await
                .map_err(|_| input_index)
        }
    }))
    .await?;
    Ok(())
}

/// Verifies every non-coinbase input's script in `block` against the
/// outputs it spends, dispatching every input concurrently.
pub async fn verify_block_scripts(
    block: &Block,
    network: Network,
    height: Height,
    spent_utxos: &HashMap<transparent::OutPoint, Utxo>,
) -> Result<(), BlockError> {
    let flags = verify_flags(network, height);
    // The coinbase has no `PrevOut` inputs, so `build_requests` already
    // skips it; passing the full transaction list keeps the indices used in
    // any future per-transaction error reporting aligned with the block.
    let non_coinbase = block.transactions.get(1..).unwrap_or(&[]);
    let requests = build_requests(non_coinbase, spent_utxos, flags)?;

    run_requests(requests)
        .await
        .map_err(|_| BlockError::ScriptFailed)
}

/// Verifies every input's script in a single standalone transaction,
/// dispatched concurrently through the same shared queue `verify_block_scripts`
/// uses. Used by the mempool before admitting a transaction (ยง4.3).
pub async fn verify_transaction_scripts(
    tx: &Transaction,
    network: Network,
    height: Height,
    spent_utxos: &HashMap<transparent::OutPoint, Utxo>,
) -> Result<(), TransactionError> {
    let flags = verify_flags(network, height);
    let tx_arc = Arc::new(tx.clone());
    let requests = build_requests(std::slice::from_ref(&tx_arc), spent_utxos, flags)?;

    run_requests(requests)
        .await
        .map_err(TransactionError::ScriptFailed)
}
