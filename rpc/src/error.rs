//! JSON-RPC error codes.
//!
//! Every user-visible RPC failure maps to one of these stable numeric
//! identifiers, independent of the internal error type (`ConsensusError`,
//! `MempoolError`, ...) that produced it.

use displaydoc::Display;
use thiserror::Error;

/// An error returned to an RPC client, carrying the JSON-RPC error code it
/// serializes to.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum RpcError {
    /// the requested method does not exist
    MethodNotFound,
    /// invalid params: {0}
    InvalidParams(String),
    /// block not found
    BlockNotFound,
    /// {0}
    VerifyRejected(String),
    /// {0}
    VerifyError(String),
    /// client requested an action not supported while syncing
    ClientNotConnected,
    /// internal error: {0}
    Internal(String),
}

impl RpcError {
    /// Returns this error's JSON-RPC `error.code`.
    ///
    /// `-32601`/`-32602` are the JSON-RPC 2.0 spec's own reserved codes;
    /// the rest are Bitcoin Core's conventional RPC error codes, kept
    /// stable so existing RPC clients' error handling keeps working.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::MethodNotFound => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::BlockNotFound => -5,
            RpcError::VerifyRejected(_) => -26,
            RpcError::VerifyError(_) => -25,
            RpcError::ClientNotConnected => -9,
            RpcError::Internal(_) => -32603,
        }
    }
}

impl From<chain::ConsensusError> for RpcError {
    fn from(error: chain::ConsensusError) -> Self {
        match error {
            chain::ConsensusError::NotFound => RpcError::BlockNotFound,
            other => RpcError::Internal(other.to_string()),
        }
    }
}

impl From<mempool::MempoolError> for RpcError {
    fn from(error: mempool::MempoolError) -> Self {
        match error {
            mempool::MempoolError::Duplicate => RpcError::VerifyRejected(error.to_string()),
            other => RpcError::VerifyRejected(other.to_string()),
        }
    }
}
