use crate::orchestrator::Intent;
use game_abi::{
    DecodeError,
    TokenAmount,
    TxHash,
};
use tracing::debug;

/// JSON-RPC level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("node unreachable: {0}")]
    Unreachable(String),
    #[error("node returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure of a single read. Absorbed by the cache; the last good value stays visible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("not connected to a node")]
    NotConnected,
    #[error("network error: {0}")]
    Network(String),
    #[error("could not decode contract response: {0}")]
    Decode(#[from] DecodeError),
}

impl ReadError {
    /// A decode failure means the contract and client disagree on the interface.
    pub fn is_version_skew(&self) -> bool {
        matches!(self, ReadError::Decode(_))
    }
}

impl From<RpcError> for ReadError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Malformed(detail) => ReadError::Decode(DecodeError::Hex(detail)),
            RpcError::Unreachable(detail) => {
                debug!(%detail, "node refused the connection");
                ReadError::NotConnected
            }
            other => ReadError::Network(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no wallet connected")]
    NotConnected,
    #[error("wallet is on chain {actual}, expected chain {expected}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("contract interface mismatch: {0}")]
    Decode(DecodeError),
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        required: TokenAmount,
        available: TokenAmount,
    },
    #[error("insufficient allowance: need {required}, approved {approved}")]
    InsufficientAllowance {
        required: TokenAmount,
        approved: TokenAmount,
    },
    #[error("signature request was declined")]
    UserRejected,
    #[error("transaction {hash} reverted")]
    Reverted { hash: TxHash },
    #[error("stopped waiting for confirmation of {hash}")]
    WaitCancelled { hash: TxHash },
    #[error("{0} is already in progress")]
    ConcurrentOperation(Intent),
}

impl Error {
    /// Errors a user may simply try again after; never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::UserRejected | Error::WaitCancelled { .. }
        )
    }

    pub fn is_version_skew(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

impl From<ReadError> for Error {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::NotConnected => Error::Network("not connected to a node".to_string()),
            ReadError::Network(detail) => Error::Network(detail),
            ReadError::Decode(decode) => Error::Decode(decode),
        }
    }
}
