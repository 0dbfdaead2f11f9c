use alloy::primitives::B256;
use thiserror::Error;

/// Failure of a registry read or write.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("{function} reverted: {reason}")]
    Reverted { function: String, reason: String },

    #[error("transaction {tx_hash} failed: receipt status is not successful")]
    ReceiptFailed { tx_hash: B256 },

    #[error("none of the specified events were emitted ({expected}); transaction {tx_hash} was mined")]
    EventMissing { tx_hash: B256, expected: String },

    #[error("transaction cancelled by user")]
    Declined,

    #[error("no signing key configured; set ETH_PRIVATE_KEY or use --unsigned")]
    ReadOnly,

    #[error("hardware wallet signing is not supported")]
    HardwareWalletUnsupported,

    #[error("unsupported workflow registry at {address}: typeAndVersion is {type_and_version:?}")]
    UnsupportedRegistry {
        address: String,
        type_and_version: String,
    },

    #[error("failed to decode {function} result: {reason}")]
    Decode { function: String, reason: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[source] std::io::Error),
}

impl TxError {
    /// True for a mined transaction whose expected event was not found.
    pub fn is_event_missing(&self) -> bool {
        matches!(self, Self::EventMissing { .. })
    }

    /// Hash of the transaction the error refers to, when one was mined.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::ReceiptFailed { tx_hash } | Self::EventMissing { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}
