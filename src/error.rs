use std::time::Duration;

use ethers::types::H256;
use thiserror::Error;

/// Every way a sponsored deployment can end other than confirmation.
///
/// Reasons reported by the network, the paymaster or the signer are carried
/// verbatim.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid allowance: {0}")]
    InvalidAllowance(String),

    #[error("Constructor argument mismatch: {0}")]
    ArgumentMismatch(String),

    #[error("Invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("Gas estimation failed: {0}")]
    EstimationFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Deployment cancelled before broadcast")]
    Cancelled,

    #[error("Transaction {tx_hash:?} was not confirmed within {timeout:?}")]
    ConfirmationTimeout { tx_hash: H256, timeout: Duration },

    #[error("Transaction {tx_hash:?} was broadcast but its outcome is unknown: {reason}")]
    Indeterminate { tx_hash: H256, reason: String },

    #[error("Transaction {tx_hash:?} was included but the deployment reverted")]
    TransactionReverted { tx_hash: H256 },
}

impl DeploymentError {
    /// Errors raised locally, before anything reached the network.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_)
                | Self::InvalidAllowance(_)
                | Self::ArgumentMismatch(_)
                | Self::InvalidBytecode(_)
        )
    }

    /// The network refused the transaction, so retrying with a fresh nonce
    /// cannot produce a duplicate deployment.
    pub fn is_retriable_with_fresh_nonce(&self) -> bool {
        matches!(
            self,
            Self::EstimationFailed(_)
                | Self::SigningFailed(_)
                | Self::BroadcastFailed(_)
                | Self::Cancelled
        )
    }

    /// The broadcast went through but nothing is known about the outcome;
    /// the caller has to look on chain before retrying.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, Self::Indeterminate { .. })
    }
}

/// Formats an eyre report with its whole cause chain.
pub(crate) fn reason(err: &eyre::Report) -> String {
    format!("{err:#}")
}
