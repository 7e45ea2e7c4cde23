//! Error types for the Tesseract deployer

use ethers::types::H256;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a chain adapter while dispatching or confirming
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Transaction rejected at submission: {reason}")]
    Dispatch { reason: String },

    #[error("Timed out after {waited_secs}s waiting for confirmation of {tx_hash:?}")]
    ConfirmationTimeout { tx_hash: H256, waited_secs: u64 },

    #[error("Transaction {tx_hash:?} reverted in block {block_number}")]
    Reverted { tx_hash: H256, block_number: u64 },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    Connection { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl ChainError {
    /// Check if the transaction may still land on chain after this error
    pub fn leaves_pending(&self) -> bool {
        matches!(
            self,
            ChainError::ConfirmationTimeout { .. } | ChainError::Connection { .. }
        )
    }
}

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("History ledger {path:?} is corrupt: {source}")]
    CorruptHistory {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("History ledger I/O error on {path:?}: {source}")]
    HistoryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite confirmed record for '{label}'")]
    ConfirmedImmutable { label: String },

    #[error("Submission '{label}' failed: {cause}")]
    SubmissionFailed {
        label: String,
        #[source]
        cause: ChainError,
    },

    #[error("Submission '{label}' failed previously and retries are disabled: {detail}")]
    RetryDisabled { label: String, detail: String },

    #[error("Reading {signature} after '{label}' failed: {cause}")]
    ViewRead {
        label: String,
        signature: String,
        #[source]
        cause: ChainError,
    },

    #[error("Artifact error for {path:?}: {message}")]
    Artifact { path: PathBuf, message: String },
}

impl DeployError {
    /// Label of the deployment step the error belongs to, if any
    pub fn label(&self) -> Option<&str> {
        match self {
            DeployError::ConfirmedImmutable { label }
            | DeployError::SubmissionFailed { label, .. }
            | DeployError::RetryDisabled { label, .. }
            | DeployError::ViewRead { label, .. } => Some(label),
            _ => None,
        }
    }
}

/// Result type for deployer operations
pub type DeployResult<T> = Result<T, DeployError>;
