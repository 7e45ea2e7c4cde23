//! Tesseract Deployer - resumable contract deployment
//!
//! Every state-changing step of a deployment runs through a
//! `TransactionSubmitter`, which records the outcome of each labelled step in
//! a history ledger on disk. Re-running an interrupted deployment skips the
//! confirmed steps and picks pending transactions back up instead of sending
//! them twice.

pub mod chain;
pub mod config;
pub mod deploy;
pub mod error;
pub mod history;
pub mod metrics;
pub mod tx;

pub use chain::{ChainAdapter, EthersChainAdapter, Receipt};
pub use error::{ChainError, DeployError, DeployResult};
pub use history::{HistoryStore, SubmissionRecord, SubmissionStatus};
pub use tx::{SubmissionRequest, TransactionSubmitter};
