//! Chain module - the network boundary of the deployer
//!
//! This module provides:
//! - The `ChainAdapter` trait the submitter dispatches and confirms through
//! - An ethers-backed adapter with multi-RPC failover
//! - Chain-specific finality tracking

pub mod finality;
pub mod provider;

pub use finality::FinalityTracker;
pub use provider::{EthersChainAdapter, GasPrice};

use crate::error::ChainError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// What the network currently knows about a transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Neither mined nor in the mempool (never broadcast, or dropped)
    Unknown,
    InMempool,
    Mined,
}

impl TxStatus {
    pub fn is_known(&self) -> bool {
        !matches!(self, TxStatus::Unknown)
    }
}

/// Confirmed outcome of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub block_number: u64,
    /// Set when the transaction created a contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    pub gas_used: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<U256>,
}

/// Network access required by the transaction submitter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Chain ID this adapter talks to
    fn chain_id(&self) -> u64;

    /// Sign and broadcast a transaction, returning its hash
    async fn dispatch(&self, tx: TypedTransaction) -> Result<H256, ChainError>;

    /// Look up whether the network knows a previously broadcast hash
    async fn transaction_status(&self, tx_hash: H256) -> Result<TxStatus, ChainError>;

    /// Wait until the transaction is final and return its receipt
    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<Receipt, ChainError>;

    /// Current network gas price quote
    async fn gas_price(&self) -> Result<GasPrice, ChainError>;

    /// Read-only call against the latest block
    async fn call(&self, tx: TypedTransaction) -> Result<Bytes, ChainError>;
}
