//! Chain finality tracking for different L1/L2 networks
//!
//! Different chains have different finality models:
//! - Ethereum: Probabilistic (32 blocks for practical finality, ~6 min)
//! - Polygon: Probabilistic (128 blocks)
//! - Arbitrum / Optimism / Base: soft finality from the sequencer
//! - Avalanche, Godwoken: Instant finality (1 block)

use super::provider::ChainProvider;
use crate::error::ChainError;

use ethers::types::{TransactionReceipt, H256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where a tracked transaction stands relative to finality
#[derive(Debug)]
pub enum Progress {
    /// No receipt yet
    NotMined,
    Confirming { confirmations: u64 },
    Final(TransactionReceipt),
}

/// Tracks finality for transactions on a specific chain
pub struct FinalityTracker {
    /// Chain ID
    chain_id: u64,
    /// Required confirmation blocks, the inclusion block counts as one
    confirmation_blocks: u64,
    /// Chain provider
    provider: Arc<ChainProvider>,
    /// Delay between receipt polls
    poll_interval: Duration,
    /// Give up waiting after this long
    timeout: Duration,
    /// Seen-mined transactions: tx_hash -> block_number
    pending: RwLock<HashMap<H256, u64>>,
}

impl FinalityTracker {
    /// Create a new finality tracker
    pub fn new(
        chain_id: u64,
        confirmation_blocks: u64,
        provider: Arc<ChainProvider>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            chain_id,
            confirmation_blocks: confirmation_blocks.max(1),
            provider,
            poll_interval,
            timeout,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Poll until the transaction is final, reverted, or the timeout elapses
    pub async fn wait(&self, tx_hash: H256) -> Result<TransactionReceipt, ChainError> {
        let started = Instant::now();

        loop {
            match self.check(tx_hash).await? {
                Progress::Final(receipt) => {
                    info!(
                        "Transaction {:?} finalized on chain {} after {:?}",
                        tx_hash,
                        self.chain_id,
                        started.elapsed()
                    );
                    return Ok(receipt);
                }
                Progress::Confirming { confirmations } => {
                    debug!(
                        "Transaction {:?} has {} / {} confirmations on chain {}",
                        tx_hash, confirmations, self.confirmation_blocks, self.chain_id
                    );
                }
                Progress::NotMined => {
                    debug!("Transaction {:?} not mined yet on chain {}", tx_hash, self.chain_id);
                }
            }

            if started.elapsed() >= self.timeout {
                self.pending.write().await.remove(&tx_hash);
                return Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Check a transaction's progress once
    pub async fn check(&self, tx_hash: H256) -> Result<Progress, ChainError> {
        let receipt = match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                if let Some(block) = self.pending.write().await.remove(&tx_hash) {
                    // Reorg: it was included and is no longer
                    warn!(
                        "Reorg detected: tx {:?} no longer included on chain {} (was block {})",
                        tx_hash, self.chain_id, block
                    );
                }
                return Ok(Progress::NotMined);
            }
        };

        let tx_block = match receipt.block_number {
            Some(block) => block.as_u64(),
            None => return Ok(Progress::NotMined),
        };

        if receipt.status == Some(0u64.into()) {
            self.pending.write().await.remove(&tx_hash);
            return Err(ChainError::Reverted {
                tx_hash,
                block_number: tx_block,
            });
        }

        self.pending.write().await.insert(tx_hash, tx_block);

        let current_block = self.provider.get_block_number().await?;
        let confirmations = confirmations(current_block, tx_block);

        if confirmations >= self.confirmation_blocks {
            self.pending.write().await.remove(&tx_hash);
            return Ok(Progress::Final(receipt));
        }

        Ok(Progress::Confirming { confirmations })
    }
}

/// Confirmations of a transaction included at `tx_block`
pub fn confirmations(current_block: u64, tx_block: u64) -> u64 {
    if current_block < tx_block {
        // Lagging RPC node behind the one that served the receipt
        return 1;
    }
    current_block - tx_block + 1
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon testnets
        80001 | 80002 => 32,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Godwoken v1 mainnet / testnet
        71402 | 71401 => 1,
        // Local dev chains
        31337 | 1337 => 1,
        // Default conservative
        _ => 64,
    }
}
