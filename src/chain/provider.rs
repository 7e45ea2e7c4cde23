//! Ethers-backed chain adapter with multi-RPC support and automatic failover

use super::finality::{recommended_confirmations, FinalityTracker};
use super::{ChainAdapter, Receipt, TxStatus};
use crate::config::{GasPriceStrategy, NetworkConfig, SubmitterConfig};
use crate::error::ChainError;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Transaction, TransactionReceipt, H256, U256,
};
use ethers::utils::keccak256;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Buffer percentage applied to estimated gas limits
const GAS_LIMIT_BUFFER_PERCENT: u64 = 20;

/// How long a single broadcast may take before we look the hash up instead
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(chain_id: u64, rpc_urls: &[String]) -> Result<Self, ChainError> {
        let mut http_providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(ChainError::Connection {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    fn connection_error(&self, message: impl Into<String>) -> ChainError {
        ChainError::Connection {
            chain_id: self.chain_id,
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> Result<u64, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Get transaction receipt with failover
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Failed to get receipt for {:?} from chain {}: {}",
                        tx_hash, self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get receipt"))
    }

    /// Get transaction by hash with failover
    pub async fn get_transaction(&self, tx_hash: H256) -> Result<Option<Transaction>, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction(tx_hash).await {
                Ok(tx) => return Ok(tx),
                Err(e) => {
                    warn!(
                        "Failed to get transaction {:?} from chain {}: {}",
                        tx_hash, self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get transaction"))
    }

    /// Execute a read-only call with failover
    pub async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!("Call failed on chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to execute call"))
    }

    /// Get the next nonce for an account, counting mempool transactions
    pub async fn get_pending_nonce(&self, account: Address) -> Result<U256, ChainError> {
        self.http()
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| ChainError::GasEstimation(e.to_string()))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(
        &self,
        strategy: &GasPriceStrategy,
        max_gas_price_gwei: u64,
    ) -> Result<GasPrice, ChainError> {
        match strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| ChainError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees(max_gas_price_gwei).await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(
        &self,
        max_gas_price_gwei: u64,
    ) -> Result<(U256, U256), ChainError> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| ChainError::GasEstimation(e.to_string()))?
            .ok_or_else(|| ChainError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| ChainError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei default

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        let max_gwei = U256::from(max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, priority_fee))
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Production adapter: signs locally and talks JSON-RPC over HTTP
pub struct EthersChainAdapter {
    provider: Arc<ChainProvider>,
    finality: FinalityTracker,
    wallet: LocalWallet,
    gas_price_strategy: GasPriceStrategy,
    max_gas_price_gwei: u64,
}

impl EthersChainAdapter {
    /// Create an adapter for the configured network
    pub fn new(
        network: &NetworkConfig,
        submitter: &SubmitterConfig,
        wallet: LocalWallet,
    ) -> Result<Self, ChainError> {
        let provider = Arc::new(ChainProvider::new(network.chain_id, &network.rpc_urls)?);

        let confirmation_blocks = network
            .confirmation_blocks
            .unwrap_or_else(|| recommended_confirmations(network.chain_id));

        let finality = FinalityTracker::new(
            network.chain_id,
            confirmation_blocks,
            provider.clone(),
            Duration::from_millis(submitter.poll_interval_ms),
            Duration::from_secs(submitter.confirmation_timeout_secs),
        );

        info!(
            "Chain adapter for chain {} ready ({} RPC URLs, {} confirmations)",
            network.chain_id,
            network.rpc_urls.len(),
            confirmation_blocks
        );

        Ok(Self {
            provider,
            finality,
            wallet: wallet.with_chain_id(network.chain_id),
            gas_price_strategy: network.gas_price_strategy.clone(),
            max_gas_price_gwei: network.max_gas_price_gwei,
        })
    }

    /// Load wallet from the configured environment variable
    pub fn load_wallet(private_key_env: &str) -> Result<LocalWallet, ChainError> {
        let key = std::env::var(private_key_env).map_err(|_| {
            ChainError::Wallet(format!("No wallet configured. Set {}", private_key_env))
        })?;

        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Wallet(format!("Invalid private key: {}", e)))
    }

    /// Get wallet address
    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    /// Fill sender, nonce, chain and gas limit
    async fn fill(&self, tx: &mut TypedTransaction) -> Result<(), ChainError> {
        let from = self.wallet.address();
        tx.set_from(from);
        tx.set_chain_id(self.provider.chain_id());

        let nonce = self.provider.get_pending_nonce(from).await?;
        tx.set_nonce(nonce);

        if tx.gas().is_none() {
            let estimate = self.provider.estimate_gas(tx).await.map_err(|e| {
                // A failing estimate means the node would reject the call
                ChainError::Dispatch {
                    reason: e.to_string(),
                }
            })?;
            let buffer = estimate * GAS_LIMIT_BUFFER_PERCENT / 100;
            tx.set_gas(estimate + buffer);
        }

        debug!(
            "Filled transaction: nonce {}, gas {:?}",
            nonce,
            tx.gas()
        );
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for EthersChainAdapter {
    fn chain_id(&self) -> u64 {
        self.provider.chain_id()
    }

    async fn dispatch(&self, mut tx: TypedTransaction) -> Result<H256, ChainError> {
        self.fill(&mut tx).await?;

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = H256::from(keccak256(&raw));

        let send = self.provider.http().send_raw_transaction(raw);
        let sent = match timeout(SEND_TIMEOUT, send).await {
            Ok(Ok(pending_tx)) => Some(Ok(*pending_tx)),
            Ok(Err(e)) => Some(Err(e.to_string())),
            Err(_) => None,
        };

        resolve_send(tx_hash, sent)
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<TxStatus, ChainError> {
        let status = match self.provider.get_transaction(tx_hash).await? {
            None => TxStatus::Unknown,
            Some(tx) if tx.block_number.is_some() => TxStatus::Mined,
            Some(_) => TxStatus::InMempool,
        };
        debug!("Transaction {:?} status on chain {}: {:?}", tx_hash, self.chain_id(), status);
        Ok(status)
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<Receipt, ChainError> {
        let receipt = self.finality.wait(tx_hash).await?;
        to_receipt(self.chain_id(), tx_hash, &receipt)
    }

    async fn gas_price(&self) -> Result<GasPrice, ChainError> {
        self.provider
            .get_gas_price(&self.gas_price_strategy, self.max_gas_price_gwei)
            .await
    }

    async fn call(&self, mut tx: TypedTransaction) -> Result<Bytes, ChainError> {
        tx.set_from(self.wallet.address());
        self.provider.call(&tx).await
    }
}

/// Outcome of broadcasting the signed transaction `tx_hash`; `None` means the send timed out
///
/// Once the node may hold the transaction its hash is returned, so the caller
/// records it as pending and later polls it instead of signing a second one.
pub fn resolve_send(
    tx_hash: H256,
    sent: Option<Result<H256, String>>,
) -> Result<H256, ChainError> {
    match sent {
        Some(Ok(sent_hash)) => {
            info!("Transaction sent: {:?}", sent_hash);
            Ok(sent_hash)
        }
        Some(Err(message)) if is_already_known(&message) => {
            info!("Transaction {:?} already known to the node: {}", tx_hash, message);
            Ok(tx_hash)
        }
        Some(Err(message)) => {
            let err = classify_send_error(&message);
            error!("Transaction {:?} rejected: {}", tx_hash, err);
            Err(err)
        }
        None => {
            warn!(
                "Transaction send timeout after {}s for {:?}, treating it as in flight",
                SEND_TIMEOUT.as_secs(),
                tx_hash
            );
            Ok(tx_hash)
        }
    }
}

/// The node already holds this exact transaction
fn is_already_known(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already known") || lower.contains("known transaction")
}

/// Map a node's rejection message to a dispatch error
pub fn classify_send_error(message: &str) -> ChainError {
    let lower = message.to_lowercase();
    let reason = if lower.contains("nonce too low") {
        format!("nonce conflict: {}", message)
    } else if lower.contains("replacement transaction underpriced") {
        format!("underpriced replacement: {}", message)
    } else if lower.contains("insufficient funds") {
        format!("insufficient balance: {}", message)
    } else {
        message.to_string()
    };

    ChainError::Dispatch { reason }
}

/// Convert a finalized ethers receipt into the ledger's receipt
pub fn to_receipt(
    chain_id: u64,
    tx_hash: H256,
    receipt: &TransactionReceipt,
) -> Result<Receipt, ChainError> {
    let block_number = receipt
        .block_number
        .map(|b| b.as_u64())
        .ok_or_else(|| ChainError::Connection {
            chain_id,
            message: format!("Receipt for {:?} has no block number", tx_hash),
        })?;

    Ok(Receipt {
        transaction_hash: tx_hash,
        block_number,
        contract_address: receipt.contract_address,
        gas_used: receipt.gas_used.unwrap_or_default(),
        effective_gas_price: receipt.effective_gas_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    #[test]
    fn test_classify_send_error() {
        match classify_send_error("nonce too low: next nonce 5, tx nonce 3") {
            ChainError::Dispatch { reason } => assert!(reason.starts_with("nonce conflict")),
            other => panic!("unexpected error: {:?}", other),
        }
        match classify_send_error("insufficient funds for gas * price + value") {
            ChainError::Dispatch { reason } => assert!(reason.starts_with("insufficient balance")),
            other => panic!("unexpected error: {:?}", other),
        }
        match classify_send_error("execution reverted") {
            ChainError::Dispatch { reason } => assert_eq!(reason, "execution reverted"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_send_keeps_hash_once_broadcast() {
        let tx_hash = H256::repeat_byte(0x5a);

        // Timed out: the node may still have it
        assert_eq!(resolve_send(tx_hash, None).unwrap(), tx_hash);

        // Pool already holds the same signed transaction
        assert_eq!(
            resolve_send(tx_hash, Some(Err("already known".to_string()))).unwrap(),
            tx_hash
        );
        let known = format!("known transaction: {:x}", tx_hash);
        assert_eq!(resolve_send(tx_hash, Some(Err(known))).unwrap(), tx_hash);

        let sent = H256::repeat_byte(0x5b);
        assert_eq!(resolve_send(tx_hash, Some(Ok(sent))).unwrap(), sent);
    }

    #[test]
    fn test_resolve_send_rejection_is_dispatch_error() {
        let tx_hash = H256::repeat_byte(0x5c);
        let message = "insufficient funds for gas * price + value".to_string();
        match resolve_send(tx_hash, Some(Err(message))) {
            Err(ChainError::Dispatch { reason }) => {
                assert!(reason.starts_with("insufficient balance"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_to_receipt_keeps_contract_address() {
        let tx_hash = H256::repeat_byte(0xab);
        let contract = Address::repeat_byte(0x11);
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(42)),
            contract_address: Some(contract),
            gas_used: Some(U256::from(21_000)),
            status: Some(U64::from(1)),
            ..Default::default()
        };

        let converted = to_receipt(1, tx_hash, &receipt).unwrap();
        assert_eq!(converted.block_number, 42);
        assert_eq!(converted.contract_address, Some(contract));
        assert_eq!(converted.gas_used, U256::from(21_000));
        assert_eq!(converted.effective_gas_price, None);
    }

    #[test]
    fn test_provider_requires_valid_url() {
        assert!(ChainProvider::new(1, &["not a url".to_string()]).is_err());
        assert!(ChainProvider::new(1, &["http://localhost:8545".to_string()]).is_ok());
    }
}
