//! Gas pricing for a deployment run

use crate::chain::{ChainAdapter, GasPrice};
use crate::error::ChainError;

use tokio::sync::OnceCell;
use tracing::debug;

/// Fetches the network gas price once per run and buffers it
pub struct GasEstimator {
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    /// Price used by every step of this run
    cached: OnceCell<GasPrice>,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new(gas_price_buffer_percent: u64) -> Self {
        Self {
            gas_price_buffer_percent,
            cached: OnceCell::new(),
        }
    }

    /// Buffered gas price, fetched from the chain on first use
    pub async fn price(&self, chain: &dyn ChainAdapter) -> Result<GasPrice, ChainError> {
        let price = self
            .cached
            .get_or_try_init(|| async {
                let quote = chain.gas_price().await?;
                let buffered = self.buffered(&quote);
                debug!("Gas price for chain {}: {:?}", chain.chain_id(), buffered);
                Ok::<_, ChainError>(buffered)
            })
            .await?;

        Ok(price.clone())
    }

    fn buffered(&self, gas_price: &GasPrice) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                let buffer = *price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy(*price + buffer)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = *max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    *max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                GasPrice::Eip1559 {
                    max_fee_per_gas: *max_fee_per_gas + fee_buffer,
                    max_priority_fee_per_gas: *max_priority_fee_per_gas + priority_buffer,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainAdapter;
    use ethers::types::U256;

    #[tokio::test]
    async fn test_price_fetched_once_and_buffered() {
        let mut chain = MockChainAdapter::new();
        chain.expect_chain_id().return_const(71401u64);
        chain
            .expect_gas_price()
            .times(1)
            .returning(|| Ok(GasPrice::Legacy(U256::from(1_000))));

        let estimator = GasEstimator::new(10);
        for _ in 0..3 {
            let price = estimator.price(&chain).await.unwrap();
            assert_eq!(price, GasPrice::Legacy(U256::from(1_100)));
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let mut chain = MockChainAdapter::new();
        chain.expect_chain_id().return_const(1u64);
        let mut calls = 0;
        chain.expect_gas_price().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Err(ChainError::GasEstimation("node unavailable".to_string()))
            } else {
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: U256::from(200),
                    max_priority_fee_per_gas: U256::from(10),
                })
            }
        });

        let estimator = GasEstimator::new(10);
        assert!(estimator.price(&chain).await.is_err());
        assert_eq!(
            estimator.price(&chain).await.unwrap(),
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(220),
                max_priority_fee_per_gas: U256::from(11),
            }
        );
    }
}
