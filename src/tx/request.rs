//! Submission requests: the network call a deployment step performs

use crate::chain::{ChainAdapter, GasPrice};
use crate::error::ChainError;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, H256, U256};

/// One state-changing operation, invoked only when history has no confirmation for it
#[async_trait]
pub trait SubmissionRequest: Send + Sync {
    /// Dispatch the operation and return its transaction hash
    async fn execute(&self, chain: &dyn ChainAdapter, gas_price: &GasPrice)
        -> Result<H256, ChainError>;
}

/// Contract creation from init code (bytecode followed by encoded constructor args)
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub init_code: Bytes,
    pub gas_limit: Option<U256>,
}

impl DeployRequest {
    pub fn new(bytecode: Bytes, constructor_args: Bytes) -> Self {
        let mut init_code = bytecode.to_vec();
        init_code.extend_from_slice(&constructor_args);
        Self {
            init_code: init_code.into(),
            gas_limit: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: Option<U256>) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

#[async_trait]
impl SubmissionRequest for DeployRequest {
    async fn execute(
        &self,
        chain: &dyn ChainAdapter,
        gas_price: &GasPrice,
    ) -> Result<H256, ChainError> {
        let tx = build_tx(None, self.init_code.clone(), U256::zero(), self.gas_limit, gas_price);
        chain.dispatch(tx).await
    }
}

/// Call into an already deployed contract with pre-encoded calldata
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
}

#[async_trait]
impl SubmissionRequest for CallRequest {
    async fn execute(
        &self,
        chain: &dyn ChainAdapter,
        gas_price: &GasPrice,
    ) -> Result<H256, ChainError> {
        let tx = build_tx(Some(self.to), self.data.clone(), self.value, self.gas_limit, gas_price);
        chain.dispatch(tx).await
    }
}

/// Build an unsigned transaction; `to == None` creates a contract
pub fn build_tx(
    to: Option<Address>,
    data: Bytes,
    value: U256,
    gas_limit: Option<U256>,
    gas_price: &GasPrice,
) -> TypedTransaction {
    match gas_price {
        GasPrice::Legacy(price) => {
            let mut tx = TransactionRequest::new().data(data).value(value).gas_price(*price);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            if let Some(gas) = gas_limit {
                tx = tx.gas(gas);
            }
            TypedTransaction::Legacy(tx)
        }
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let mut tx = Eip1559TransactionRequest::new()
                .data(data)
                .value(value)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            if let Some(gas) = gas_limit {
                tx = tx.gas(gas);
            }
            TypedTransaction::Eip1559(tx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainAdapter;
    use mockall::predicate::function;

    #[test]
    fn test_init_code_appends_constructor_args() {
        let request = DeployRequest::new(
            Bytes::from(vec![0x60, 0x80]),
            Bytes::from(vec![0x00, 0x01]),
        );
        assert_eq!(request.init_code.to_vec(), vec![0x60, 0x80, 0x00, 0x01]);
        assert_eq!(request.gas_limit, None);
    }

    #[test]
    fn test_build_tx_creation_has_no_recipient() {
        let tx = build_tx(
            None,
            Bytes::from(vec![0x60]),
            U256::zero(),
            Some(U256::from(500_000)),
            &GasPrice::Legacy(U256::from(7)),
        );
        assert!(tx.to().is_none());
        assert_eq!(tx.gas(), Some(&U256::from(500_000)));
        assert_eq!(tx.gas_price(), Some(U256::from(7)));

        let to = Address::repeat_byte(0x22);
        let tx = build_tx(
            Some(to),
            Bytes::default(),
            U256::zero(),
            None,
            &GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(100),
                max_priority_fee_per_gas: U256::from(2),
            },
        );
        assert_eq!(tx.to_addr(), Some(&to));
        assert!(tx.gas().is_none());
        assert!(matches!(tx, TypedTransaction::Eip1559(_)));
    }

    #[tokio::test]
    async fn test_deploy_request_dispatches_creation() {
        let hash = H256::repeat_byte(0x33);
        let mut chain = MockChainAdapter::new();
        chain
            .expect_dispatch()
            .with(function(|tx: &TypedTransaction| {
                tx.to().is_none() && tx.data().map(|d| d.to_vec()) == Some(vec![0x60, 0x80])
            }))
            .times(1)
            .returning(move |_| Ok(hash));

        let request = DeployRequest::new(Bytes::from(vec![0x60, 0x80]), Bytes::default());
        let sent = request
            .execute(&chain, &GasPrice::Legacy(U256::from(1)))
            .await
            .unwrap();
        assert_eq!(sent, hash);
    }

    #[tokio::test]
    async fn test_call_request_targets_contract() {
        let to = Address::repeat_byte(0x44);
        let mut chain = MockChainAdapter::new();
        chain
            .expect_dispatch()
            .with(function(move |tx: &TypedTransaction| {
                tx.to_addr() == Some(&to) && tx.value() == Some(&U256::from(5))
            }))
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x45)));

        let request = CallRequest {
            to,
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            value: U256::from(5),
            gas_limit: None,
        };
        let sent = request
            .execute(&chain, &GasPrice::Legacy(U256::from(1)))
            .await
            .unwrap();
        assert_eq!(sent, H256::repeat_byte(0x45));
    }
}
