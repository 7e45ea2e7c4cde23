//! Idempotent transaction submission backed by the history ledger

use super::gas::GasEstimator;
use super::request::SubmissionRequest;
use crate::chain::{ChainAdapter, Receipt};
use crate::config::SubmitterConfig;
use crate::error::{ChainError, DeployError, DeployResult};
use crate::history::{HistoryStore, SubmissionRecord, SubmissionStatus};
use crate::metrics;

use ethers::types::H256;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Runs labelled steps against the chain at most once each
pub struct TransactionSubmitter {
    /// History ledger, owned for the whole run
    store: HistoryStore,
    /// Network access
    chain: Arc<dyn ChainAdapter>,
    /// Run-wide gas price
    gas_estimator: GasEstimator,
    /// Whether `Failed` steps may be attempted again
    retry_failed: bool,
}

impl TransactionSubmitter {
    /// Create a new transaction submitter
    pub fn new(
        store: HistoryStore,
        chain: Arc<dyn ChainAdapter>,
        config: &SubmitterConfig,
    ) -> Self {
        Self {
            store,
            chain,
            gas_estimator: GasEstimator::new(config.gas_price_buffer_percent),
            retry_failed: config.retry_failed,
        }
    }

    /// History ledger of this run
    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Network the steps are submitted to
    pub fn chain(&self) -> &dyn ChainAdapter {
        self.chain.as_ref()
    }

    /// Submit `request` under `label` unless history already confirms it, then wait for finality
    pub async fn submit_and_wait(
        &mut self,
        label: &str,
        request: &dyn SubmissionRequest,
    ) -> DeployResult<Receipt> {
        let chain_id = self.chain.chain_id();

        let previous = self.store.get(label).cloned();
        if let Some(previous) = &previous {
            if let (SubmissionStatus::Confirmed, Some(receipt)) =
                (previous.status, &previous.receipt)
            {
                info!(
                    "Skipping '{}': confirmed in {:?} (block {})",
                    label, receipt.transaction_hash, receipt.block_number
                );
                metrics::record_step_skipped(chain_id);
                return Ok(receipt.clone());
            }

            if previous.status == SubmissionStatus::Failed && !self.retry_failed {
                return Err(DeployError::RetryDisabled {
                    label: label.to_string(),
                    detail: previous.error.clone().unwrap_or_default(),
                });
            }
        }

        // Durable before any network I/O
        let mut record = previous
            .as_ref()
            .map(SubmissionRecord::reopen)
            .unwrap_or_else(SubmissionRecord::pending);
        self.store.put(label, record.clone())?;

        let resumed = match record.outstanding_hash() {
            Some(tx_hash) => match self.chain.transaction_status(tx_hash).await {
                Ok(status) if status.is_known() => {
                    info!(
                        "Resuming '{}': {:?} already on chain ({:?}), not re-sending",
                        label, tx_hash, status
                    );
                    metrics::record_tx_resumed(chain_id);
                    Some(tx_hash)
                }
                Ok(_) => {
                    warn!(
                        "Pending transaction {:?} for '{}' is unknown to the network, \
                         submitting again",
                        tx_hash, label
                    );
                    record.transaction_hash = None;
                    None
                }
                Err(cause) => return self.fail(label, &record, cause),
            },
            None => None,
        };

        let tx_hash = match resumed {
            Some(tx_hash) => tx_hash,
            None => match self.dispatch(label, request).await {
                Ok(tx_hash) => {
                    record = record.submitted(tx_hash);
                    self.store.put(label, record.clone())?;
                    metrics::record_tx_submitted(chain_id);
                    info!("Submitted '{}': {:?}, waiting for confirmation", label, tx_hash);
                    tx_hash
                }
                Err(cause) => return self.fail(label, &record, cause),
            },
        };

        let started = Instant::now();
        match self.chain.wait_for_confirmation(tx_hash).await {
            Ok(receipt) => {
                self.store.put(label, record.confirmed(receipt.clone()))?;
                metrics::record_tx_confirmed(chain_id);
                metrics::record_tx_latency(chain_id, started.elapsed().as_secs_f64());
                info!(
                    "Confirmed '{}' in block {} (gas used {})",
                    label, receipt.block_number, receipt.gas_used
                );
                Ok(receipt)
            }
            Err(cause) => self.fail(label, &record, cause),
        }
    }

    async fn dispatch(
        &self,
        label: &str,
        request: &dyn SubmissionRequest,
    ) -> Result<H256, ChainError> {
        let gas_price = self.gas_estimator.price(self.chain.as_ref()).await?;
        info!("Submitting '{}'", label);
        request.execute(self.chain.as_ref(), &gas_price).await
    }

    /// Persist the failure, then surface it with the step label
    fn fail(
        &mut self,
        label: &str,
        record: &SubmissionRecord,
        cause: ChainError,
    ) -> DeployResult<Receipt> {
        let detail = cause.to_string();
        error!("Submission '{}' failed: {}", label, detail);

        let next = if cause.leaves_pending() && record.outstanding_hash().is_some() {
            // May still land; the next run polls this hash instead of re-sending
            record.unresolved(detail)
        } else {
            record.failed(detail)
        };
        self.store.put(label, next)?;
        metrics::record_tx_failed(self.chain.chain_id());

        Err(DeployError::SubmissionFailed {
            label: label.to_string(),
            cause,
        })
    }
}
