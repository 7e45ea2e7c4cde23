//! Ledger entries

use crate::chain::Receipt;

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Outcome of one labelled deployment step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
    /// Detail of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatches performed for this label across all runs
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    /// A fresh pending record with nothing dispatched yet
    pub fn pending() -> Self {
        Self {
            status: SubmissionStatus::Pending,
            transaction_hash: None,
            receipt: None,
            error: None,
            attempts: 0,
            submitted_at: None,
            confirmed_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SubmissionStatus::Confirmed
    }

    /// Hash of a broadcast transaction whose fate is still open
    pub fn outstanding_hash(&self) -> Option<H256> {
        match self.status {
            SubmissionStatus::Pending => self.transaction_hash,
            _ => None,
        }
    }

    /// Back to pending for a new attempt, keeping an outstanding hash
    pub fn reopen(&self) -> Self {
        Self {
            status: SubmissionStatus::Pending,
            transaction_hash: self.outstanding_hash(),
            receipt: None,
            error: self.error.clone(),
            attempts: self.attempts,
            submitted_at: self.submitted_at,
            confirmed_at: None,
        }
    }

    /// Record a successful broadcast
    pub fn submitted(&self, tx_hash: H256) -> Self {
        Self {
            status: SubmissionStatus::Pending,
            transaction_hash: Some(tx_hash),
            receipt: None,
            error: None,
            attempts: self.attempts + 1,
            submitted_at: Some(Utc::now()),
            confirmed_at: None,
        }
    }

    pub fn confirmed(&self, receipt: Receipt) -> Self {
        Self {
            status: SubmissionStatus::Confirmed,
            transaction_hash: Some(receipt.transaction_hash),
            receipt: Some(receipt),
            error: None,
            attempts: self.attempts,
            submitted_at: self.submitted_at,
            confirmed_at: Some(Utc::now()),
        }
    }

    pub fn failed(&self, error: String) -> Self {
        Self {
            status: SubmissionStatus::Failed,
            error: Some(error),
            confirmed_at: None,
            ..self.clone()
        }
    }

    /// Still pending on chain, with the last wait error noted
    pub fn unresolved(&self, error: String) -> Self {
        Self {
            status: SubmissionStatus::Pending,
            error: Some(error),
            ..self.clone()
        }
    }
}
