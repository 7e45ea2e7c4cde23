//! Durable submission history
//!
//! The ledger is a pretty-printed JSON object mapping each step label to its
//! `SubmissionRecord`, in insertion order. Every mutation rewrites the whole
//! file through a temporary sibling and a rename, so a crash mid-write leaves
//! either the old or the new ledger on disk, never a truncated one.

mod record;

pub use record::{SubmissionRecord, SubmissionStatus};

use crate::error::{DeployError, DeployResult};

use indexmap::IndexMap;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Label -> record, in insertion order
pub type HistoryLedger = IndexMap<String, SubmissionRecord>;

/// Ledger location for a script on a network: `<dir>/<script>[-<suffix>].json`
pub fn ledger_path(dir: &Path, script: &str, network_suffix: Option<&str>) -> PathBuf {
    let file_name = match network_suffix.filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{}-{}.json", script, suffix),
        None => format!("{}.json", script),
    };
    dir.join(file_name)
}

/// File-backed ledger owned by one deployment run
pub struct HistoryStore {
    path: PathBuf,
    ledger: HistoryLedger,
    /// Hide records loaded from disk until this run writes them
    ignore_history: bool,
    /// Labels written during this run
    touched: HashSet<String>,
}

impl HistoryStore {
    /// Load the ledger at `path`, or start empty if there is none
    pub fn open(path: impl Into<PathBuf>, ignore_history: bool) -> DeployResult<Self> {
        let path = path.into();

        let ledger = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<HistoryLedger>(&bytes).map_err(|source| {
                DeployError::CorruptHistory {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => HistoryLedger::new(),
            Err(source) => return Err(DeployError::HistoryIo { path, source }),
        };

        if let Some(label) = ledger
            .iter()
            .find(|(_, record)| record.is_confirmed() && record.receipt.is_none())
            .map(|(label, _)| label)
        {
            return Err(DeployError::CorruptHistory {
                path,
                source: serde::de::Error::custom(format!(
                    "confirmed record '{}' has no receipt",
                    label
                )),
            });
        }

        if ignore_history && !ledger.is_empty() {
            warn!(
                "Ignoring {} recorded submissions in {:?}; this run re-submits every step",
                ledger.len(),
                path
            );
        } else {
            info!("Loaded {} recorded submissions from {:?}", ledger.len(), path);
        }

        Ok(Self {
            path,
            ledger,
            ignore_history,
            touched: HashSet::new(),
        })
    }

    /// Ledger file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record for a label, as seen by this run
    pub fn get(&self, label: &str) -> Option<&SubmissionRecord> {
        if self.ignore_history && !self.touched.contains(label) {
            return None;
        }
        self.ledger.get(label)
    }

    /// Store a record and flush the whole ledger to disk
    pub fn put(&mut self, label: &str, record: SubmissionRecord) -> DeployResult<()> {
        if let Some(existing) = self.get(label) {
            if existing.is_confirmed() && *existing != record {
                return Err(DeployError::ConfirmedImmutable {
                    label: label.to_string(),
                });
            }
        }

        debug!("History {:?}: '{}' -> {:?}", self.path, label, record.status);

        let previous = self.ledger.insert(label.to_string(), record);
        let newly_touched = self.touched.insert(label.to_string());

        if let Err(e) = self.flush() {
            // Keep memory in step with what is on disk
            match previous {
                Some(previous) => {
                    self.ledger.insert(label.to_string(), previous);
                }
                None => {
                    self.ledger.shift_remove(label);
                }
            }
            if newly_touched {
                self.touched.remove(label);
            }
            return Err(e);
        }

        Ok(())
    }

    /// Records visible to this run, in insertion order
    pub fn records(&self) -> impl Iterator<Item = (&str, &SubmissionRecord)> {
        self.ledger
            .iter()
            .filter(move |(label, _)| !self.ignore_history || self.touched.contains(*label))
            .map(|(label, record)| (label.as_str(), record))
    }

    /// Write-temp-then-rename the full ledger
    fn flush(&self) -> DeployResult<()> {
        let io_err = |source| DeployError::HistoryIo {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut body = serde_json::to_vec_pretty(&self.ledger).map_err(|e| io_err(e.into()))?;
        body.push(b'\n');

        let tmp_path = tmp_path(&self.path);
        {
            let mut file = File::create(&tmp_path).map_err(io_err)?;
            file.write_all(&body).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        sync_parent_dir(&self.path);

        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        warn!("Failed to sync directory {:?}: {}", parent, e);
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Receipt;
    use chrono::{TimeZone, Utc};
    use ethers::types::{Address, H256, U256};
    use tempfile::TempDir;

    fn confirmed(byte: u8) -> SubmissionRecord {
        let hash = H256::repeat_byte(byte);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, byte as u32).unwrap();
        SubmissionRecord {
            status: SubmissionStatus::Confirmed,
            transaction_hash: Some(hash),
            receipt: Some(Receipt {
                transaction_hash: hash,
                block_number: byte as u64,
                contract_address: Some(Address::repeat_byte(byte)),
                gas_used: U256::from(1_000_000),
                effective_gas_price: None,
            }),
            error: None,
            attempts: 1,
            submitted_at: Some(at),
            confirmed_at: Some(at),
        }
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(dir.path().join("deploy.json"), false).unwrap();
        assert!(store.get("Deploy A").is_none());
        assert_eq!(store.records().count(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_put_persists_every_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deploy.json");

        let mut store = HistoryStore::open(&path, false).unwrap();
        store
            .put("Deploy A", SubmissionRecord::pending().submitted(H256::repeat_byte(1)))
            .unwrap();

        let reopened = HistoryStore::open(&path, false).unwrap();
        let record = reopened.get("Deploy A").unwrap();
        assert_eq!(record.status, SubmissionStatus::Pending);
        assert_eq!(record.transaction_hash, Some(H256::repeat_byte(1)));
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_insertion_order_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");

        let mut store = HistoryStore::open(&path, false).unwrap();
        for (i, label) in ["Deploy Z", "Deploy A", "Deploy M"].iter().enumerate() {
            store.put(label, confirmed(i as u8 + 1)).unwrap();
        }

        let reopened = HistoryStore::open(&path, false).unwrap();
        let labels: Vec<_> = reopened.records().map(|(label, _)| label.to_string()).collect();
        assert_eq!(labels, vec!["Deploy Z", "Deploy A", "Deploy M"]);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");
        fs::write(&path, "{\"Deploy A\": {\"status\": \"confirmed\"").unwrap();

        match HistoryStore::open(&path, false) {
            Err(DeployError::CorruptHistory { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected corrupt history, got {:?}", other.map(|_| ())),
        }

        // Not silently discarded either
        assert!(matches!(
            HistoryStore::open(&path, true),
            Err(DeployError::CorruptHistory { .. })
        ));
    }

    #[test]
    fn test_confirmed_without_receipt_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");
        fs::write(&path, r#"{"Deploy A": {"status": "confirmed", "attempts": 1}}"#).unwrap();

        match HistoryStore::open(&path, false) {
            Err(DeployError::CorruptHistory { source, .. }) => {
                assert!(source.to_string().contains("Deploy A"))
            }
            other => panic!("expected corrupt history, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");
        fs::write(&path, "").unwrap();

        assert!(matches!(
            HistoryStore::open(&path, false),
            Err(DeployError::CorruptHistory { .. })
        ));
    }

    #[test]
    fn test_interrupted_write_leaves_previous_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");

        let mut store = HistoryStore::open(&path, false).unwrap();
        store.put("Deploy A", confirmed(1)).unwrap();

        // A crash during the next flush leaves a partial temp file behind
        let full = fs::read(&path).unwrap();
        fs::write(tmp_path(&path), &full[..full.len() / 2]).unwrap();

        let reopened = HistoryStore::open(&path, false).unwrap();
        assert_eq!(reopened.get("Deploy A"), Some(&confirmed(1)));
    }

    #[test]
    fn test_confirmed_record_is_immutable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");

        let mut store = HistoryStore::open(&path, false).unwrap();
        store.put("Deploy A", confirmed(1)).unwrap();

        let err = store.put("Deploy A", SubmissionRecord::pending()).unwrap_err();
        assert!(matches!(
            err,
            DeployError::ConfirmedImmutable { ref label } if label == "Deploy A"
        ));
        assert_eq!(err.label(), Some("Deploy A"));

        // Rewriting the identical record is harmless
        store.put("Deploy A", confirmed(1)).unwrap();
        assert_eq!(store.get("Deploy A"), Some(&confirmed(1)));
    }

    #[test]
    fn test_ignore_history_hides_but_preserves_other_labels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.json");

        let mut store = HistoryStore::open(&path, false).unwrap();
        store.put("Deploy A", confirmed(1)).unwrap();
        store.put("Deploy B", confirmed(2)).unwrap();

        let mut forced = HistoryStore::open(&path, true).unwrap();
        assert!(forced.get("Deploy A").is_none());
        assert_eq!(forced.records().count(), 0);

        // Overwrites the confirmed record from the earlier run
        forced.put("Deploy A", confirmed(3)).unwrap();
        assert_eq!(forced.get("Deploy A"), Some(&confirmed(3)));
        assert!(forced.get("Deploy B").is_none());

        let normal = HistoryStore::open(&path, false).unwrap();
        assert_eq!(normal.get("Deploy A"), Some(&confirmed(3)));
        assert_eq!(normal.get("Deploy B"), Some(&confirmed(2)));
    }

    #[test]
    fn test_ledger_path() {
        let dir = Path::new("history");
        assert_eq!(
            ledger_path(dir, "deploy-yokai-factory", Some("gw-testnet")),
            PathBuf::from("history/deploy-yokai-factory-gw-testnet.json")
        );
        assert_eq!(
            ledger_path(dir, "deploy-yokai-factory", None),
            PathBuf::from("history/deploy-yokai-factory.json")
        );
        assert_eq!(
            ledger_path(dir, "deploy-yokai-factory", Some("")),
            PathBuf::from("history/deploy-yokai-factory.json")
        );
    }
}
