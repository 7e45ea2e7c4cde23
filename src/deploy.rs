//! Deployment plans: compiled artifacts run step by step through the submitter

use crate::chain::{ChainAdapter, Receipt};
use crate::config::StepConfig;
use crate::error::{DeployError, DeployResult};
use crate::tx::{DeployRequest, TransactionSubmitter};

use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// The part of a compiled contract artifact the deployer needs
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub contract_name: Option<String>,
    pub bytecode: String,
}

impl Artifact {
    /// Read a Hardhat-style artifact JSON file
    pub fn load(path: &Path) -> DeployResult<Self> {
        let artifact_err = |message: String| DeployError::Artifact {
            path: path.to_path_buf(),
            message,
        };

        let raw = std::fs::read(path).map_err(|e| artifact_err(e.to_string()))?;
        let artifact: Artifact =
            serde_json::from_slice(&raw).map_err(|e| artifact_err(e.to_string()))?;

        if artifact.bytecode.trim_start_matches("0x").is_empty() {
            return Err(artifact_err("artifact has no bytecode".to_string()));
        }

        Ok(artifact)
    }

    pub fn bytecode(&self) -> Result<Bytes, String> {
        decode_hex(&self.bytecode)
    }
}

/// Decode a 0x-prefixed (or bare) hex string
pub fn decode_hex(input: &str) -> Result<Bytes, String> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| format!("invalid hex: {}", e))
}

/// A step of the plan ready for submission
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub label: String,
    /// Contract name from the artifact, falling back to the label
    pub contract: String,
    pub request: DeployRequest,
    /// Zero-argument views read once the contract exists
    pub reads: Vec<String>,
}

/// Result of a read-only view on a deployed contract
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRead {
    pub signature: String,
    pub output: Bytes,
}

impl ViewRead {
    /// `INIT_CODE_PAIR_HASH()` -> `INIT_CODE_PAIR_HASH`
    pub fn name(&self) -> &str {
        self.signature.trim_end_matches("()")
    }

    pub fn output_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.output))
    }
}

/// Outcome of one step
#[derive(Debug, Clone)]
pub struct DeployedStep {
    pub label: String,
    pub contract: String,
    pub receipt: Receipt,
    pub reads: Vec<ViewRead>,
}

impl DeployedStep {
    pub fn contract_address(&self) -> Option<Address> {
        self.receipt.contract_address
    }
}

/// Load artifacts and build a request for every configured step
pub fn plan(
    steps: &[StepConfig],
    network_gas_limit: Option<u64>,
) -> DeployResult<Vec<PlannedStep>> {
    steps
        .iter()
        .map(|step| -> DeployResult<PlannedStep> {
            let artifact = Artifact::load(&step.artifact)?;
            let to_artifact_err = |message: String| DeployError::Artifact {
                path: step.artifact.clone(),
                message,
            };

            let bytecode = artifact.bytecode().map_err(to_artifact_err)?;
            let constructor_args = match &step.constructor_args {
                Some(args) => decode_hex(args).map_err(|e| {
                    to_artifact_err(format!("constructor args for '{}': {}", step.label, e))
                })?,
                None => Bytes::default(),
            };

            let gas_limit = step.gas_limit.or(network_gas_limit).map(U256::from);

            Ok(PlannedStep {
                label: step.label.clone(),
                contract: artifact.contract_name.unwrap_or_else(|| step.label.clone()),
                request: DeployRequest::new(bytecode, constructor_args).with_gas_limit(gas_limit),
                reads: step.reads.clone(),
            })
        })
        .collect()
}

/// Run every step in order, stopping at the first failure
pub async fn run(
    submitter: &mut TransactionSubmitter,
    steps: &[PlannedStep],
) -> DeployResult<Vec<DeployedStep>> {
    let mut deployed = Vec::with_capacity(steps.len());

    for step in steps {
        let receipt = submitter.submit_and_wait(&step.label, &step.request).await?;

        let reads = match receipt.contract_address {
            Some(address) => {
                info!("    {} address: {:?}", step.contract, address);
                read_views(submitter.chain(), step, address).await?
            }
            None => {
                info!("    {} transaction: {:?}", step.contract, receipt.transaction_hash);
                Vec::new()
            }
        };

        deployed.push(DeployedStep {
            label: step.label.clone(),
            contract: step.contract.clone(),
            receipt,
            reads,
        });
    }

    Ok(deployed)
}

/// Call every configured view on a freshly deployed (or recorded) contract
async fn read_views(
    chain: &dyn ChainAdapter,
    step: &PlannedStep,
    address: Address,
) -> DeployResult<Vec<ViewRead>> {
    let mut reads = Vec::with_capacity(step.reads.len());

    for signature in &step.reads {
        let tx = TransactionRequest::new().to(address).data(id(signature).to_vec());
        let output = chain
            .call(tx.into())
            .await
            .map_err(|cause| DeployError::ViewRead {
                label: step.label.clone(),
                signature: signature.clone(),
                cause,
            })?;

        let read = ViewRead {
            signature: signature.clone(),
            output,
        };
        info!("    {}.{}: {}", step.contract, read.name(), read.output_hex());
        reads.push(read);
    }

    Ok(reads)
}
