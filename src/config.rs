//! Configuration management for the Tesseract deployer
//!
//! Loads the deployment plan from a TOML file with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub submitter: SubmitterConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Suffix appended to history file names, e.g. `gw-testnet`
    pub name: Option<String>,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub confirmation_blocks: Option<u64>,
    #[serde(default = "default_gas_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    /// Fixed gas limit for every step on this network
    pub gas_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmitterConfig {
    /// Script name used as the history file stem
    pub script: String,
    pub history_dir: PathBuf,
    pub ignore_history: bool,
    pub retry_failed: bool,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub gas_price_buffer_percent: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            script: "deploy".to_string(),
            history_dir: PathBuf::from("."),
            ignore_history: false,
            retry_failed: true,
            poll_interval_ms: 1_000,
            confirmation_timeout_secs: 300,
            gas_price_buffer_percent: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "DEPLOYER_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of a run
    pub textfile: Option<PathBuf>,
}

/// One deployment step of the plan
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub label: String,
    pub artifact: PathBuf,
    /// Pre-encoded constructor arguments, hex
    #[serde(default)]
    pub constructor_args: Option<String>,
    pub gas_limit: Option<u64>,
    /// Zero-argument views called on the deployed contract, e.g. `INIT_CODE_PAIR_HASH()`
    #[serde(default)]
    pub reads: Vec<String>,
}

fn default_gas_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Legacy
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("TESSERACT_DEPLOY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/deploy.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut settings = Self::parse(&config_str)?;

        if ignore_history_from_env() {
            settings.submitter.ignore_history = true;
        }

        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("Network has no RPC URLs configured");
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.label.trim().is_empty() {
                anyhow::bail!("Deployment step with empty label");
            }
            if !seen.insert(step.label.as_str()) {
                anyhow::bail!("Duplicate deployment step label: {}", step.label);
            }
            if let Some(read) = step.reads.iter().find(|r| !is_view_signature(r)) {
                anyhow::bail!(
                    "Step '{}': read '{}' must be a zero-argument signature like NAME()",
                    step.label,
                    read
                );
            }
        }

        if self.steps.is_empty() {
            tracing::warn!("No deployment steps configured");
        }

        Ok(())
    }

    /// History ledger location for this script and network
    pub fn history_path(&self) -> PathBuf {
        crate::history::ledger_path(
            &self.submitter.history_dir,
            &self.submitter.script,
            self.network.name.as_deref(),
        )
    }
}

/// Whether `IGNORE_HISTORY` asks for a forced re-deployment
pub fn ignore_history_from_env() -> bool {
    env::var("IGNORE_HISTORY")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_view_signature(signature: &str) -> bool {
    signature
        .strip_suffix("()")
        .map(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [network]
        name = "gw-testnet"
        chain_id = 71401
        rpc_urls = ["${DEPLOY_TEST_RPC}"]
        gas_limit = 500000

        [submitter]
        script = "deploy-yokai-factory"
        history_dir = "history"

        [[steps]]
        label = "Deploy YokaiFactory"
        artifact = "artifacts/YokaiFactory.json"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_parse_plan_with_defaults() {
        env::set_var("DEPLOY_TEST_RPC", "http://localhost:8024");
        let settings = Settings::parse(SAMPLE).unwrap();

        assert_eq!(settings.network.rpc_urls, vec!["http://localhost:8024"]);
        assert_eq!(settings.network.gas_limit, Some(500_000));
        assert_eq!(settings.network.gas_price_strategy, GasPriceStrategy::Legacy);
        assert!(settings.submitter.retry_failed);
        assert!(!settings.submitter.ignore_history);
        assert_eq!(settings.wallet.private_key_env, "DEPLOYER_PRIVATE_KEY");
        assert_eq!(settings.steps.len(), 1);
        assert_eq!(
            settings.history_path(),
            PathBuf::from("history/deploy-yokai-factory-gw-testnet.json")
        );
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let input = r#"
            [network]
            chain_id = 1
            rpc_urls = ["http://localhost:8545"]

            [[steps]]
            label = "Deploy A"
            artifact = "a.json"

            [[steps]]
            label = "Deploy A"
            artifact = "b.json"
        "#;
        assert!(Settings::parse(input).is_err());
    }

    #[test]
    fn test_reads_must_be_zero_argument_views() {
        let input = |read: &str| {
            format!(
                r#"
                [network]
                chain_id = 1
                rpc_urls = ["http://localhost:8545"]

                [[steps]]
                label = "Deploy YokaiFactory"
                artifact = "YokaiFactory.json"
                reads = ["{}"]
                "#,
                read
            )
        };

        let settings = Settings::parse(&input("INIT_CODE_PAIR_HASH()")).unwrap();
        assert_eq!(settings.steps[0].reads, vec!["INIT_CODE_PAIR_HASH()"]);
        assert!(Settings::parse(&input("getPair(address,address)")).is_err());
        assert!(Settings::parse(&input("feeToSetter")).is_err());
    }

    #[test]
    fn test_load_applies_ignore_history_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(
            &path,
            "[network]\nchain_id = 31337\nrpc_urls = [\"http://localhost:8545\"]\n",
        )
        .unwrap();
        // The only test touching these variables
        env::set_var("TESSERACT_DEPLOY_CONFIG", &path);

        env::set_var("IGNORE_HISTORY", "1");
        assert!(ignore_history_from_env());
        assert!(Settings::load().unwrap().submitter.ignore_history);

        env::set_var("IGNORE_HISTORY", "0");
        assert!(!ignore_history_from_env());
        assert!(!Settings::load().unwrap().submitter.ignore_history);

        env::remove_var("IGNORE_HISTORY");
        assert!(!Settings::load().unwrap().submitter.ignore_history);

        env::remove_var("TESSERACT_DEPLOY_CONFIG");
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("FALSE"));
    }
}
