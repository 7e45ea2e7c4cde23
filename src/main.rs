//! Tesseract Deployer - runs a deployment plan against one network
//!
//! Confirmed steps recorded in the history ledger are skipped, so an
//! interrupted or failed deployment is resumed by simply running it again.
//! Set `IGNORE_HISTORY=1` to force every step to be submitted anew.

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use tesseract_deployer::chain::EthersChainAdapter;
use tesseract_deployer::config::Settings;
use tesseract_deployer::deploy::{self, DeployedStep};
use tesseract_deployer::error::DeployError;
use tesseract_deployer::history::HistoryStore;
use tesseract_deployer::metrics;
use tesseract_deployer::tx::TransactionSubmitter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    init_logging();

    info!("Starting Tesseract Deployer v{}", env!("CARGO_PKG_VERSION"));

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            eprintln!("err {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = tokio::select! {
        outcome = run(&settings) => outcome,
        _ = shutdown_signal() => {
            warn!(
                "Interrupted; in-flight steps stay pending in {:?} and are resumed on the next run",
                settings.history_path()
            );
            write_metrics(&settings);
            return ExitCode::from(130);
        }
    };

    write_metrics(&settings);

    match outcome {
        Ok(deployed) => {
            for step in &deployed {
                match step.contract_address() {
                    Some(address) => println!("    {} address: {:?}", step.contract, address),
                    None => println!(
                        "    {} transaction: {:?}",
                        step.contract, step.receipt.transaction_hash
                    ),
                }
                for read in &step.reads {
                    println!("    {}.{}: {}", step.contract, read.name(), read.output_hex());
                }
            }
            info!("All {} steps confirmed", deployed.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<DeployError>().and_then(|d| d.label()) {
                Some(label) => error!("Deployment stopped at '{}': {:#}", label, e),
                None => error!("Deployment failed: {:#}", e),
            }
            eprintln!("err {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: &Settings) -> Result<Vec<DeployedStep>> {
    let wallet = EthersChainAdapter::load_wallet(&settings.wallet.private_key_env)?;
    let chain = EthersChainAdapter::new(&settings.network, &settings.submitter, wallet)?;
    info!("Deployer Ethereum address: {:?}", chain.wallet_address());

    // Artifacts are checked before anything touches the network
    let steps = deploy::plan(&settings.steps, settings.network.gas_limit)
        .context("Failed to prepare deployment plan")?;

    let store = HistoryStore::open(settings.history_path(), settings.submitter.ignore_history)?;
    let mut submitter = TransactionSubmitter::new(store, Arc::new(chain), &settings.submitter);

    let deployed = deploy::run(&mut submitter, &steps).await?;
    Ok(deployed)
}

fn write_metrics(settings: &Settings) {
    if let Some(path) = &settings.metrics.textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics to {:?}: {}", path, e);
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tesseract_deployer=debug,hyper=warn")
    });

    let json = std::env::var("TESSERACT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
