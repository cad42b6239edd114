//! Chain Custody service
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌───────────────┐    ┌─────────────┐
//! │  Config  │───▶│ LedgerStore │───▶│ BalanceLedger │───▶│ Coordinator │
//! │  (YAML)  │    │ (PG / mem)  │    │ (wallet lock) │    │  (sweeps)   │
//! └──────────┘    └─────────────┘    └───────────────┘    └─────────────┘
//! ```
//!
//! Usage: `chain_custody [--env <name>]` loads `config/<name>.yaml`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use chain_custody::chain::{AdapterRegistry, SimulatedChain};
use chain_custody::config::AppConfig;
use chain_custody::coordinator::{Coordinator, CoordinatorConfig};
use chain_custody::ledger::BalanceLedger;
use chain_custody::scanner::{ConfirmationRefresher, DepositScanner};
use chain_custody::settlement::Settler;
use chain_custody::store::{LedgerStore, MemoryStore, PgStore};
use chain_custody::vault::{AesGcmVault, KeyVault};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).context("loading configuration")?;
    let _log_guard = chain_custody::logging::init_logging(&app_config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        schema = env!("CUSTODY_SCHEMA"),
        "Starting chain custody in {} mode",
        env
    );

    let store: Arc<dyn LedgerStore> = match &app_config.postgres_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("connecting to PostgreSQL")?;
            store.health_check().await.context("PostgreSQL health check")?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("No postgres_url configured, ledger state is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let vault: Arc<dyn KeyVault> = match AesGcmVault::from_env(&app_config.vault.key_env) {
        Ok(vault) => Arc::new(vault),
        Err(e) if app_config.postgres_url.is_none() => {
            tracing::warn!(error = %e, "Using an ephemeral vault key");
            Arc::new(AesGcmVault::ephemeral())
        }
        Err(e) => return Err(e).context("loading vault key"),
    };

    let mut registry = AdapterRegistry::new();
    for network in app_config.enabled_networks() {
        tracing::info!(
            network = %network,
            currency = network.native_currency(),
            "Registering {} chain adapter",
            network.display_name()
        );
        registry.register(Arc::new(SimulatedChain::new(network)));
    }
    let registry = Arc::new(registry);

    let scanner_config = app_config.scanner_config();
    let ledger = Arc::new(BalanceLedger::new(store));
    let scanner = Arc::new(DepositScanner::new(
        ledger.clone(),
        registry.clone(),
        scanner_config.clone(),
    ));
    let refresher = Arc::new(ConfirmationRefresher::new(
        ledger.clone(),
        registry.clone(),
        scanner_config,
    ));
    let settler = Arc::new(Settler::new(
        ledger.clone(),
        registry,
        vault,
        app_config.settlement_config(),
    ));

    let coordinator = Arc::new(Coordinator::new(
        ledger,
        scanner,
        refresher,
        settler,
        CoordinatorConfig::from(&app_config.scheduler),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = coordinator.spawn(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for in-flight sweeps");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .is_err()
        {
            tracing::warn!("Sweep loop did not stop in time");
        }
    }

    tracing::info!("Chain custody stopped");
    Ok(())
}
