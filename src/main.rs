//! chain_funding service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌────────────┐    ┌──────────┐
//! │ Scanners │───▶│ Sentinel │───▶│ Reconciler │───▶│  Ledger  │
//! │ (nodes)  │    │ (cursor) │    │ (tx hash)  │    │ (store)  │
//! └──────────┘    └──────────┘    └────────────┘    └──────────┘
//!                                                        ▲
//!            HTTP Gateway ──▶ Withdrawal FSM ────────────┘
//!                                   │
//!                                   ▼
//!                             Outbox Relay ──▶ Notifier
//! ```
//!
//! Usage: `chain_funding [--env <name>] [--port <n>]`

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use chain_funding::chain::ChainRegistry;
use chain_funding::config::AppConfig;
use chain_funding::db::Database;
use chain_funding::funding::{
    DepositReconciler, LogNotifier, Notifier, OutboxRelay, WithdrawService,
};
use chain_funding::gateway::{self, state::AppState};
use chain_funding::ledger::BalanceLedger;
use chain_funding::logging::init_logging;
use chain_funding::price::{PriceOracle, ReferencePriceOracle};
use chain_funding::scheduler::FundingJobs;
use chain_funding::sentinel::{SentinelWorker, build_scanners};
use chain_funding::store::{FundingStore, PgStore};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn open_store(config: &AppConfig) -> Result<(Arc<dyn FundingStore>, Option<Arc<Database>>)> {
    if let Some(url) = config.postgres_url.as_deref() {
        let db = Database::connect(url, config.db_max_connections)
            .await
            .context("Failed to connect to PostgreSQL")?;
        let store = PgStore::new(db.pool().clone());
        store
            .init_schema()
            .await
            .context("Failed to initialize schema")?;
        info!("PostgreSQL store ready");
        let store: Arc<dyn FundingStore> = Arc::new(store);
        return Ok((store, Some(Arc::new(db))));
    }

    #[cfg(feature = "mock-api")]
    {
        warn!("postgres_url not set, using the in-memory store (data is lost on exit)");
        let store: Arc<dyn FundingStore> = Arc::new(chain_funding::store::MemoryStore::new());
        Ok((store, None))
    }

    #[cfg(not(feature = "mock-api"))]
    {
        anyhow::bail!("postgres_url is required in production builds")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "Starting chain_funding"
    );

    let registry = Arc::new(match config.chains_file.as_deref() {
        Some(path) => ChainRegistry::from_file(path)
            .with_context(|| format!("Failed to load chain registry {}", path))?,
        None => ChainRegistry::builtin()?,
    });
    info!(chains = ?registry.slugs(), "Chain registry loaded");

    let (store, pg_db) = open_store(&config).await?;

    // Deposits
    let deposits = Arc::new(DepositReconciler::new(store.clone(), registry.clone()));
    let mut worker = SentinelWorker::new(store.clone(), registry.clone(), deposits.clone());
    for scanner in build_scanners(&registry, &config.scanner)? {
        worker.add_scanner(scanner);
    }
    if worker.scanner_count() == 0 {
        warn!("No chain has an rpc_url configured, deposit scanning is disabled");
    }

    // Withdrawals
    let prices: Arc<dyn PriceOracle> = Arc::new(ReferencePriceOracle::new(&config.price));
    let withdrawals = Arc::new(WithdrawService::new(
        store.clone(),
        registry.clone(),
        prices,
        config.withdrawal.clone(),
    ));

    // Notifications
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let relay = Arc::new(OutboxRelay::new(
        store.clone(),
        notifier,
        config.scheduler.outbox_batch,
    ));

    let jobs = Arc::new(FundingJobs::new(
        Arc::new(worker),
        withdrawals.clone(),
        relay,
    ));
    if config.scheduler.enabled {
        jobs.clone().spawn(&config.scheduler);
    } else {
        info!("In-process scheduler disabled, waiting for POST /internal/scan");
    }

    let state = AppState::new(
        registry,
        BalanceLedger::new(store),
        deposits,
        withdrawals,
        jobs,
        config.security.clone(),
        pg_db,
        config.withdrawal.history_limit,
    );

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, Arc::new(state))
        .await
        .context("Gateway server error")?;
    Ok(())
}
