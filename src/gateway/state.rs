use std::sync::Arc;

use crate::chain::ChainRegistry;
use crate::config::SecurityConfig;
use crate::db::Database;
use crate::funding::{DepositReconciler, WithdrawService};
use crate::ledger::BalanceLedger;
use crate::scheduler::FundingJobs;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Chain registry (read-only)
    pub registry: Arc<ChainRegistry>,
    pub ledger: BalanceLedger,
    pub deposits: Arc<DepositReconciler>,
    pub withdrawals: Arc<WithdrawService>,
    /// Scan cycle, expiry sweep and outbox relay
    pub jobs: Arc<FundingJobs>,
    /// JWT key and internal secrets
    pub security: Arc<SecurityConfig>,
    /// PostgreSQL pool, probed by `/health`; `None` on the in-memory store
    pub pg_db: Option<Arc<Database>>,
    /// Default size of history pages
    pub history_limit: usize,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ChainRegistry>,
        ledger: BalanceLedger,
        deposits: Arc<DepositReconciler>,
        withdrawals: Arc<WithdrawService>,
        jobs: Arc<FundingJobs>,
        security: SecurityConfig,
        pg_db: Option<Arc<Database>>,
        history_limit: usize,
    ) -> Self {
        Self {
            registry,
            ledger,
            deposits,
            withdrawals,
            jobs,
            security: Arc::new(security),
            pg_db,
            history_limit: history_limit.max(1),
        }
    }

    /// Requested page size, capped at the configured limit
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .map_or(self.history_limit, |n| n.min(self.history_limit))
    }
}
