//! Funding Jobs
//!
//! The periodic work of the service: a scan cycle per chain, the stale
//! withdrawal sweep and the outbox relay. An external cron drives it through
//! `POST /internal/scan`; `spawn` drives the same jobs in-process.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::config::SchedulerConfig;
use crate::funding::{OutboxRelay, WithdrawService};
use crate::sentinel::{ChainCycleReport, ScannerError, SentinelWorker};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub withdrawals_expired: usize,
    pub events_delivered: usize,
    pub events_failed: usize,
    pub errors: Vec<String>,
}

pub struct FundingJobs {
    worker: Arc<SentinelWorker>,
    withdrawals: Arc<WithdrawService>,
    relay: Arc<OutboxRelay>,
}

impl FundingJobs {
    pub fn new(
        worker: Arc<SentinelWorker>,
        withdrawals: Arc<WithdrawService>,
        relay: Arc<OutboxRelay>,
    ) -> Self {
        Self {
            worker,
            withdrawals,
            relay,
        }
    }

    pub fn worker(&self) -> &Arc<SentinelWorker> {
        &self.worker
    }

    /// One scan + confirmation cycle for `chain`, or every chain
    pub async fn cycle(&self, chain: Option<&str>) -> Result<Vec<ChainCycleReport>, ScannerError> {
        self.worker.run_cycle(chain).await
    }

    /// Expire timed-out withdrawals, then drain one outbox batch. A failing
    /// step is reported and does not stop the other.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        match self.withdrawals.expire_stale(now).await {
            Ok(expired) => report.withdrawals_expired = expired,
            Err(e) => {
                error!(error = %e, "Withdrawal expiry sweep failed");
                report.errors.push(format!("expire: {}", e));
            }
        }
        match self.relay.drain().await {
            Ok(relay) => {
                report.events_delivered = relay.delivered;
                report.events_failed = relay.failed;
            }
            Err(e) => {
                error!(error = %e, "Outbox drain failed");
                report.errors.push(format!("outbox: {}", e));
            }
        }
        report
    }

    /// Spawn the in-process loops: chain cycles plus withdrawal expiry every
    /// `interval_ms`, outbox relay every `outbox_interval_ms`.
    pub fn spawn(self: Arc<Self>, config: &SchedulerConfig) -> Vec<JoinHandle<()>> {
        info!(
            chains = self.worker.scanner_count(),
            interval_ms = config.interval_ms,
            outbox_interval_ms = config.outbox_interval_ms,
            "Funding scheduler started"
        );

        let jobs = self.clone();
        let cycle_every = Duration::from_millis(config.interval_ms.max(1));
        let cycles = tokio::spawn(async move {
            let mut tick = interval(cycle_every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match jobs.cycle(None).await {
                    Ok(reports) => {
                        for report in reports.iter().filter(|r| !r.errors.is_empty()) {
                            warn!(
                                chain = %report.chain,
                                errors = ?report.errors,
                                "Chain cycle reported errors"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Scan cycle failed"),
                }
                if let Err(e) = jobs.withdrawals.expire_stale(Utc::now()).await {
                    error!(error = %e, "Withdrawal expiry failed");
                }
            }
        });

        let jobs = self;
        let relay_every = Duration::from_millis(config.outbox_interval_ms.max(1));
        let relay = tokio::spawn(async move {
            let mut tick = interval(relay_every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(e) = jobs.relay.drain().await {
                    error!(error = %e, "Outbox drain failed");
                }
            }
        });

        vec![cycles, relay]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::LedgerOp;
    use crate::chain::ChainRegistry;
    use crate::config::{PriceConfig, WithdrawalConfig};
    use crate::core_types::BalanceKey;
    use crate::funding::{DepositReconciler, LogNotifier, WithdrawalRequest, WithdrawalStatus};
    use crate::price::{PriceOracle, ReferencePriceOracle};
    use crate::store::{FundingStore, MemoryStore};
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;

    async fn jobs(store: Arc<MemoryStore>) -> (FundingJobs, Arc<WithdrawService>) {
        let registry = Arc::new(ChainRegistry::builtin().unwrap());
        let reconciler = Arc::new(DepositReconciler::new(store.clone(), registry.clone()));
        let worker = Arc::new(SentinelWorker::new(store.clone(), registry.clone(), reconciler));
        let prices: Arc<dyn PriceOracle> =
            Arc::new(ReferencePriceOracle::new(&PriceConfig::default()));
        let withdrawals = Arc::new(WithdrawService::new(
            store.clone(),
            registry,
            prices,
            WithdrawalConfig::default(),
        ));
        let relay = Arc::new(OutboxRelay::new(store, Arc::new(LogNotifier), 10));
        (
            FundingJobs::new(worker, withdrawals.clone(), relay),
            withdrawals,
        )
    }

    #[tokio::test]
    async fn test_sweep_expires_and_relays() {
        let store = Arc::new(MemoryStore::new());
        store
            .apply_ledger_op(
                &BalanceKey::new(1, "USDT", "ethereum"),
                LedgerOp::Credit(Decimal::from(100)),
            )
            .await
            .unwrap();
        let (jobs, withdrawals) = jobs(store.clone()).await;
        let created = withdrawals
            .create_withdrawal_request(&WithdrawalRequest {
                user_id: 1,
                currency: "USDT".into(),
                chain: "ethereum".into(),
                amount: Decimal::from(20),
                to_address: "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".into(),
                memo: None,
            })
            .await
            .unwrap();

        let report = jobs.sweep(Utc::now() + ChronoDuration::hours(1)).await;
        assert_eq!(report.withdrawals_expired, 1);
        assert!(report.errors.is_empty());
        // verification code + cancellation events
        assert_eq!(report.events_delivered, 2);

        let balance = store
            .balance(&BalanceKey::new(1, "USDT", "ethereum"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance.available(), Decimal::from(100));
        assert_eq!(balance.locked(), Decimal::ZERO);
        let view = withdrawals.get(&created.withdrawal_id, 1).await.unwrap();
        assert_eq!(view.withdrawal.status, WithdrawalStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cycle_without_scanners_is_empty() {
        let (jobs, _) = jobs(Arc::new(MemoryStore::new())).await;
        assert!(jobs.cycle(None).await.unwrap().is_empty());
        assert!(jobs.cycle(Some("ethereum")).await.is_err());
    }
}
