//! Sentinel Worker
//!
//! Per chain, one cycle is:
//! 1. `scan`: health gate, then every registered address over
//!    `(cursor, tip]` (first run starts `lookback_blocks` behind the tip),
//!    capped at `max_blocks_per_scan`. New transfers become PENDING
//!    candidates. The chain cursor always advances; an address whose query
//!    or record failed keeps a backlog entry with the next height it still
//!    owes, and catches up to the cursor on later cycles.
//! 2. `update_confirmations`: recompute depth of PENDING deposits and credit
//!    the ones reaching the chain threshold.
//!
//! Cycles of the same chain never overlap; different chains run
//! concurrently. Chain queries never run under a ledger lock.

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use utoipa::ToSchema;

use super::error::ScannerError;
use super::scanner::{ChainScanner, DetectedTransfer, confirmations_at};
use crate::chain::{ChainParams, ChainRegistry};
use crate::funding::deposit::{DepositCandidate, DepositReconciler};
use crate::funding::error::DepositError;
use crate::funding::types::DepositAddress;
use crate::logging::SCAN_TRACE_TARGET;
use crate::store::{FundingStore, StoreError};

/// Outcome of one `scan(chain)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ScanReport {
    pub chain: String,
    pub addresses_scanned: usize,
    pub deposits_found: usize,
    pub deposits_created: usize,
    pub errors: Vec<String>,
}

/// Outcome of one `update_confirmations(chain)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ConfirmationReport {
    pub chain: String,
    pub updated: usize,
    pub credited: usize,
    pub errors: Vec<String>,
}

/// Per-chain result returned by the scheduler trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ChainCycleReport {
    pub chain: String,
    pub deposits_found: usize,
    pub deposits_created: usize,
    pub confirmations_updated: usize,
    pub deposits_credited: usize,
    pub errors: Vec<String>,
}

impl ChainCycleReport {
    fn merge(scan: ScanReport, confirmations: ConfirmationReport) -> Self {
        let mut errors = scan.errors;
        errors.extend(confirmations.errors);
        Self {
            chain: scan.chain,
            deposits_found: scan.deposits_found,
            deposits_created: scan.deposits_created,
            confirmations_updated: confirmations.updated,
            deposits_credited: confirmations.credited,
            errors,
        }
    }

    fn failed(chain: &str, error: String) -> Self {
        Self {
            chain: chain.to_string(),
            errors: vec![error],
            ..Default::default()
        }
    }
}

pub struct SentinelWorker {
    store: Arc<dyn FundingStore>,
    registry: Arc<ChainRegistry>,
    reconciler: Arc<DepositReconciler>,
    scanners: HashMap<String, Arc<dyn ChainScanner>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SentinelWorker {
    pub fn new(
        store: Arc<dyn FundingStore>,
        registry: Arc<ChainRegistry>,
        reconciler: Arc<DepositReconciler>,
    ) -> Self {
        Self {
            store,
            registry,
            reconciler,
            scanners: HashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Register the scanner serving `scanner.chain()`
    pub fn add_scanner(&mut self, scanner: Arc<dyn ChainScanner>) {
        info!(chain = %scanner.chain(), "Adding scanner");
        self.scanners.insert(scanner.chain().to_string(), scanner);
    }

    pub fn scanner_count(&self) -> usize {
        self.scanners.len()
    }

    /// Chains with a scanner, in registry order
    pub fn chains(&self) -> Vec<String> {
        self.registry
            .slugs()
            .into_iter()
            .filter(|c| self.scanners.contains_key(c))
            .collect()
    }

    fn resolve(&self, chain: &str) -> Result<(&ChainParams, Arc<dyn ChainScanner>), ScannerError> {
        let params = self.registry.get(chain)?;
        let scanner = self
            .scanners
            .get(&params.slug)
            .cloned()
            .ok_or_else(|| ScannerError::NoScanner(params.slug.clone()))?;
        Ok((params, scanner))
    }

    fn chain_lock(&self, chain: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(chain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Scan one chain for new deposits
    pub async fn scan(&self, chain: &str) -> Result<ScanReport, ScannerError> {
        let (params, scanner) = self.resolve(chain)?;
        let lock = self.chain_lock(&params.slug);
        let _guard = lock.lock().await;
        Ok(self.scan_locked(params, scanner.as_ref()).await)
    }

    /// Re-check depth of PENDING deposits on one chain
    pub async fn update_confirmations(
        &self,
        chain: &str,
    ) -> Result<ConfirmationReport, ScannerError> {
        let (params, scanner) = self.resolve(chain)?;
        let lock = self.chain_lock(&params.slug);
        let _guard = lock.lock().await;
        Ok(self.update_confirmations_locked(params, scanner.as_ref()).await)
    }

    /// Scan then confirm one chain, or every chain concurrently when `None`.
    /// A chain whose previous cycle is still running is reported, not queued.
    pub async fn run_cycle(
        &self,
        chain: Option<&str>,
    ) -> Result<Vec<ChainCycleReport>, ScannerError> {
        match chain {
            Some(chain) => {
                let (params, scanner) = self.resolve(chain)?;
                Ok(vec![self.cycle(params, scanner).await])
            }
            None => {
                let mut cycles = Vec::new();
                for slug in self.chains() {
                    let (params, scanner) = self.resolve(&slug)?;
                    cycles.push(self.cycle(params, scanner));
                }
                Ok(join_all(cycles).await)
            }
        }
    }

    async fn cycle(
        &self,
        params: &ChainParams,
        scanner: Arc<dyn ChainScanner>,
    ) -> ChainCycleReport {
        let lock = self.chain_lock(&params.slug);
        let Ok(_guard) = lock.try_lock() else {
            warn!(chain = %params.slug, "Previous cycle still running, skipped");
            return ChainCycleReport::failed(
                &params.slug,
                format!("{}: scan already in progress", params.slug),
            );
        };
        let scan = self.scan_locked(params, scanner.as_ref()).await;
        let confirmations = self
            .update_confirmations_locked(params, scanner.as_ref())
            .await;
        ChainCycleReport::merge(scan, confirmations)
    }

    async fn scan_locked(&self, params: &ChainParams, scanner: &dyn ChainScanner) -> ScanReport {
        let chain = params.slug.as_str();
        let mut report = ScanReport {
            chain: chain.to_string(),
            ..Default::default()
        };

        // 1. Health gate
        let health = match scanner.health_check().await {
            Ok(health) => health,
            Err(e) => {
                warn!(chain = %chain, error = %e, "Node health check failed");
                report.errors.push(format!("{}: {}", chain, e));
                return report;
            }
        };
        let lag_secs = health.lag_secs(chrono::Utc::now().timestamp());
        if lag_secs > params.max_block_lag_secs {
            let e = ScannerError::NodeStale {
                lag_secs,
                max_secs: params.max_block_lag_secs,
            };
            warn!(chain = %chain, lag_secs, "Node is stale, scan skipped");
            report.errors.push(format!("{}: {}", chain, e));
            return report;
        }

        // 2. Block window
        let tip = health.block_height;
        let (cursor, backlog) = match self.load_progress(chain).await {
            Ok(progress) => progress,
            Err(e) => {
                report.errors.push(format!("{}: {}", chain, e));
                return report;
            }
        };
        let from = match cursor {
            Some(height) => height + 1,
            None => tip.saturating_sub(params.lookback_blocks),
        };
        let span = params.max_blocks_per_scan.max(1);
        let window = (from <= tip).then(|| (from, tip.min(from + span - 1)));
        if window.is_none() && backlog.is_empty() {
            debug!(chain = %chain, tip, "No new blocks");
            return report;
        }
        // Lagging addresses catch up to the height the cursor lands on
        let head = match (window, cursor) {
            (Some((_, to)), _) => to,
            (None, Some(height)) => height,
            (None, None) => return report,
        };

        // 3. Addresses
        let addresses = match self.store.addresses_for_chain(chain).await {
            Ok(addresses) => addresses,
            Err(e) => {
                report.errors.push(format!("{}: {}", chain, e));
                return report;
            }
        };
        let mut backlog_saved = true;
        for address in &addresses {
            let behind = backlog.get(&address.address).copied();
            let start = behind.unwrap_or(from);
            if start > head {
                continue;
            }
            let end = head.min(start + span - 1);
            report.addresses_scanned += 1;
            let ok = self
                .scan_address(params, scanner, address, start..=end, &mut report)
                .await;

            let next = if !ok {
                Some(start)
            } else if end < head {
                Some(end + 1)
            } else {
                None
            };
            if next != behind {
                if let Some(next) = next {
                    warn!(
                        chain = %chain,
                        address = %address.address,
                        next,
                        head,
                        "Address behind cursor"
                    );
                }
                if let Err(e) = self
                    .store
                    .set_address_backlog(chain, &address.address, next)
                    .await
                {
                    report.errors.push(format!("{}: {}", address.address, e));
                    backlog_saved = false;
                }
            }
        }

        // 4. Cursor, held when a lagging address could not be recorded
        if let Some((from, to)) = window {
            if !backlog_saved {
                warn!(chain = %chain, cursor = ?cursor, "Cursor held for retry");
                return report;
            }
            if let Err(e) = self.store.set_cursor(chain, to).await {
                report.errors.push(format!("{}: {}", chain, e));
            }
            info!(
                chain = %chain,
                from,
                to,
                addresses = report.addresses_scanned,
                found = report.deposits_found,
                created = report.deposits_created,
                errors = report.errors.len(),
                "Chain scanned"
            );
        }
        report
    }

    async fn load_progress(
        &self,
        chain: &str,
    ) -> Result<(Option<u64>, HashMap<String, u64>), StoreError> {
        let cursor = self.store.cursor(chain).await?;
        let backlog = self.store.address_backlog(chain).await?;
        Ok((cursor, backlog))
    }

    /// `false` when the range has to be retried for this address
    async fn scan_address(
        &self,
        params: &ChainParams,
        scanner: &dyn ChainScanner,
        address: &DepositAddress,
        range: RangeInclusive<u64>,
        report: &mut ScanReport,
    ) -> bool {
        let chain = params.slug.as_str();
        let (from, to) = (*range.start(), *range.end());
        let transfers = match scanner.transfers_to(&address.address, range).await {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!(
                    chain = %chain,
                    address = %address.address,
                    error = %e,
                    "Address scan failed"
                );
                report.errors.push(format!("{}: {}", address.address, e));
                return false;
            }
        };
        trace!(
            target: SCAN_TRACE_TARGET,
            chain = %chain,
            address = %address.address,
            from,
            to,
            transfers = transfers.len(),
            "Address scanned"
        );
        let mut ok = true;
        for transfer in transfers {
            report.deposits_found += 1;
            match self.record(params, address, &transfer).await {
                Ok(true) => report.deposits_created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        chain = %chain,
                        tx_hash = %transfer.tx_hash,
                        error = %e,
                        "Failed to record deposit"
                    );
                    report.errors.push(format!("{}: {}", transfer.tx_hash, e));
                    ok = false;
                }
            }
        }
        ok
    }

    /// `Ok(true)` when a new candidate was created
    async fn record(
        &self,
        params: &ChainParams,
        address: &DepositAddress,
        transfer: &DetectedTransfer,
    ) -> Result<bool, DepositError> {
        let Some(token) = params.token(&transfer.currency) else {
            debug!(chain = %params.slug, currency = %transfer.currency, "Unlisted token ignored");
            return Ok(false);
        };
        if transfer.amount < token.min_deposit {
            debug!(
                chain = %params.slug,
                tx_hash = %transfer.tx_hash,
                amount = %transfer.amount,
                minimum = %token.min_deposit,
                "Transfer below minimum deposit ignored"
            );
            return Ok(false);
        }
        let candidate = DepositCandidate {
            user_id: address.user_id,
            chain: params.slug.clone(),
            currency: token.symbol.clone(),
            tx_hash: transfer.tx_hash.clone(),
            to_address: address.address.clone(),
            from_address: transfer.from_address.clone(),
            amount: transfer.amount,
            block_number: Some(transfer.block_number),
        };
        match self.reconciler.create_candidate(&candidate).await {
            Ok(_) => Ok(true),
            Err(DepositError::DuplicateTransaction(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update_confirmations_locked(
        &self,
        params: &ChainParams,
        scanner: &dyn ChainScanner,
    ) -> ConfirmationReport {
        let chain = params.slug.as_str();
        let mut report = ConfirmationReport {
            chain: chain.to_string(),
            ..Default::default()
        };

        let pending = match self.store.pending_deposits(chain).await {
            Ok(pending) => pending,
            Err(e) => {
                report.errors.push(format!("{}: {}", chain, e));
                return report;
            }
        };
        if pending.is_empty() {
            return report;
        }
        let tip = match scanner.get_latest_height().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!(chain = %chain, error = %e, "Tip query failed");
                report.errors.push(format!("{}: {}", chain, e));
                return report;
            }
        };

        for deposit in pending {
            let inclusion = match scanner.inclusion_height(&deposit.tx_hash).await {
                Ok(Some(height)) => height,
                Ok(None) => {
                    debug!(deposit_id = %deposit.deposit_id, "Transaction not yet included");
                    continue;
                }
                Err(e) => {
                    warn!(deposit_id = %deposit.deposit_id, error = %e, "Inclusion query failed");
                    report.errors.push(format!("{}: {}", deposit.tx_hash, e));
                    continue;
                }
            };
            let confirmations = confirmations_at(tip, inclusion);
            match self
                .reconciler
                .advance_confirmations(&deposit, confirmations, Some(inclusion))
                .await
            {
                Ok(progress) => {
                    if progress.confirmations != deposit.confirmations {
                        report.updated += 1;
                    }
                    if progress.credited {
                        report.credited += 1;
                    }
                }
                Err(e) => {
                    report.errors.push(format!("{}: {}", deposit.deposit_id, e));
                }
            }
        }

        if report.updated > 0 || report.credited > 0 {
            info!(
                chain = %chain,
                tip,
                updated = report.updated,
                credited = report.credited,
                "Confirmations updated"
            );
        }
        report
    }
}
