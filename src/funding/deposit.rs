//! Deposit Reconciler
//!
//! Turns scanner findings into Deposit rows, advances confirmations and
//! credits the ledger exactly once. The tx hash is the idempotency key:
//! every path into the deposits table (scanner or manual credit) goes
//! through the same unique constraint.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use super::deposit_id::DepositIdAllocator;
use super::error::DepositError;
use super::state::DepositStatus;
use super::types::{Deposit, DepositAddress, DepositSource};
use crate::chain::ChainRegistry;
use crate::core_types::{DepositId, UserId, normalize_tx_hash};
use crate::store::{CreditedDeposit, FundingStore, StoreError};

/// Transfer observed on chain into a registered address
#[derive(Debug, Clone, PartialEq)]
pub struct DepositCandidate {
    pub user_id: UserId,
    pub chain: String,
    pub currency: String,
    pub tx_hash: String,
    pub to_address: String,
    pub from_address: Option<String>,
    pub amount: Decimal,
    pub block_number: Option<u64>,
}

/// Administrative credit outside the scanner path
#[derive(Debug, Clone, PartialEq)]
pub struct ManualDeposit {
    pub user_id: UserId,
    pub chain: String,
    pub currency: String,
    pub tx_hash: String,
    pub to_address: String,
    pub from_address: Option<String>,
    pub amount: Decimal,
    pub block_number: Option<u64>,
}

/// Result of one confirmation update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationProgress {
    /// Stored count after the update (never lower than before)
    pub confirmations: u32,
    /// True when this update completed and credited the deposit
    pub credited: bool,
}

/// Deposit as returned to API callers
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DepositView {
    #[serde(flatten)]
    pub deposit: Deposit,
    pub explorer_url: String,
}

pub struct DepositReconciler {
    store: Arc<dyn FundingStore>,
    registry: Arc<ChainRegistry>,
    ids: DepositIdAllocator,
}

impl DepositReconciler {
    pub fn new(store: Arc<dyn FundingStore>, registry: Arc<ChainRegistry>) -> Self {
        Self {
            ids: DepositIdAllocator::new(store.clone()),
            store,
            registry,
        }
    }

    /// Persist a PENDING deposit with zero confirmations.
    ///
    /// A known tx hash yields `DuplicateTransaction`, which callers treat as
    /// a no-op.
    pub async fn create_candidate(
        &self,
        candidate: &DepositCandidate,
    ) -> Result<DepositId, DepositError> {
        let (chain, _token) = self
            .registry
            .token(&candidate.chain, &candidate.currency)?;
        if candidate.amount <= Decimal::ZERO {
            return Err(DepositError::InvalidAmount);
        }
        let tx_hash = normalize_tx_hash(&candidate.tx_hash);
        if self.store.deposit_by_tx_hash(&tx_hash).await?.is_some() {
            debug!(tx_hash = %tx_hash, "Deposit already recorded");
            return Err(DepositError::DuplicateTransaction(tx_hash));
        }

        let now = Utc::now();
        let deposit = Deposit {
            deposit_id: self.ids.allocate(now).await?,
            tx_hash,
            chain: chain.slug.clone(),
            currency: candidate.currency.to_uppercase(),
            to_address: chain.normalize_address(&candidate.to_address),
            from_address: candidate.from_address.clone(),
            user_id: candidate.user_id,
            amount: candidate.amount,
            status: DepositStatus::Pending,
            confirmations: 0,
            required_confirmations: chain.confirmations,
            block_number: candidate.block_number,
            source: DepositSource::Scanner,
            submitted_at: now,
            confirmed_at: None,
            completed_at: None,
        };

        match self.store.insert_deposit(&deposit).await {
            Ok(()) => {
                info!(
                    deposit_id = %deposit.deposit_id,
                    tx_hash = %deposit.tx_hash,
                    chain = %deposit.chain,
                    amount = %deposit.amount,
                    currency = %deposit.currency,
                    user_id = deposit.user_id,
                    "Deposit detected"
                );
                Ok(deposit.deposit_id)
            }
            Err(e) => {
                let e = DepositError::from(e);
                match &e {
                    DepositError::DuplicateTransaction(_) => {
                        debug!(tx_hash = %deposit.tx_hash, "Deposit recorded concurrently");
                    }
                    DepositError::Storage(StoreError::IdCollision(id)) => {
                        error!(
                            deposit_id = %id,
                            tx_hash = %deposit.tx_hash,
                            "Deposit id already taken"
                        );
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    /// PENDING -> COMPLETED with ledger credit and completion event in one
    /// atomic unit. `Ok(None)` when the deposit was already completed.
    pub async fn confirm_and_credit(
        &self,
        deposit_id: &str,
    ) -> Result<Option<CreditedDeposit>, DepositError> {
        match self.store.complete_deposit(deposit_id, Utc::now()).await {
            Ok(Some(credited)) => {
                info!(
                    deposit_id = %deposit_id,
                    user_id = credited.deposit.user_id,
                    amount = %credited.deposit.amount,
                    currency = %credited.deposit.currency,
                    available = %credited.balance.available(),
                    "Deposit credited"
                );
                Ok(Some(credited))
            }
            Ok(None) => {
                debug!(deposit_id = %deposit_id, "Deposit already completed");
                Ok(None)
            }
            Err(e) => {
                let e = DepositError::from(e);
                if matches!(e, DepositError::LedgerInvariantViolation(_)) {
                    error!(deposit_id = %deposit_id, error = %e, "Deposit credit aborted");
                }
                Err(e)
            }
        }
    }

    /// Record a new confirmation count and credit once the chain threshold
    /// is reached. Counts never decrease.
    pub async fn advance_confirmations(
        &self,
        deposit: &Deposit,
        confirmations: u32,
        block_number: Option<u64>,
    ) -> Result<ConfirmationProgress, DepositError> {
        let stored = self
            .store
            .update_deposit_confirmations(&deposit.deposit_id, confirmations, block_number)
            .await?;
        let Some(stored) = stored else {
            // Completed by someone else in the meantime
            return Ok(ConfirmationProgress {
                confirmations: deposit.confirmations.max(confirmations),
                credited: false,
            });
        };

        let credited = if stored >= deposit.required_confirmations {
            self.confirm_and_credit(&deposit.deposit_id).await?.is_some()
        } else {
            debug!(
                deposit_id = %deposit.deposit_id,
                confirmations = stored,
                required = deposit.required_confirmations,
                "Deposit confirming"
            );
            false
        };
        Ok(ConfirmationProgress {
            confirmations: stored,
            credited,
        })
    }

    /// Create, confirm and credit in one atomic unit, under the same tx hash
    /// guard as scanned deposits.
    pub async fn create_manual_deposit(
        &self,
        request: &ManualDeposit,
    ) -> Result<Deposit, DepositError> {
        let (chain, _token) = self.registry.token(&request.chain, &request.currency)?;
        if request.amount <= Decimal::ZERO {
            return Err(DepositError::InvalidAmount);
        }
        if !chain.validate_address(request.to_address.trim()) {
            return Err(DepositError::InvalidAddress {
                chain: chain.slug.clone(),
                address: request.to_address.clone(),
            });
        }
        let tx_hash = normalize_tx_hash(&request.tx_hash);
        if self.store.deposit_by_tx_hash(&tx_hash).await?.is_some() {
            debug!(tx_hash = %tx_hash, "Manual credit for a known transaction");
            return Err(DepositError::DuplicateTransaction(tx_hash));
        }

        let now = Utc::now();
        let deposit = Deposit {
            deposit_id: self.ids.allocate(now).await?,
            tx_hash,
            chain: chain.slug.clone(),
            currency: request.currency.to_uppercase(),
            to_address: chain.normalize_address(&request.to_address),
            from_address: request.from_address.clone(),
            user_id: request.user_id,
            amount: request.amount,
            status: DepositStatus::Completed,
            confirmations: chain.confirmations,
            required_confirmations: chain.confirmations,
            block_number: request.block_number,
            source: DepositSource::Manual,
            submitted_at: now,
            confirmed_at: Some(now),
            completed_at: Some(now),
        };

        let credited = self.store.insert_completed_deposit(&deposit).await?;
        info!(
            deposit_id = %deposit.deposit_id,
            tx_hash = %deposit.tx_hash,
            user_id = deposit.user_id,
            amount = %deposit.amount,
            currency = %deposit.currency,
            available = %credited.balance.available(),
            "Manual deposit credited"
        );
        Ok(credited.deposit)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get(&self, deposit_id: &str) -> Result<DepositView, DepositError> {
        let deposit = self
            .store
            .deposit(deposit_id)
            .await?
            .ok_or_else(|| DepositError::NotFound(deposit_id.to_string()))?;
        Ok(self.view(deposit))
    }

    pub async fn get_by_tx_hash(&self, tx_hash: &str) -> Result<DepositView, DepositError> {
        let tx_hash = normalize_tx_hash(tx_hash);
        let deposit = self
            .store
            .deposit_by_tx_hash(&tx_hash)
            .await?
            .ok_or(DepositError::NotFound(tx_hash))?;
        Ok(self.view(deposit))
    }

    pub async fn list_by_address(&self, address: &str) -> Result<Vec<DepositView>, DepositError> {
        let rows = self.store.deposits_by_address(address.trim()).await?;
        Ok(rows.into_iter().map(|d| self.view(d)).collect())
    }

    pub async fn history(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<DepositView>, DepositError> {
        let rows = self.store.deposits_for_user(user_id, limit).await?;
        Ok(rows.into_iter().map(|d| self.view(d)).collect())
    }

    // ------------------------------------------------------------------
    // Deposit addresses
    // ------------------------------------------------------------------

    /// Watch `address` on `chain` for `user_id`. Re-registering the same
    /// owner is a no-op; an address owned by someone else is rejected.
    pub async fn register_address(
        &self,
        user_id: UserId,
        chain: &str,
        address: &str,
    ) -> Result<DepositAddress, DepositError> {
        let params = self.registry.get(chain)?;
        if !params.validate_address(address.trim()) {
            return Err(DepositError::InvalidAddress {
                chain: params.slug.clone(),
                address: address.to_string(),
            });
        }
        let row = DepositAddress {
            user_id,
            chain: params.slug.clone(),
            address: params.normalize_address(address),
            created_at: Utc::now(),
        };
        match self.store.register_address(&row).await {
            Ok(()) => {
                info!(
                    user_id,
                    chain = %row.chain,
                    address = %row.address,
                    "Deposit address registered"
                );
                Ok(row)
            }
            Err(StoreError::Duplicate(addr)) => Err(DepositError::AddressInUse(addr)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn addresses(&self, user_id: UserId) -> Result<Vec<DepositAddress>, DepositError> {
        Ok(self.store.addresses_for_user(user_id).await?)
    }

    fn view(&self, deposit: Deposit) -> DepositView {
        let explorer_url = self
            .registry
            .get(&deposit.chain)
            .map(|c| c.explorer_tx_url(&deposit.tx_hash))
            .unwrap_or_default();
        DepositView {
            deposit,
            explorer_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::BalanceKey;
    use crate::store::MemoryStore;

    const ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn setup() -> (Arc<MemoryStore>, DepositReconciler) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ChainRegistry::builtin().unwrap());
        let reconciler = DepositReconciler::new(store.clone(), registry);
        (store, reconciler)
    }

    fn candidate(hash: &str, amount: i64) -> DepositCandidate {
        DepositCandidate {
            user_id: 7,
            chain: "ethereum".into(),
            currency: "USDT".into(),
            tx_hash: hash.into(),
            to_address: ADDR.into(),
            from_address: None,
            amount: Decimal::from(amount),
            block_number: Some(100),
        }
    }

    #[tokio::test]
    async fn test_candidate_is_pending_with_registry_threshold() {
        let (_, reconciler) = setup();
        let id = reconciler
            .create_candidate(&candidate("0xAA", 100))
            .await
            .unwrap();
        let view = reconciler.get(&id).await.unwrap();
        assert_eq!(view.deposit.status, DepositStatus::Pending);
        assert_eq!(view.deposit.confirmations, 0);
        assert_eq!(view.deposit.required_confirmations, 12);
        assert_eq!(view.deposit.tx_hash, "0xaa");
        assert_eq!(view.explorer_url, "https://etherscan.io/tx/0xaa");
        assert!(id.starts_with("DEP"));
    }

    #[tokio::test]
    async fn test_duplicate_hash_is_case_insensitive() {
        let (_, reconciler) = setup();
        reconciler
            .create_candidate(&candidate("0xAbC", 100))
            .await
            .unwrap();
        let err = reconciler
            .create_candidate(&candidate("0xabc", 100))
            .await
            .unwrap_err();
        assert!(matches!(err, DepositError::DuplicateTransaction(_)));
    }

    #[tokio::test]
    async fn test_credit_happens_at_threshold_only() {
        let (store, reconciler) = setup();
        let id = reconciler
            .create_candidate(&candidate("0x01", 100))
            .await
            .unwrap();
        let deposit = store.deposit(&id).await.unwrap().unwrap();

        let p = reconciler
            .advance_confirmations(&deposit, 11, None)
            .await
            .unwrap();
        assert!(!p.credited);
        let p = reconciler
            .advance_confirmations(&deposit, 12, None)
            .await
            .unwrap();
        assert!(p.credited);
        // A later update on a completed deposit is a no-op
        let p = reconciler
            .advance_confirmations(&deposit, 13, None)
            .await
            .unwrap();
        assert!(!p.credited);

        let key = BalanceKey::new(7, "USDT", "ethereum");
        let balance = store.balance(&key).await.unwrap().unwrap();
        assert_eq!(balance.available(), Decimal::from(100));
    }

    #[tokio::test]
    async fn test_manual_deposit_credits_once() {
        let (store, reconciler) = setup();
        let request = ManualDeposit {
            user_id: 7,
            chain: "ethereum".into(),
            currency: "usdt".into(),
            tx_hash: "0xMANUAL".into(),
            to_address: ADDR.into(),
            from_address: None,
            amount: Decimal::from(25),
            block_number: None,
        };
        let deposit = reconciler.create_manual_deposit(&request).await.unwrap();
        assert_eq!(deposit.status, DepositStatus::Completed);
        assert_eq!(deposit.source, DepositSource::Manual);
        assert!(matches!(
            reconciler.create_manual_deposit(&request).await,
            Err(DepositError::DuplicateTransaction(_))
        ));

        let key = BalanceKey::new(7, "USDT", "ethereum");
        assert_eq!(
            store.balance(&key).await.unwrap().unwrap().total(),
            Decimal::from(25)
        );
    }

    #[tokio::test]
    async fn test_rejects_unknown_currency_and_bad_amount() {
        let (_, reconciler) = setup();
        let mut c = candidate("0x02", 1);
        c.currency = "DOGE".into();
        assert!(matches!(
            reconciler.create_candidate(&c).await,
            Err(DepositError::Chain(_))
        ));
        assert!(matches!(
            reconciler.create_candidate(&candidate("0x03", 0)).await,
            Err(DepositError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn test_lookup_by_address_ignores_case() {
        let (_, reconciler) = setup();
        reconciler
            .create_candidate(&candidate("0x04", 5))
            .await
            .unwrap();
        let rows = reconciler
            .list_by_address(&ADDR.to_uppercase().replace("0X", "0x"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_register_address_ownership() {
        let (store, reconciler) = setup();
        let row = reconciler.register_address(1, "ethereum", ADDR).await.unwrap();
        assert_eq!(row.address, ADDR.to_lowercase());
        reconciler.register_address(1, "ethereum", ADDR).await.unwrap();
        assert!(matches!(
            reconciler.register_address(2, "ethereum", ADDR).await,
            Err(DepositError::AddressInUse(_))
        ));
        assert!(matches!(
            reconciler.register_address(1, "bitcoin", ADDR).await,
            Err(DepositError::InvalidAddress { .. })
        ));
        assert_eq!(store.addresses_for_chain("ethereum").await.unwrap().len(), 1);
        assert_eq!(reconciler.addresses(1).await.unwrap().len(), 1);
    }
}
