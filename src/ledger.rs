//! Balance Ledger
//!
//! Per-(user, currency, chain) balances. Each operation is atomic per key in
//! the backing store; `UserBalance::apply` re-checks conservation after
//! every change, and a violation aborts the operation.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error};

use crate::balance::{LedgerError, LedgerOp, UserBalance};
use crate::core_types::{BalanceKey, UserId};
use crate::store::{FundingStore, StoreError, StoreResult};

#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<dyn FundingStore>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn FundingStore>) -> Self {
        Self { store }
    }

    /// available += amount
    pub async fn credit(
        &self,
        user_id: UserId,
        currency: &str,
        chain: &str,
        amount: Decimal,
    ) -> StoreResult<UserBalance> {
        self.apply(BalanceKey::new(user_id, currency, chain), LedgerOp::Credit(amount))
            .await
    }

    /// available -> locked; fails with `InsufficientFunds` and no change
    pub async fn reserve(
        &self,
        user_id: UserId,
        currency: &str,
        chain: &str,
        amount: Decimal,
    ) -> StoreResult<UserBalance> {
        self.apply(BalanceKey::new(user_id, currency, chain), LedgerOp::Reserve(amount))
            .await
    }

    /// locked -> available
    pub async fn release(
        &self,
        user_id: UserId,
        currency: &str,
        chain: &str,
        amount: Decimal,
    ) -> StoreResult<UserBalance> {
        self.apply(BalanceKey::new(user_id, currency, chain), LedgerOp::Release(amount))
            .await
    }

    /// locked -= amount, total -= amount
    pub async fn settle(
        &self,
        user_id: UserId,
        currency: &str,
        chain: &str,
        amount: Decimal,
    ) -> StoreResult<UserBalance> {
        self.apply(BalanceKey::new(user_id, currency, chain), LedgerOp::Settle(amount))
            .await
    }

    /// Current balance; zeroed if the row was never created
    pub async fn balance(&self, key: &BalanceKey) -> StoreResult<UserBalance> {
        Ok(self
            .store
            .balance(key)
            .await?
            .unwrap_or_else(|| UserBalance::empty(key.clone())))
    }

    pub async fn balances(&self, user_id: UserId) -> StoreResult<Vec<UserBalance>> {
        self.store.balances_for_user(user_id).await
    }

    async fn apply(&self, key: BalanceKey, op: LedgerOp) -> StoreResult<UserBalance> {
        match self.store.apply_ledger_op(&key, op).await {
            Ok(balance) => {
                debug!(
                    key = %key,
                    op = op.name(),
                    amount = %op.amount(),
                    available = %balance.available(),
                    locked = %balance.locked(),
                    version = balance.version(),
                    "Ledger operation applied"
                );
                Ok(balance)
            }
            Err(StoreError::Ledger(e @ LedgerError::InvariantViolation { .. })) => {
                error!(key = %key, op = op.name(), error = %e, "LEDGER INVARIANT VIOLATION");
                Err(StoreError::Ledger(e))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(Arc::new(MemoryStore::new()))
    }

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[tokio::test]
    async fn test_lazy_row_creation() {
        let ledger = ledger();
        let key = BalanceKey::new(1, "USDT", "ethereum");
        let empty = ledger.balance(&key).await.unwrap();
        assert_eq!(empty.total(), Decimal::ZERO);

        ledger.credit(1, "usdt", "ethereum", d(5)).await.unwrap();
        assert_eq!(ledger.balance(&key).await.unwrap().available(), d(5));
        assert_eq!(ledger.balances(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_then_settle() {
        let ledger = ledger();
        ledger.credit(1, "USDT", "ethereum", d(100)).await.unwrap();
        ledger.reserve(1, "USDT", "ethereum", d(30)).await.unwrap();
        let after = ledger.settle(1, "USDT", "ethereum", d(30)).await.unwrap();
        assert_eq!(after.available(), d(70));
        assert_eq!(after.locked(), Decimal::ZERO);
        assert_eq!(after.total(), d(70));
    }

    #[tokio::test]
    async fn test_release_more_than_locked() {
        let ledger = ledger();
        ledger.credit(1, "USDT", "ethereum", d(10)).await.unwrap();
        let err = ledger
            .release(1, "USDT", "ethereum", d(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::InsufficientLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_keys_are_isolated_per_chain() {
        let ledger = ledger();
        ledger.credit(1, "USDT", "ethereum", d(10)).await.unwrap();
        assert!(ledger.reserve(1, "USDT", "bsc", d(1)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserve_and_credit_conserve() {
        let ledger = ledger();
        ledger.credit(1, "USDT", "ethereum", d(100)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger.reserve(1, "USDT", "ethereum", d(7)).await.is_ok()
                } else {
                    ledger.credit(1, "USDT", "ethereum", d(1)).await.is_ok()
                }
            }));
        }
        let mut reserved = 0;
        for (i, h) in handles.into_iter().enumerate() {
            if h.await.unwrap() && i % 2 == 0 {
                reserved += 1;
            }
        }

        let key = BalanceKey::new(1, "USDT", "ethereum");
        let bal = ledger.balance(&key).await.unwrap();
        bal.check_invariants().unwrap();
        assert_eq!(bal.total(), d(125));
        assert_eq!(bal.locked(), d(7 * reserved));
        assert_eq!(bal.available() + bal.locked(), d(125));
    }
}
