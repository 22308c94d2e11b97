//! In-Memory Funding Store
//!
//! Every table lives behind one `tokio::sync::Mutex`, so each trait method
//! is a critical section and compound methods are atomic. Fallible steps
//! are checked before the first write. Data is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{CreditedDeposit, FundingStore, StoreError, StoreResult};
use crate::balance::{LedgerOp, UserBalance};
use crate::core_types::{BalanceKey, UserId};
use crate::funding::state::{DepositStatus, WithdrawalStatus};
use crate::funding::types::{
    Deposit, DepositAddress, NewEvent, OutboxEvent, VerificationCode, Withdrawal,
    WithdrawalTransition,
};

#[derive(Default)]
struct Tables {
    balances: HashMap<BalanceKey, UserBalance>,
    day_counters: HashMap<NaiveDate, u64>,
    deposits: HashMap<String, Deposit>,
    /// normalized tx hash -> deposit id
    deposit_by_hash: HashMap<String, String>,
    /// (chain, address) -> row
    addresses: HashMap<(String, String), DepositAddress>,
    cursors: HashMap<String, u64>,
    /// (chain, address) -> next height to scan
    backlog: HashMap<(String, String), u64>,
    withdrawals: HashMap<String, Withdrawal>,
    /// In issue order
    codes: Vec<VerificationCode>,
    outbox: Vec<OutboxEvent>,
    next_event_id: i64,
}

impl Tables {
    /// Balance after `op`, without writing it
    fn preview(&self, key: &BalanceKey, op: LedgerOp) -> StoreResult<UserBalance> {
        let mut balance = self
            .balances
            .get(key)
            .cloned()
            .unwrap_or_else(|| UserBalance::empty(key.clone()));
        balance.apply(op)?;
        Ok(balance)
    }

    fn push_event(&mut self, event: NewEvent, at: DateTime<Utc>) {
        self.next_event_id += 1;
        self.outbox.push(OutboxEvent {
            id: self.next_event_id,
            kind: event.kind,
            user_id: event.user_id,
            payload: event.payload,
            created_at: at,
            delivered_at: None,
            attempts: 0,
            last_error: None,
        });
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_outbox: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            fail_outbox: AtomicBool::new(false),
        }
    }

    /// Make every outbox insert fail, so that the enclosing unit must roll
    /// back. Used to exercise failure atomicity.
    pub fn set_fail_outbox(&self, fail: bool) {
        self.fail_outbox.store(fail, Ordering::SeqCst);
    }

    fn check_outbox(&self) -> StoreResult<()> {
        if self.fail_outbox.load(Ordering::SeqCst) {
            return Err(StoreError::Database("outbox insert failed".to_string()));
        }
        Ok(())
    }

    /// Number of events ever enqueued (delivered or not)
    pub async fn outbox_len(&self) -> usize {
        self.tables.lock().await.outbox.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first<T, K: Ord>(rows: &mut [T], key: impl Fn(&T) -> K) {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl FundingStore for MemoryStore {
    async fn balance(&self, key: &BalanceKey) -> StoreResult<Option<UserBalance>> {
        Ok(self.tables.lock().await.balances.get(key).cloned())
    }

    async fn balances_for_user(&self, user_id: UserId) -> StoreResult<Vec<UserBalance>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<UserBalance> = tables
            .balances
            .values()
            .filter(|b| b.key().user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.key().currency, &a.key().chain).cmp(&(&b.key().currency, &b.key().chain))
        });
        Ok(rows)
    }

    async fn apply_ledger_op(&self, key: &BalanceKey, op: LedgerOp) -> StoreResult<UserBalance> {
        let mut tables = self.tables.lock().await;
        let balance = tables.preview(key, op)?;
        tables.balances.insert(key.clone(), balance.clone());
        Ok(balance)
    }

    async fn next_deposit_seq(&self, date: NaiveDate) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let counter = tables.day_counters.entry(date).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_deposit(&self, deposit: &Deposit) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.deposit_by_hash.contains_key(&deposit.tx_hash) {
            return Err(StoreError::Duplicate(deposit.tx_hash.clone()));
        }
        if tables.deposits.contains_key(&deposit.deposit_id) {
            return Err(StoreError::IdCollision(deposit.deposit_id.clone()));
        }
        tables
            .deposit_by_hash
            .insert(deposit.tx_hash.clone(), deposit.deposit_id.clone());
        tables
            .deposits
            .insert(deposit.deposit_id.clone(), deposit.clone());
        Ok(())
    }

    async fn insert_completed_deposit(&self, deposit: &Deposit) -> StoreResult<CreditedDeposit> {
        let mut tables = self.tables.lock().await;
        if tables.deposit_by_hash.contains_key(&deposit.tx_hash) {
            return Err(StoreError::Duplicate(deposit.tx_hash.clone()));
        }
        if tables.deposits.contains_key(&deposit.deposit_id) {
            return Err(StoreError::IdCollision(deposit.deposit_id.clone()));
        }
        if deposit.status != DepositStatus::Completed {
            return Err(StoreError::InvalidData(format!(
                "{} is not completed",
                deposit.deposit_id
            )));
        }
        self.check_outbox()?;
        let key = BalanceKey::new(deposit.user_id, &deposit.currency, &deposit.chain);
        let balance = tables.preview(&key, LedgerOp::Credit(deposit.amount))?;

        let at = deposit.completed_at.unwrap_or_else(Utc::now);
        tables.balances.insert(key, balance.clone());
        tables
            .deposit_by_hash
            .insert(deposit.tx_hash.clone(), deposit.deposit_id.clone());
        tables
            .deposits
            .insert(deposit.deposit_id.clone(), deposit.clone());
        tables.push_event(NewEvent::deposit_completed(deposit), at);
        Ok(CreditedDeposit {
            deposit: deposit.clone(),
            balance,
        })
    }

    async fn complete_deposit(
        &self,
        deposit_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CreditedDeposit>> {
        let mut tables = self.tables.lock().await;
        let mut deposit = tables
            .deposits
            .get(deposit_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(deposit_id.to_string()))?;
        if deposit.status != DepositStatus::Pending {
            return Ok(None);
        }
        self.check_outbox()?;
        let key = BalanceKey::new(deposit.user_id, &deposit.currency, &deposit.chain);
        let balance = tables.preview(&key, LedgerOp::Credit(deposit.amount))?;

        deposit.status = DepositStatus::Completed;
        deposit.confirmed_at = Some(at);
        deposit.completed_at = Some(at);
        tables.balances.insert(key, balance.clone());
        tables
            .deposits
            .insert(deposit.deposit_id.clone(), deposit.clone());
        tables.push_event(NewEvent::deposit_completed(&deposit), at);
        Ok(Some(CreditedDeposit { deposit, balance }))
    }

    async fn update_deposit_confirmations(
        &self,
        deposit_id: &str,
        confirmations: u32,
        block_number: Option<u64>,
    ) -> StoreResult<Option<u32>> {
        let mut tables = self.tables.lock().await;
        let deposit = tables
            .deposits
            .get_mut(deposit_id)
            .ok_or_else(|| StoreError::NotFound(deposit_id.to_string()))?;
        if deposit.status != DepositStatus::Pending {
            return Ok(None);
        }
        deposit.confirmations = deposit.confirmations.max(confirmations);
        if block_number.is_some() {
            deposit.block_number = block_number;
        }
        Ok(Some(deposit.confirmations))
    }

    async fn deposit(&self, deposit_id: &str) -> StoreResult<Option<Deposit>> {
        Ok(self.tables.lock().await.deposits.get(deposit_id).cloned())
    }

    async fn deposit_by_tx_hash(&self, tx_hash: &str) -> StoreResult<Option<Deposit>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .deposit_by_hash
            .get(tx_hash)
            .and_then(|id| tables.deposits.get(id))
            .cloned())
    }

    async fn deposits_by_address(&self, address: &str) -> StoreResult<Vec<Deposit>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Deposit> = tables
            .deposits
            .values()
            .filter(|d| d.to_address.eq_ignore_ascii_case(address))
            .cloned()
            .collect();
        newest_first(&mut rows, |d| (d.submitted_at, d.deposit_id.clone()));
        Ok(rows)
    }

    async fn pending_deposits(&self, chain: &str) -> StoreResult<Vec<Deposit>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Deposit> = tables
            .deposits
            .values()
            .filter(|d| d.chain == chain && d.status == DepositStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.submitted_at, &a.deposit_id).cmp(&(b.submitted_at, &b.deposit_id))
        });
        Ok(rows)
    }

    async fn deposits_for_user(&self, user_id: UserId, limit: usize) -> StoreResult<Vec<Deposit>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Deposit> = tables
            .deposits
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |d| (d.submitted_at, d.deposit_id.clone()));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn register_address(&self, address: &DepositAddress) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let slot = (address.chain.clone(), address.address.clone());
        match tables.addresses.get(&slot) {
            Some(existing) if existing.user_id == address.user_id => Ok(()),
            Some(_) => Err(StoreError::Duplicate(address.address.clone())),
            None => {
                tables.addresses.insert(slot, address.clone());
                Ok(())
            }
        }
    }

    async fn addresses_for_chain(&self, chain: &str) -> StoreResult<Vec<DepositAddress>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<DepositAddress> = tables
            .addresses
            .values()
            .filter(|a| a.chain == chain)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(rows)
    }

    async fn addresses_for_user(&self, user_id: UserId) -> StoreResult<Vec<DepositAddress>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<DepositAddress> = tables
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.chain, &a.address).cmp(&(&b.chain, &b.address)));
        Ok(rows)
    }

    async fn cursor(&self, chain: &str) -> StoreResult<Option<u64>> {
        Ok(self.tables.lock().await.cursors.get(chain).copied())
    }

    async fn set_cursor(&self, chain: &str, height: u64) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .cursors
            .insert(chain.to_string(), height);
        Ok(())
    }

    async fn address_backlog(&self, chain: &str) -> StoreResult<HashMap<String, u64>> {
        Ok(self
            .tables
            .lock()
            .await
            .backlog
            .iter()
            .filter(|((c, _), _)| c == chain)
            .map(|((_, address), next)| (address.clone(), *next))
            .collect())
    }

    async fn set_address_backlog(
        &self,
        chain: &str,
        address: &str,
        next_height: Option<u64>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let key = (chain.to_string(), address.to_string());
        match next_height {
            Some(next) => {
                tables.backlog.insert(key, next);
            }
            None => {
                tables.backlog.remove(&key);
            }
        }
        Ok(())
    }

    async fn create_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        code: &VerificationCode,
    ) -> StoreResult<UserBalance> {
        let mut tables = self.tables.lock().await;
        if tables.withdrawals.contains_key(&withdrawal.withdrawal_id) {
            return Err(StoreError::Duplicate(withdrawal.withdrawal_id.clone()));
        }
        self.check_outbox()?;
        let key = BalanceKey::new(withdrawal.user_id, &withdrawal.currency, &withdrawal.chain);
        let balance = tables.preview(&key, LedgerOp::Reserve(withdrawal.amount))?;

        tables.balances.insert(key, balance.clone());
        tables
            .withdrawals
            .insert(withdrawal.withdrawal_id.clone(), withdrawal.clone());
        tables.codes.push(code.clone());
        tables.push_event(NewEvent::verification_code(code), code.created_at);
        Ok(balance)
    }

    async fn withdrawal(&self, withdrawal_id: &str) -> StoreResult<Option<Withdrawal>> {
        Ok(self
            .tables
            .lock()
            .await
            .withdrawals
            .get(withdrawal_id)
            .cloned())
    }

    async fn withdrawals_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<Withdrawal>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Withdrawal> = tables
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |w| (w.created_at, w.withdrawal_id.clone()));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn expired_pending_withdrawals(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Withdrawal>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Withdrawal> = tables
            .withdrawals
            .values()
            .filter(|w| {
                w.status == WithdrawalStatus::Pending
                    && w.code_expires_at.is_some_and(|exp| exp < before)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn transition_withdrawal(
        &self,
        withdrawal_id: &str,
        expected: WithdrawalStatus,
        transition: &WithdrawalTransition,
    ) -> StoreResult<Withdrawal> {
        let mut tables = self.tables.lock().await;
        let mut withdrawal = tables
            .withdrawals
            .get(withdrawal_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(withdrawal_id.to_string()))?;
        if withdrawal.status != expected {
            return Err(StoreError::StateConflict {
                id: withdrawal_id.to_string(),
                expected: expected.to_string(),
                actual: withdrawal.status.to_string(),
            });
        }
        if transition.blocked_by_broadcast(&withdrawal) {
            return Err(StoreError::Broadcast(withdrawal_id.to_string()));
        }

        let code_idx = match &transition.consume_code {
            Some(code_id) => {
                let idx = tables
                    .codes
                    .iter()
                    .position(|c| &c.code_id == code_id)
                    .ok_or_else(|| StoreError::NotFound(code_id.clone()))?;
                let code = &tables.codes[idx];
                if code.used || code.invalidated {
                    return Err(StoreError::StateConflict {
                        id: code_id.clone(),
                        expected: "active".to_string(),
                        actual: if code.used { "used" } else { "invalidated" }.to_string(),
                    });
                }
                Some(idx)
            }
            None => None,
        };
        if transition.event.is_some() {
            self.check_outbox()?;
        }
        let key = BalanceKey::new(withdrawal.user_id, &withdrawal.currency, &withdrawal.chain);
        let balance = match transition.ledger {
            Some(op) => Some(tables.preview(&key, op)?),
            None => None,
        };

        transition.apply_to(&mut withdrawal);
        if let Some(idx) = code_idx {
            tables.codes[idx].used = true;
        }
        if let Some(balance) = balance {
            tables.balances.insert(key, balance);
        }
        if let Some(kind) = transition.event {
            tables.push_event(NewEvent::withdrawal(kind, &withdrawal), transition.at);
        }
        tables
            .withdrawals
            .insert(withdrawal_id.to_string(), withdrawal.clone());
        Ok(withdrawal)
    }

    async fn replace_code(&self, code: &VerificationCode) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let status = tables
            .withdrawals
            .get(&code.withdrawal_id)
            .map(|w| w.status)
            .ok_or_else(|| StoreError::NotFound(code.withdrawal_id.clone()))?;
        if status != WithdrawalStatus::Pending {
            return Err(StoreError::StateConflict {
                id: code.withdrawal_id.clone(),
                expected: WithdrawalStatus::Pending.to_string(),
                actual: status.to_string(),
            });
        }
        self.check_outbox()?;

        for old in tables
            .codes
            .iter_mut()
            .filter(|c| c.withdrawal_id == code.withdrawal_id)
        {
            old.invalidated = true;
        }
        tables.codes.push(code.clone());
        if let Some(w) = tables.withdrawals.get_mut(&code.withdrawal_id) {
            w.code_expires_at = Some(code.expires_at);
        }
        tables.push_event(NewEvent::verification_code(code), code.created_at);
        Ok(())
    }

    async fn latest_code(&self, withdrawal_id: &str) -> StoreResult<Option<VerificationCode>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .codes
            .iter()
            .rev()
            .find(|c| c.withdrawal_id == withdrawal_id)
            .cloned())
    }

    async fn codes_for_withdrawal(
        &self,
        withdrawal_id: &str,
    ) -> StoreResult<Vec<VerificationCode>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .codes
            .iter()
            .filter(|c| c.withdrawal_id == withdrawal_id)
            .cloned()
            .collect())
    }

    async fn undelivered_events(&self, limit: usize) -> StoreResult<Vec<OutboxEvent>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<OutboxEvent> = tables
            .outbox
            .iter()
            .filter(|e| e.delivered_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.attempts, e.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_event_delivered(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let event = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", id)))?;
        event.delivered_at = Some(at);
        event.attempts += 1;
        Ok(())
    }

    async fn record_event_failure(&self, id: i64, error: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let event = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", id)))?;
        event.attempts += 1;
        event.last_error = Some(error.to_string());
        Ok(())
    }
}
