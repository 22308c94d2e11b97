//! Funding Storage
//!
//! One trait covers every table the funding services touch. Methods that
//! move money are compound: each one is a single atomic unit in both
//! implementations (one SQL transaction in `PgStore`, one critical section in
//! `MemoryStore`), so a partial credit or a partial reservation cannot be
//! observed.
//!
//! Implementations:
//! - `PgStore` - PostgreSQL (sqlx)
//! - `MemoryStore` - in-memory, for tests and local development

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::balance::{LedgerError, LedgerOp, UserBalance};
use crate::core_types::{BalanceKey, UserId};
use crate::funding::state::WithdrawalStatus;
use crate::funding::types::{
    Deposit, DepositAddress, OutboxEvent, VerificationCode, Withdrawal, WithdrawalTransition,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A generated deposit id is already taken by a different transaction
    #[error("Deposit id collision: {0}")]
    IdCollision(String),

    /// Cancel or hash overwrite after a broadcast hash was recorded
    #[error("Withdrawal {0} already broadcast")]
    Broadcast(String),

    /// Compare-and-swap lost: the row is no longer in the expected state
    #[error("State conflict on {id}: expected {expected}, found {actual}")]
    StateConflict {
        id: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a successful deposit completion
#[derive(Debug, Clone)]
pub struct CreditedDeposit {
    pub deposit: Deposit,
    pub balance: UserBalance,
}

#[async_trait]
pub trait FundingStore: Send + Sync {
    // ---------------------------------------------------------------
    // Balance ledger
    // ---------------------------------------------------------------

    async fn balance(&self, key: &BalanceKey) -> StoreResult<Option<UserBalance>>;

    async fn balances_for_user(&self, user_id: UserId) -> StoreResult<Vec<UserBalance>>;

    /// Apply one ledger operation under a row lock. Creates the row lazily
    /// on the first credit.
    async fn apply_ledger_op(&self, key: &BalanceKey, op: LedgerOp) -> StoreResult<UserBalance>;

    // ---------------------------------------------------------------
    // Deposit id allocator
    // ---------------------------------------------------------------

    /// Atomic increment-and-read of the per-day counter. First call of a day
    /// returns 1.
    async fn next_deposit_seq(&self, date: NaiveDate) -> StoreResult<u64>;

    // ---------------------------------------------------------------
    // Deposits
    // ---------------------------------------------------------------

    /// Insert a PENDING deposit. `Duplicate` when the tx hash is known.
    async fn insert_deposit(&self, deposit: &Deposit) -> StoreResult<()>;

    /// Insert an already completed deposit, credit the ledger and enqueue
    /// the completion event in one unit. `Duplicate` when the tx hash is
    /// known, with nothing written.
    async fn insert_completed_deposit(&self, deposit: &Deposit) -> StoreResult<CreditedDeposit>;

    /// PENDING -> COMPLETED, ledger credit and outbox event in one unit.
    /// `Ok(None)` when the deposit is no longer PENDING.
    async fn complete_deposit(
        &self,
        deposit_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CreditedDeposit>>;

    /// Raise the confirmation count of a PENDING deposit. Never lowers it.
    /// Returns the stored count, or `None` if the deposit is not PENDING.
    async fn update_deposit_confirmations(
        &self,
        deposit_id: &str,
        confirmations: u32,
        block_number: Option<u64>,
    ) -> StoreResult<Option<u32>>;

    async fn deposit(&self, deposit_id: &str) -> StoreResult<Option<Deposit>>;

    /// Lookup by normalized tx hash
    async fn deposit_by_tx_hash(&self, tx_hash: &str) -> StoreResult<Option<Deposit>>;

    /// Deposits into an address, newest first. Matching is case-insensitive.
    async fn deposits_by_address(&self, address: &str) -> StoreResult<Vec<Deposit>>;

    async fn pending_deposits(&self, chain: &str) -> StoreResult<Vec<Deposit>>;

    async fn deposits_for_user(&self, user_id: UserId, limit: usize) -> StoreResult<Vec<Deposit>>;

    // ---------------------------------------------------------------
    // Deposit addresses and chain cursors
    // ---------------------------------------------------------------

    /// Idempotent for the same owner; `Duplicate` if another user holds it
    async fn register_address(&self, address: &DepositAddress) -> StoreResult<()>;

    async fn addresses_for_chain(&self, chain: &str) -> StoreResult<Vec<DepositAddress>>;

    async fn addresses_for_user(&self, user_id: UserId) -> StoreResult<Vec<DepositAddress>>;

    async fn cursor(&self, chain: &str) -> StoreResult<Option<u64>>;

    async fn set_cursor(&self, chain: &str, height: u64) -> StoreResult<()>;

    /// Addresses that fell behind the chain cursor, with the next height
    /// each one still has to scan
    async fn address_backlog(&self, chain: &str) -> StoreResult<HashMap<String, u64>>;

    /// `None` clears the entry once the address has caught up
    async fn set_address_backlog(
        &self,
        chain: &str,
        address: &str,
        next_height: Option<u64>,
    ) -> StoreResult<()>;

    // ---------------------------------------------------------------
    // Withdrawals
    // ---------------------------------------------------------------

    /// Reserve `withdrawal.amount`, insert the PENDING withdrawal, its first
    /// code and the code delivery event in one unit.
    async fn create_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        code: &VerificationCode,
    ) -> StoreResult<UserBalance>;

    async fn withdrawal(&self, withdrawal_id: &str) -> StoreResult<Option<Withdrawal>>;

    async fn withdrawals_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<Withdrawal>>;

    /// PENDING withdrawals whose latest code expired before `before`
    async fn expired_pending_withdrawals(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Withdrawal>>;

    /// Guarded transition. `StateConflict` when the withdrawal is not in
    /// `expected` (or the code to consume is no longer active); nothing is
    /// written in that case.
    async fn transition_withdrawal(
        &self,
        withdrawal_id: &str,
        expected: WithdrawalStatus,
        transition: &WithdrawalTransition,
    ) -> StoreResult<Withdrawal>;

    // ---------------------------------------------------------------
    // Verification codes
    // ---------------------------------------------------------------

    /// Invalidate every earlier code of the withdrawal, insert `code`, move
    /// the withdrawal's code expiry and enqueue the delivery event.
    async fn replace_code(&self, code: &VerificationCode) -> StoreResult<()>;

    /// Most recently issued code, whatever its state
    async fn latest_code(&self, withdrawal_id: &str) -> StoreResult<Option<VerificationCode>>;

    async fn codes_for_withdrawal(&self, withdrawal_id: &str)
    -> StoreResult<Vec<VerificationCode>>;

    // ---------------------------------------------------------------
    // Outbox
    // ---------------------------------------------------------------

    /// Fewest attempts first, then enqueue order, so a failing event
    /// cannot keep a full batch from reaching newer ones
    async fn undelivered_events(&self, limit: usize) -> StoreResult<Vec<OutboxEvent>>;

    async fn mark_event_delivered(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    async fn record_event_failure(&self, id: i64, error: &str) -> StoreResult<()>;
}
