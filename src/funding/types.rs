use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::state::{DepositStatus, WithdrawalStatus};
use crate::balance::LedgerOp;
use crate::core_types::{DepositId, UserId, WithdrawalId};

/// How a deposit entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DepositSource {
    #[default]
    Scanner,
    Manual,
}

impl fmt::Display for DepositSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositSource::Scanner => write!(f, "scanner"),
            DepositSource::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for DepositSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scanner" => Ok(DepositSource::Scanner),
            "manual" => Ok(DepositSource::Manual),
            _ => Err(format!("Invalid deposit source: {}", s)),
        }
    }
}

/// On-chain deposit into a registered address.
///
/// `tx_hash` is stored normalized and is unique across all deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Deposit {
    pub deposit_id: DepositId,
    pub tx_hash: String,
    pub chain: String,
    pub currency: String,
    pub to_address: String,
    pub from_address: Option<String>,
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: DepositStatus,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub block_number: Option<u64>,
    pub source: DepositSource,
    pub submitted_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// User withdrawal request and its settlement progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Withdrawal {
    pub withdrawal_id: WithdrawalId,
    pub user_id: UserId,
    pub currency: String,
    pub chain: String,
    /// Reserved amount
    pub amount: Decimal,
    pub fee: Decimal,
    /// Amount sent on-chain: `amount - fee`
    pub net_amount: Decimal,
    pub to_address: String,
    pub memo: Option<String>,
    pub status: WithdrawalStatus,
    pub email_verified: bool,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    /// Cancel or failure reason
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Broadcast has started once a tx hash is recorded
    pub fn is_broadcast(&self) -> bool {
        self.status == WithdrawalStatus::Processing && self.tx_hash.is_some()
    }
}

/// Single-use, time-bounded code bound to one withdrawal and its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub code_id: String,
    pub withdrawal_id: WithdrawalId,
    pub user_id: UserId,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    /// Superseded by a resend
    pub invalidated: bool,
}

impl VerificationCode {
    /// Usable up to and including `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Watched deposit address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DepositAddress {
    pub user_id: UserId,
    pub chain: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

/// Outbox event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DepositCompleted,
    WithdrawalCompleted,
    WithdrawalCancelled,
    WithdrawalFailed,
    /// Carries a verification code to the user's mailbox
    VerificationCode,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DepositCompleted => "deposit_completed",
            EventKind::WithdrawalCompleted => "withdrawal_completed",
            EventKind::WithdrawalCancelled => "withdrawal_cancelled",
            EventKind::WithdrawalFailed => "withdrawal_failed",
            EventKind::VerificationCode => "verification_code",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit_completed" => Ok(EventKind::DepositCompleted),
            "withdrawal_completed" => Ok(EventKind::WithdrawalCompleted),
            "withdrawal_cancelled" => Ok(EventKind::WithdrawalCancelled),
            "withdrawal_failed" => Ok(EventKind::WithdrawalFailed),
            "verification_code" => Ok(EventKind::VerificationCode),
            _ => Err(format!("Invalid event kind: {}", s)),
        }
    }
}

/// Event committed in the same transaction as the fact it reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub kind: EventKind,
    pub user_id: UserId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Event to enqueue; the store assigns the id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEvent {
    pub kind: EventKind,
    pub user_id: UserId,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn deposit_completed(deposit: &Deposit) -> Self {
        Self {
            kind: EventKind::DepositCompleted,
            user_id: deposit.user_id,
            payload: serde_json::json!({
                "deposit_id": deposit.deposit_id,
                "tx_hash": deposit.tx_hash,
                "chain": deposit.chain,
                "currency": deposit.currency,
                "amount": deposit.amount.to_string(),
            }),
        }
    }

    pub fn withdrawal(kind: EventKind, withdrawal: &Withdrawal) -> Self {
        Self {
            kind,
            user_id: withdrawal.user_id,
            payload: serde_json::json!({
                "withdrawal_id": withdrawal.withdrawal_id,
                "chain": withdrawal.chain,
                "currency": withdrawal.currency,
                "amount": withdrawal.amount.to_string(),
                "net_amount": withdrawal.net_amount.to_string(),
                "tx_hash": withdrawal.tx_hash,
                "reason": withdrawal.reason,
            }),
        }
    }

    pub fn verification_code(code: &VerificationCode) -> Self {
        Self {
            kind: EventKind::VerificationCode,
            user_id: code.user_id,
            payload: serde_json::json!({
                "withdrawal_id": code.withdrawal_id,
                "code": code.code,
                "expires_at": code.expires_at,
            }),
        }
    }
}

/// One guarded withdrawal transition, applied atomically by the store:
/// status CAS from the expected state, optional code consumption, optional
/// ledger operation and optional outbox event.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalTransition {
    pub next: WithdrawalStatus,
    pub at: DateTime<Utc>,
    pub tx_hash: Option<String>,
    pub confirmations: Option<u32>,
    pub reason: Option<String>,
    pub consume_code: Option<String>,
    pub ledger: Option<LedgerOp>,
    pub event: Option<EventKind>,
}

impl WithdrawalTransition {
    pub fn to(next: WithdrawalStatus, at: DateTime<Utc>) -> Self {
        Self {
            next,
            at,
            tx_hash: None,
            confirmations: None,
            reason: None,
            consume_code: None,
            ledger: None,
            event: None,
        }
    }

    pub fn with_ledger(mut self, op: LedgerOp) -> Self {
        self.ledger = Some(op);
        self
    }

    pub fn with_event(mut self, kind: EventKind) -> Self {
        self.event = Some(kind);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Once a hash is recorded the withdrawal cannot be cancelled and the
    /// hash cannot be replaced by a different one
    pub fn blocked_by_broadcast(&self, current: &Withdrawal) -> bool {
        match &current.tx_hash {
            None => false,
            Some(recorded) => {
                self.next == WithdrawalStatus::Cancelled
                    || self.tx_hash.as_ref().is_some_and(|h| h != recorded)
            }
        }
    }

    /// Apply the non-ledger side of the transition to a record
    pub fn apply_to(&self, w: &mut Withdrawal) {
        w.status = self.next;
        match self.next {
            WithdrawalStatus::Verified => {
                w.email_verified = true;
                w.verified_at = Some(self.at);
            }
            WithdrawalStatus::Processing => w.processing_at = Some(self.at),
            WithdrawalStatus::Completed => w.completed_at = Some(self.at),
            WithdrawalStatus::Cancelled => w.cancelled_at = Some(self.at),
            WithdrawalStatus::Failed => w.failed_at = Some(self.at),
            WithdrawalStatus::Pending => {}
        }
        if let Some(hash) = &self.tx_hash {
            w.tx_hash = Some(hash.clone());
        }
        if let Some(confirmations) = self.confirmations {
            w.confirmations = confirmations;
        }
        if let Some(reason) = &self.reason {
            w.reason = Some(reason.clone());
        }
    }
}
