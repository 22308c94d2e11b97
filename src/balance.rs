/// ENFORCED BALANCE TYPE - Used by the Balance Ledger
///
/// This is the SINGLE source of truth for balance arithmetic.
/// ALL ledger mutations MUST go through these methods, in both stores.
///
/// # Enforcement Strategy:
/// 1. Fields are PRIVATE - no direct access
/// 2. All mutations return Result - errors are explicit
/// 3. Version auto-increments - audit trail
/// 4. Every mutation re-checks the conservation invariant before returning
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::BalanceKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Insufficient available balance: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Insufficient locked balance: requested {requested}, locked {locked}")]
    InsufficientLocked { requested: Decimal, locked: Decimal },

    #[error("Ledger invariant violated for {key}: {detail}")]
    InvariantViolation { key: String, detail: String },
}

/// Ledger operation applied atomically to one balance row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "amount", rename_all = "lowercase")]
pub enum LedgerOp {
    /// available += amount, total += amount
    Credit(Decimal),
    /// available -> locked
    Reserve(Decimal),
    /// locked -> available
    Release(Decimal),
    /// locked -= amount, total -= amount (funds left the platform)
    Settle(Decimal),
}

impl LedgerOp {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerOp::Credit(_) => "credit",
            LedgerOp::Reserve(_) => "reserve",
            LedgerOp::Release(_) => "release",
            LedgerOp::Settle(_) => "settle",
        }
    }

    pub fn amount(&self) -> Decimal {
        match *self {
            LedgerOp::Credit(a)
            | LedgerOp::Reserve(a)
            | LedgerOp::Release(a)
            | LedgerOp::Settle(a) => a,
        }
    }
}

/// Balance for a single (user, currency, chain)
///
/// # Invariants (ENFORCED by private fields):
/// - available, locked, frozen >= 0
/// - total == available + locked + frozen
/// - version increments on every successful mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    key: BalanceKey,
    available: Decimal,
    locked: Decimal,
    frozen: Decimal,
    total: Decimal,
    version: i64,
}

impl UserBalance {
    /// Zeroed balance, created lazily on first credit
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            key,
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            frozen: Decimal::ZERO,
            total: Decimal::ZERO,
            version: 0,
        }
    }

    /// Rebuild from a persisted row. The row is checked, not trusted.
    pub fn from_parts(
        key: BalanceKey,
        available: Decimal,
        locked: Decimal,
        frozen: Decimal,
        total: Decimal,
        version: i64,
    ) -> Result<Self, LedgerError> {
        let balance = Self {
            key,
            available,
            locked,
            frozen,
            total,
            version,
        };
        balance.check_invariants()?;
        Ok(balance)
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn key(&self) -> &BalanceKey {
        &self.key
    }

    pub fn available(&self) -> Decimal {
        self.available
    }

    pub fn locked(&self) -> Decimal {
        self.locked
    }

    pub fn frozen(&self) -> Decimal {
        self.frozen
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    // ============================================================
    // VALIDATED MUTATIONS
    // ============================================================

    /// Apply one ledger operation. On error the balance is left untouched.
    pub fn apply(&mut self, op: LedgerOp) -> Result<(), LedgerError> {
        let amount = op.amount();
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut next = self.clone();
        match op {
            LedgerOp::Credit(_) => {
                next.available += amount;
                next.total += amount;
            }
            LedgerOp::Reserve(_) => {
                if next.available < amount {
                    return Err(LedgerError::InsufficientFunds {
                        requested: amount,
                        available: next.available,
                    });
                }
                next.available -= amount;
                next.locked += amount;
            }
            LedgerOp::Release(_) => {
                if next.locked < amount {
                    return Err(LedgerError::InsufficientLocked {
                        requested: amount,
                        locked: next.locked,
                    });
                }
                next.locked -= amount;
                next.available += amount;
            }
            LedgerOp::Settle(_) => {
                if next.locked < amount {
                    return Err(LedgerError::InsufficientLocked {
                        requested: amount,
                        locked: next.locked,
                    });
                }
                next.locked -= amount;
                next.total -= amount;
            }
        }
        next.version += 1;
        next.check_invariants()?;

        *self = next;
        Ok(())
    }

    /// available, locked, frozen >= 0 and total == available + locked + frozen
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let violation = |detail: String| LedgerError::InvariantViolation {
            key: self.key.to_string(),
            detail,
        };

        if self.available < Decimal::ZERO
            || self.locked < Decimal::ZERO
            || self.frozen < Decimal::ZERO
        {
            return Err(violation(format!(
                "negative component (available={}, locked={}, frozen={})",
                self.available, self.locked, self.frozen
            )));
        }
        let sum = self.available + self.locked + self.frozen;
        if sum != self.total {
            return Err(violation(format!(
                "total {} != available + locked + frozen {}",
                self.total, sum
            )));
        }
        Ok(())
    }
}
