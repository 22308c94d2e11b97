use rust_decimal::Decimal;
use thiserror::Error;

use crate::balance::LedgerError;
use crate::chain::ChainConfigError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum DepositError {
    /// Benign: the tx hash was already recorded
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Deposit not found: {0}")]
    NotFound(String),

    #[error("Invalid amount: must be positive")]
    InvalidAmount,

    #[error("Invalid {chain} address: {address}")]
    InvalidAddress { chain: String, address: String },

    #[error("Address already registered to another user: {0}")]
    AddressInUse(String),

    #[error(transparent)]
    Chain(#[from] ChainConfigError),

    #[error("Ledger invariant violated: {0}")]
    LedgerInvariantViolation(String),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for DepositError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(key) => DepositError::DuplicateTransaction(key),
            StoreError::NotFound(id) => DepositError::NotFound(id),
            StoreError::Ledger(e @ LedgerError::InvariantViolation { .. }) => {
                DepositError::LedgerInvariantViolation(e.to_string())
            }
            StoreError::Ledger(e) => DepositError::Ledger(e),
            other => DepositError::Storage(other),
        }
    }
}

impl DepositError {
    pub fn code(&self) -> &'static str {
        match self {
            DepositError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            DepositError::NotFound(_) => "DEPOSIT_NOT_FOUND",
            DepositError::InvalidAmount => "INVALID_AMOUNT",
            DepositError::InvalidAddress { .. } => "INVALID_ADDRESS",
            DepositError::AddressInUse(_) => "ADDRESS_IN_USE",
            DepositError::Chain(ChainConfigError::UnknownChain(_)) => "UNKNOWN_CHAIN",
            DepositError::Chain(ChainConfigError::UnsupportedCurrency { .. }) => {
                "UNSUPPORTED_CURRENCY"
            }
            DepositError::Chain(_) => "CHAIN_CONFIG",
            DepositError::LedgerInvariantViolation(_) => "LEDGER_INVARIANT_VIOLATION",
            DepositError::Ledger(_) => "LEDGER_ERROR",
            DepositError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            DepositError::DuplicateTransaction(_) | DepositError::AddressInUse(_) => 409,
            DepositError::NotFound(_) => 404,
            DepositError::InvalidAmount
            | DepositError::InvalidAddress { .. }
            | DepositError::Ledger(_) => 400,
            DepositError::Chain(ChainConfigError::UnknownChain(_))
            | DepositError::Chain(ChainConfigError::UnsupportedCurrency { .. }) => 400,
            DepositError::Chain(_)
            | DepositError::LedgerInvariantViolation(_)
            | DepositError::Storage(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum WithdrawError {
    #[error("Withdrawal not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Chain(#[from] ChainConfigError),

    #[error("Invalid amount: must be positive")]
    InvalidAmount,

    #[error("Amount {amount} is below the minimum withdrawal of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Fee {fee} consumes the whole amount {amount}")]
    FeeExceedsAmount { amount: Decimal, fee: Decimal },

    #[error("Invalid {chain} address: {address}")]
    InvalidAddress { chain: String, address: String },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code expired")]
    ExpiredCode,

    #[error("Verification code already used")]
    CodeAlreadyUsed,

    #[error("Please wait {retry_after_secs}s before requesting a new code")]
    ResendTooSoon { retry_after_secs: i64 },

    #[error("Too many verification codes requested (max {max})")]
    TooManyCodes { max: u32 },

    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalStateTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Withdrawal {0} has already been broadcast")]
    AlreadyBroadcast(String),

    #[error("Broadcast transaction hash is required")]
    MissingTxHash,

    #[error("Ledger invariant violated: {0}")]
    LedgerInvariantViolation(String),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for WithdrawError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => WithdrawError::NotFound(id),
            StoreError::Broadcast(id) => WithdrawError::AlreadyBroadcast(id),
            StoreError::Ledger(LedgerError::InsufficientFunds {
                requested,
                available,
            }) => WithdrawError::InsufficientFunds {
                requested,
                available,
            },
            StoreError::Ledger(e @ LedgerError::InvariantViolation { .. }) => {
                WithdrawError::LedgerInvariantViolation(e.to_string())
            }
            StoreError::Ledger(e) => WithdrawError::Ledger(e),
            StoreError::StateConflict {
                id,
                expected,
                actual,
            } => WithdrawError::IllegalStateTransition {
                id,
                from: actual,
                to: format!("(expected {})", expected),
            },
            other => WithdrawError::Storage(other),
        }
    }
}

impl WithdrawError {
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawError::NotFound(_) => "WITHDRAWAL_NOT_FOUND",
            WithdrawError::Chain(ChainConfigError::UnknownChain(_)) => "UNKNOWN_CHAIN",
            WithdrawError::Chain(ChainConfigError::UnsupportedCurrency { .. }) => {
                "UNSUPPORTED_CURRENCY"
            }
            WithdrawError::Chain(_) => "CHAIN_CONFIG",
            WithdrawError::InvalidAmount => "INVALID_AMOUNT",
            WithdrawError::BelowMinimum { .. } => "BELOW_MINIMUM",
            WithdrawError::FeeExceedsAmount { .. } => "FEE_EXCEEDS_AMOUNT",
            WithdrawError::InvalidAddress { .. } => "INVALID_ADDRESS",
            WithdrawError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WithdrawError::InvalidCode => "INVALID_CODE",
            WithdrawError::ExpiredCode => "EXPIRED_CODE",
            WithdrawError::CodeAlreadyUsed => "CODE_ALREADY_USED",
            WithdrawError::ResendTooSoon { .. } => "RESEND_TOO_SOON",
            WithdrawError::TooManyCodes { .. } => "TOO_MANY_CODES",
            WithdrawError::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            WithdrawError::AlreadyBroadcast(_) => "ALREADY_BROADCAST",
            WithdrawError::MissingTxHash => "MISSING_TX_HASH",
            WithdrawError::LedgerInvariantViolation(_) => "LEDGER_INVARIANT_VIOLATION",
            WithdrawError::Ledger(_) => "LEDGER_ERROR",
            WithdrawError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawError::NotFound(_) => 404,
            WithdrawError::Chain(ChainConfigError::UnknownChain(_))
            | WithdrawError::Chain(ChainConfigError::UnsupportedCurrency { .. })
            | WithdrawError::InvalidAmount
            | WithdrawError::BelowMinimum { .. }
            | WithdrawError::FeeExceedsAmount { .. }
            | WithdrawError::InvalidAddress { .. }
            | WithdrawError::InsufficientFunds { .. }
            | WithdrawError::InvalidCode
            | WithdrawError::ExpiredCode
            | WithdrawError::CodeAlreadyUsed
            | WithdrawError::MissingTxHash
            | WithdrawError::Ledger(_) => 400,
            WithdrawError::ResendTooSoon { .. } | WithdrawError::TooManyCodes { .. } => 429,
            WithdrawError::IllegalStateTransition { .. } | WithdrawError::AlreadyBroadcast(_) => {
                409
            }
            WithdrawError::Chain(_)
            | WithdrawError::LedgerInvariantViolation(_)
            | WithdrawError::Storage(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_domain_errors() {
        let dup: DepositError = StoreError::Duplicate("0xaa".into()).into();
        assert!(matches!(dup, DepositError::DuplicateTransaction(_)));
        assert_eq!(dup.http_status(), 409);

        let insufficient: WithdrawError = StoreError::Ledger(LedgerError::InsufficientFunds {
            requested: Decimal::from(51),
            available: Decimal::from(50),
        })
        .into();
        assert_eq!(insufficient.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(insufficient.http_status(), 400);

        let conflict: WithdrawError = StoreError::StateConflict {
            id: "w1".into(),
            expected: "VERIFIED".into(),
            actual: "CANCELLED".into(),
        }
        .into();
        assert_eq!(conflict.code(), "ILLEGAL_STATE_TRANSITION");

        let broadcast: WithdrawError = StoreError::Broadcast("w1".into()).into();
        assert!(matches!(broadcast, WithdrawError::AlreadyBroadcast(_)));
        assert_eq!(broadcast.http_status(), 409);
    }

    #[test]
    fn test_deposit_id_collision_is_not_a_duplicate() {
        let collision: DepositError = StoreError::IdCollision("DEP-20261019-000001".into()).into();
        assert!(matches!(collision, DepositError::Storage(StoreError::IdCollision(_))));
        assert_eq!(collision.code(), "STORAGE_ERROR");
        assert_eq!(collision.http_status(), 500);
    }

    #[test]
    fn test_code_errors_are_distinct() {
        let codes = [
            WithdrawError::InvalidCode.code(),
            WithdrawError::ExpiredCode.code(),
            WithdrawError::CodeAlreadyUsed.code(),
        ];
        assert_ne!(codes[0], codes[1]);
        assert_ne!(codes[1], codes[2]);
        assert_ne!(codes[0], codes[2]);
    }
}
