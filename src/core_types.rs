//! Core types used throughout the system
//!
//! Identifiers and keys shared by the ledger, the reconciler and the
//! withdrawal state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User ID - assigned by the account system, immutable after assignment.
///
/// Stored as BIGINT in PostgreSQL, hence signed.
pub type UserId = i64;

/// Human-readable deposit identifier, e.g. `DEP20261019000042`.
pub type DepositId = String;

/// Withdrawal identifier (UUID v4, hyphenated).
pub type WithdrawalId = String;

/// Key of a single ledger row.
///
/// Currency and chain are kept upper/lower-cased respectively so that
/// `USDT@ethereum` and `usdt@Ethereum` address the same balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub user_id: UserId,
    pub currency: String,
    pub chain: String,
}

impl BalanceKey {
    pub fn new(user_id: UserId, currency: &str, chain: &str) -> Self {
        Self {
            user_id,
            currency: currency.to_uppercase(),
            chain: chain.to_lowercase(),
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.user_id, self.currency, self.chain)
    }
}

/// Normalize a transaction hash for idempotency comparisons.
///
/// EVM hashes arrive in mixed case from explorers and wallets; UTXO txids are
/// already lowercase hex. Both are compared lowercase.
pub fn normalize_tx_hash(tx_hash: &str) -> String {
    tx_hash.trim().to_lowercase()
}

/// Compare two secrets without short-circuiting on the first differing
/// byte. A length mismatch returns early, so only the content of
/// equal-length inputs is protected from timing.
pub fn secrets_match(expected: &str, given: &str) -> bool {
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
