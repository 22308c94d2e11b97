//! Funding FSM State Definitions
//!
//! State IDs are stored as SMALLINT in PostgreSQL.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Deposit lifecycle: `PENDING -> COMPLETED` only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum DepositStatus {
    /// Seen on chain, waiting for confirmations
    Pending = 0,
    /// Terminal: credited to the ledger
    Completed = 10,
}

impl DepositStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(DepositStatus::Pending),
            10 => Some(DepositStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "PENDING",
            DepositStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Withdrawal FSM States
///
/// ```text
/// PENDING -> VERIFIED -> PROCESSING -> COMPLETED
///    |          |            |
///    +----------+------------+--> CANCELLED
///                            +--> FAILED
/// ```
///
/// Funds stay locked from PENDING until a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WithdrawalStatus {
    /// Created, amount reserved, waiting for the verification code
    Pending = 0,
    /// Code accepted, waiting for the broadcaster
    Verified = 10,
    /// Handed to the broadcaster
    Processing = 20,
    /// Terminal: funds left the platform
    Completed = 30,
    /// Terminal: reservation released
    Cancelled = -10,
    /// Terminal: broadcast failed, reservation released
    Failed = -20,
}

impl WithdrawalStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Cancelled | WithdrawalStatus::Failed
        )
    }

    /// Edges of the withdrawal graph. Whether a PROCESSING withdrawal may
    /// still be cancelled also depends on its broadcast hash, which the
    /// service checks.
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Verified)
                | (Verified, Processing)
                | (Processing, Completed)
                | (Pending | Verified | Processing, Cancelled)
                | (Processing, Failed)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Pending),
            10 => Some(WithdrawalStatus::Verified),
            20 => Some(WithdrawalStatus::Processing),
            30 => Some(WithdrawalStatus::Completed),
            -10 => Some(WithdrawalStatus::Cancelled),
            -20 => Some(WithdrawalStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Verified => "VERIFIED",
            WithdrawalStatus::Processing => "PROCESSING",
            WithdrawalStatus::Completed => "COMPLETED",
            WithdrawalStatus::Cancelled => "CANCELLED",
            WithdrawalStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for WithdrawalStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        WithdrawalStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WithdrawalStatus; 6] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Verified,
        WithdrawalStatus::Processing,
        WithdrawalStatus::Completed,
        WithdrawalStatus::Cancelled,
        WithdrawalStatus::Failed,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(WithdrawalStatus::Completed.is_terminal());
        assert!(WithdrawalStatus::Cancelled.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());

        assert!(!WithdrawalStatus::Pending.is_terminal());
        assert!(!WithdrawalStatus::Verified.is_terminal());
        assert!(!WithdrawalStatus::Processing.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_legal_edges() {
        use WithdrawalStatus::*;
        assert!(Pending.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Verified.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Verified.can_transition_to(Failed));
        assert!(!Verified.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Verified));
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            assert_eq!(WithdrawalStatus::from_id(state.id()), Some(state));
        }
        assert_eq!(WithdrawalStatus::from_id(99), None);
        assert_eq!(
            DepositStatus::from_id(DepositStatus::Completed.id()),
            Some(DepositStatus::Completed)
        );
    }
}
