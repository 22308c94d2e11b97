//! Funding: deposits, withdrawals and the notification outbox
//!
//! - [`deposit`] - Deposit Reconciler (candidates, confirmations, crediting)
//! - [`withdraw`] - Withdrawal Settlement State Machine
//! - [`deposit_id`] - per-day `DEP<YYYYMMDD><seq>` identifiers
//! - [`notify`] - outbox relay to the notifier

pub mod deposit;
pub mod deposit_id;
pub mod error;
pub mod notify;
pub mod state;
pub mod types;
pub mod withdraw;

pub use deposit::{DepositCandidate, DepositReconciler, DepositView, ManualDeposit};
pub use error::{DepositError, WithdrawError};
pub use notify::{LogNotifier, Notifier, OutboxRelay, RelayReport};
pub use state::{DepositStatus, WithdrawalStatus};
pub use types::{Deposit, DepositAddress, DepositSource, Withdrawal};
pub use withdraw::{CreatedWithdrawal, WithdrawService, WithdrawalRequest, WithdrawalView};
