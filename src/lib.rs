//! chain_funding - Deposits, Balances and Withdrawals for a Multi-Chain Exchange
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers and balance keys
//! - [`chain`] - Chain registry (confirmations, tokens, fees, addresses)
//! - [`balance`] - Enforced balance type and ledger operations
//! - [`ledger`] - Balance ledger over the store
//! - [`store`] - `FundingStore` trait, PostgreSQL and in-memory backends
//! - [`funding`] - Deposit reconciler, withdrawal state machine, outbox relay
//! - [`sentinel`] - Chain scanners and the per-chain scan worker
//! - [`price`] - USD price oracle for fee reporting
//! - [`scheduler`] - Periodic jobs (scan cycles, expiry sweep, outbox)
//! - [`gateway`] - HTTP API

// Core types - must be first!
pub mod core_types;

pub mod chain;
pub mod config;
pub mod db;
pub mod fee;
pub mod logging;

// Funding components
pub mod balance;
pub mod funding;
pub mod ledger;
pub mod price;
pub mod scheduler;
pub mod sentinel;
pub mod store;

pub mod gateway;

// Convenient re-exports at crate root
pub use balance::{LedgerOp, UserBalance};
pub use chain::{ChainParams, ChainRegistry};
pub use core_types::{BalanceKey, DepositId, UserId, WithdrawalId};
pub use funding::{DepositReconciler, OutboxRelay, WithdrawService};
pub use ledger::BalanceLedger;
pub use scheduler::FundingJobs;
pub use sentinel::SentinelWorker;
pub use store::{FundingStore, MemoryStore, PgStore, StoreError};
