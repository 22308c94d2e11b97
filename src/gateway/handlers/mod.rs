//! HTTP handlers
//!
//! - [`health`]: liveness + store probe
//! - [`chains`]: public chain registry
//! - [`account`]: balances and deposit addresses (JWT)
//! - [`deposit`]: deposit queries (JWT)
//! - [`withdraw`]: withdrawal lifecycle (JWT)
//! - [`internal`]: scheduler trigger and admin actions (internal secret)

pub mod account;
pub mod chains;
pub mod deposit;
pub mod health;
pub mod internal;
pub mod withdraw;

// Glob re-exports carry the `__path_*` items generated by `#[utoipa::path]`
pub use account::*;
pub use chains::*;
pub use deposit::*;
pub use health::*;
pub use internal::*;
pub use withdraw::*;
