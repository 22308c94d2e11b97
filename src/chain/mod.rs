//! Chain Config Registry
//!
//! Static per-chain parameters (confirmation thresholds, block time, fee
//! schedule, explorer templates) and address format checks.

pub mod address;
pub mod registry;

pub use address::{normalize_address, validate_address};
pub use registry::{ChainConfigError, ChainFamily, ChainParams, ChainRegistry, TokenParams};
