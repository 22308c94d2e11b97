use thiserror::Error;

use crate::chain::ChainConfigError;
use crate::store::StoreError;

/// Chain query failure. Collected into scan reports, never fatal to siblings.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Node is stale: tip is {lag_secs}s old (max {max_secs}s)")]
    NodeStale { lag_secs: i64, max_secs: i64 },

    #[error("No scanner configured for chain {0}")]
    NoScanner(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Chain(#[from] ChainConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<reqwest::Error> for ScannerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ScannerError::Timeout
        } else {
            ScannerError::RpcConnection(e.to_string())
        }
    }
}
