use async_trait::async_trait;
use rust_decimal::Decimal;
use std::ops::RangeInclusive;

use super::error::ScannerError;

/// Uniform interface over chain families.
///
/// Implementations only read chain data; they never touch the ledger.
#[async_trait]
pub trait ChainScanner: Send + Sync {
    /// Registry slug of the chain served
    fn chain(&self) -> &str;

    /// Tip height and timestamp
    async fn health_check(&self) -> Result<NodeHealth, ScannerError>;

    async fn get_latest_height(&self) -> Result<u64, ScannerError>;

    /// Confirmed transfers into `address` included within `blocks`
    async fn transfers_to(
        &self,
        address: &str,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<DetectedTransfer>, ScannerError>;

    /// Block height that includes `tx_hash`; `None` while unconfirmed or
    /// unknown to the node
    async fn inclusion_height(&self, tx_hash: &str) -> Result<Option<u64>, ScannerError>;
}

/// Incoming transfer to a watched address
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTransfer {
    pub tx_hash: String,
    pub to_address: String,
    pub from_address: Option<String>,
    pub currency: String,
    pub amount: Decimal,
    pub block_number: u64,
}

/// Node tip as seen by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHealth {
    pub block_height: u64,
    /// Unix seconds of the tip block
    pub block_time: i64,
}

impl NodeHealth {
    pub fn lag_secs(&self, now: i64) -> i64 {
        now - self.block_time
    }
}

/// Depth of a transaction: the including block counts as the first
/// confirmation
pub fn confirmations_at(tip: u64, inclusion: u64) -> u32 {
    if inclusion > tip {
        return 0;
    }
    u32::try_from(tip - inclusion + 1).unwrap_or(u32::MAX)
}

/// Scale an integer base-unit amount (wei, satoshi) to token units
pub fn from_base_units(raw: u128, decimals: u32) -> Result<Decimal, ScannerError> {
    let raw = i128::try_from(raw)
        .map_err(|_| ScannerError::Parse(format!("amount {} overflows", raw)))?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .map(|d| d.normalize())
        .map_err(|e| {
            ScannerError::Parse(format!("amount {} with {} decimals: {}", raw, decimals, e))
        })
}
