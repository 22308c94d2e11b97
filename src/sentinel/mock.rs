//! In-process scanner for tests and local development
//!
//! The chain is a tip height plus a list of transfers; tests move the tip
//! and inject per-address failures.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use super::error::ScannerError;
use super::scanner::{ChainScanner, DetectedTransfer, NodeHealth};

#[derive(Debug, Default)]
struct MockChain {
    tip: u64,
    /// `None` tracks the wall clock
    tip_time: Option<i64>,
    transfers: Vec<DetectedTransfer>,
    failing: HashSet<String>,
    down: bool,
}

pub struct MockScanner {
    chain: String,
    state: Mutex<MockChain>,
}

impl MockScanner {
    pub fn new(chain: &str, tip: u64) -> Self {
        Self {
            chain: chain.to_string(),
            state: Mutex::new(MockChain {
                tip,
                ..Default::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockChain) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn set_tip(&self, tip: u64) {
        self.with_state(|s| s.tip = tip);
    }

    pub fn tip(&self) -> u64 {
        self.with_state(|s| s.tip)
    }

    pub fn set_tip_time(&self, unix_secs: i64) {
        self.with_state(|s| s.tip_time = Some(unix_secs));
    }

    pub fn push_transfer(&self, transfer: DetectedTransfer) {
        self.with_state(|s| s.transfers.push(transfer));
    }

    /// Make queries for `address` fail until cleared
    pub fn fail_address(&self, address: &str, failing: bool) {
        let address = address.to_lowercase();
        self.with_state(|s| {
            if failing {
                s.failing.insert(address);
            } else {
                s.failing.remove(&address);
            }
        });
    }

    /// Make every query fail
    pub fn set_down(&self, down: bool) {
        self.with_state(|s| s.down = down);
    }

    fn check_up(&self) -> Result<(), ScannerError> {
        if self.with_state(|s| s.down) {
            return Err(ScannerError::RpcConnection(format!("{} node unreachable", self.chain)));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainScanner for MockScanner {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn health_check(&self) -> Result<NodeHealth, ScannerError> {
        self.check_up()?;
        Ok(self.with_state(|s| NodeHealth {
            block_height: s.tip,
            block_time: s.tip_time.unwrap_or_else(|| Utc::now().timestamp()),
        }))
    }

    async fn get_latest_height(&self) -> Result<u64, ScannerError> {
        self.check_up()?;
        Ok(self.tip())
    }

    async fn transfers_to(
        &self,
        address: &str,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<DetectedTransfer>, ScannerError> {
        self.check_up()?;
        let address = address.to_lowercase();
        self.with_state(|s| {
            if s.failing.contains(&address) {
                return Err(ScannerError::RpcConnection(format!(
                    "timeout querying {}",
                    address
                )));
            }
            Ok(s.transfers
                .iter()
                .filter(|t| {
                    t.to_address.eq_ignore_ascii_case(&address)
                        && blocks.contains(&t.block_number)
                        && t.block_number <= s.tip
                })
                .cloned()
                .collect())
        })
    }

    async fn inclusion_height(&self, tx_hash: &str) -> Result<Option<u64>, ScannerError> {
        self.check_up()?;
        Ok(self.with_state(|s| {
            s.transfers
                .iter()
                .find(|t| t.tx_hash.eq_ignore_ascii_case(tx_hash))
                .map(|t| t.block_number)
                .filter(|h| *h <= s.tip)
        }))
    }
}
