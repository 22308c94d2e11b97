//! Deposit Identifier Allocator
//!
//! `DEP<YYYYMMDD><seq>`: the sequence is a per-day counter incremented and
//! read in one atomic store call, zero-padded to six digits. Days with more
//! than 999999 deposits get wider ids; those do not sort lexically with the
//! padded ones, so listings order by `submitted_at` rather than by id.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use crate::core_types::DepositId;
use crate::store::{FundingStore, StoreResult};

pub const DEPOSIT_ID_PREFIX: &str = "DEP";

pub fn format_deposit_id(date: NaiveDate, seq: u64) -> DepositId {
    format!("{}{}{:06}", DEPOSIT_ID_PREFIX, date.format("%Y%m%d"), seq)
}

#[derive(Clone)]
pub struct DepositIdAllocator {
    store: Arc<dyn FundingStore>,
}

impl DepositIdAllocator {
    pub fn new(store: Arc<dyn FundingStore>) -> Self {
        Self { store }
    }

    /// Next sequence number for `date` (1 for the first deposit of the day)
    pub async fn next_id(&self, date: NaiveDate) -> StoreResult<u64> {
        self.store.next_deposit_seq(date).await
    }

    /// Allocate a full id for the UTC day of `now`
    pub async fn allocate(&self, now: DateTime<Utc>) -> StoreResult<DepositId> {
        let date = now.date_naive();
        let seq = self.next_id(date).await?;
        Ok(format_deposit_id(date, seq))
    }
}
