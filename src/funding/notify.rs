//! Notification outbox relay
//!
//! Events are written by the store inside the transaction that commits the
//! fact they report. The relay delivers them afterwards; a failed delivery
//! stays in the outbox with its attempt counter bumped and is retried on a
//! later drain, after events with fewer attempts.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{EventKind, OutboxEvent};
use crate::store::{FundingStore, StoreError};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Downstream collaborator informed of committed funding events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log. Verification codes are never logged in clear.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), NotifyError> {
        if event.kind == EventKind::VerificationCode {
            info!(
                target: "notify",
                event_id = event.id,
                user_id = event.user_id,
                withdrawal_id = %event.payload["withdrawal_id"],
                "Verification code issued"
            );
        } else {
            info!(
                target: "notify",
                event_id = event.id,
                kind = %event.kind.as_str(),
                user_id = event.user_id,
                payload = %event.payload,
                "Funding event"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct OutboxRelay {
    store: Arc<dyn FundingStore>,
    notifier: Arc<dyn Notifier>,
    batch: usize,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn FundingStore>, notifier: Arc<dyn Notifier>, batch: usize) -> Self {
        Self {
            store,
            notifier,
            batch: batch.max(1),
        }
    }

    /// Deliver one batch of pending events in commit order
    pub async fn drain(&self) -> Result<RelayReport, StoreError> {
        let events = self.store.undelivered_events(self.batch).await?;
        let mut report = RelayReport::default();
        for event in &events {
            match self.notifier.deliver(event).await {
                Ok(()) => {
                    self.store.mark_event_delivered(event.id, Utc::now()).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = event.id,
                        kind = %event.kind.as_str(),
                        attempts = event.attempts + 1,
                        error = %e,
                        "Outbox delivery failed"
                    );
                    self.store.record_event_failure(event.id, &e.to_string()).await?;
                    report.failed += 1;
                }
            }
        }
        if !events.is_empty() {
            debug!(delivered = report.delivered, failed = report.failed, "Outbox drained");
        }
        Ok(report)
    }
}
