//! Withdrawal Settlement State Machine
//!
//! ```text
//! create ─► PENDING ─verify─► VERIFIED ─process─► PROCESSING ─complete─► COMPLETED
//!              │                  │                  │  (settle)
//!              └──── cancel ──────┴──── cancel ──────┤  (release, only before broadcast)
//!                                                    └─ fail ─► FAILED (release)
//! ```
//!
//! The requested `amount` is reserved at creation and stays locked until a
//! terminal state. `net_amount = amount - fee` is what the broadcaster sends.
//! Every transition is a CAS from the state read by the service; a lost race
//! surfaces as `IllegalStateTransition` with nothing written.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::WithdrawError;
use super::state::WithdrawalStatus;
use super::types::{EventKind, VerificationCode, Withdrawal, WithdrawalTransition};
use crate::balance::LedgerOp;
use crate::chain::ChainRegistry;
use crate::config::WithdrawalConfig;
use crate::core_types::{UserId, normalize_tx_hash, secrets_match};
use crate::fee::fee_breakdown;
use crate::price::PriceOracle;
use crate::store::{FundingStore, StoreError};

pub const VERIFICATION_TIMEOUT_REASON: &str = "verification timeout";

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub currency: String,
    pub chain: String,
    pub amount: Decimal,
    pub to_address: String,
    pub memo: Option<String>,
}

/// Create response: id plus fee breakdown
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedWithdrawal {
    pub withdrawal_id: String,
    pub status: WithdrawalStatus,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub fee_usd: Option<Decimal>,
    pub code_expires_at: DateTime<Utc>,
}

/// Withdrawal as returned to API callers
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WithdrawalView {
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
    pub explorer_url: Option<String>,
}

pub struct WithdrawService {
    store: Arc<dyn FundingStore>,
    registry: Arc<ChainRegistry>,
    prices: Arc<dyn PriceOracle>,
    policy: WithdrawalConfig,
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

impl WithdrawService {
    pub fn new(
        store: Arc<dyn FundingStore>,
        registry: Arc<ChainRegistry>,
        prices: Arc<dyn PriceOracle>,
        policy: WithdrawalConfig,
    ) -> Self {
        Self {
            store,
            registry,
            prices,
            policy,
        }
    }

    fn new_code(
        &self,
        withdrawal_id: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> VerificationCode {
        VerificationCode {
            code_id: Uuid::new_v4().to_string(),
            withdrawal_id: withdrawal_id.to_string(),
            user_id,
            code: generate_code(),
            created_at: now,
            expires_at: now + Duration::seconds(self.policy.code_ttl_secs),
            used: false,
            invalidated: false,
        }
    }

    /// Validate, fee, reserve `amount`, persist PENDING and issue the first
    /// code. Nothing is written when any check fails.
    pub async fn create_withdrawal_request(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<CreatedWithdrawal, WithdrawError> {
        let (chain, token) = self.registry.token(&request.chain, &request.currency)?;
        if request.amount <= Decimal::ZERO {
            return Err(WithdrawError::InvalidAmount);
        }
        if request.amount < token.min_withdrawal {
            return Err(WithdrawError::BelowMinimum {
                amount: request.amount,
                minimum: token.min_withdrawal,
            });
        }
        if !chain.validate_address(request.to_address.trim()) {
            return Err(WithdrawError::InvalidAddress {
                chain: chain.slug.clone(),
                address: request.to_address.clone(),
            });
        }
        let breakdown = fee_breakdown(&token.withdrawal_fee, request.amount, token.decimals)
            .ok_or_else(|| WithdrawError::FeeExceedsAmount {
                amount: request.amount,
                fee: token.withdrawal_fee.fee_for(request.amount, token.decimals),
            })?;

        let now = Utc::now();
        let withdrawal_id = Uuid::new_v4().to_string();
        let code = self.new_code(&withdrawal_id, request.user_id, now);
        let withdrawal = Withdrawal {
            withdrawal_id: withdrawal_id.clone(),
            user_id: request.user_id,
            currency: token.symbol.clone(),
            chain: chain.slug.clone(),
            amount: breakdown.amount,
            fee: breakdown.fee,
            net_amount: breakdown.net_amount,
            to_address: chain.normalize_address(&request.to_address),
            memo: request.memo.clone().filter(|m| !m.trim().is_empty()),
            status: WithdrawalStatus::Pending,
            email_verified: false,
            code_expires_at: Some(code.expires_at),
            tx_hash: None,
            confirmations: 0,
            reason: None,
            created_at: now,
            verified_at: None,
            processing_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
        };

        let balance = self
            .store
            .create_withdrawal(&withdrawal, &code)
            .await
            .map_err(|e| self.log_store_error(&withdrawal_id, e))?;

        info!(
            withdrawal_id = %withdrawal_id,
            user_id = request.user_id,
            chain = %withdrawal.chain,
            currency = %withdrawal.currency,
            amount = %withdrawal.amount,
            fee = %withdrawal.fee,
            available = %balance.available(),
            locked = %balance.locked(),
            "Withdrawal requested"
        );

        Ok(CreatedWithdrawal {
            withdrawal_id,
            status: withdrawal.status,
            amount: withdrawal.amount,
            fee: withdrawal.fee,
            net_amount: withdrawal.net_amount,
            fee_usd: self.prices.usd_value(&withdrawal.currency, withdrawal.fee),
            code_expires_at: code.expires_at,
        })
    }

    /// PENDING -> VERIFIED. Mismatch, reuse and expiry are reported
    /// separately.
    pub async fn verify_code(
        &self,
        withdrawal_id: &str,
        code: &str,
        user_id: UserId,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load_owned(withdrawal_id, user_id).await?;
        let codes = self.store.codes_for_withdrawal(withdrawal_id).await?;
        let given = code.trim();
        let matched = codes
            .iter()
            .rev()
            .find(|c| secrets_match(&c.code, given))
            .ok_or(WithdrawError::InvalidCode)?;

        if matched.used {
            return Err(WithdrawError::CodeAlreadyUsed);
        }
        if matched.invalidated {
            // Superseded by a resend
            return Err(WithdrawError::InvalidCode);
        }
        let now = Utc::now();
        if matched.is_expired(now) {
            return Err(WithdrawError::ExpiredCode);
        }

        let mut transition = WithdrawalTransition::to(WithdrawalStatus::Verified, now);
        transition.consume_code = Some(matched.code_id.clone());
        self.transition(&withdrawal, transition).await
    }

    /// Invalidate earlier codes and issue a new one with a fresh TTL.
    ///
    /// Rate limit: one code per `resend_cooldown_secs`, at most `max_codes`
    /// per withdrawal.
    pub async fn resend_code(
        &self,
        withdrawal_id: &str,
        user_id: UserId,
    ) -> Result<DateTime<Utc>, WithdrawError> {
        let withdrawal = self.load_owned(withdrawal_id, user_id).await?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(self.illegal(&withdrawal, WithdrawalStatus::Pending));
        }

        let codes = self.store.codes_for_withdrawal(withdrawal_id).await?;
        if codes.len() >= self.policy.max_codes as usize {
            warn!(withdrawal_id = %withdrawal_id, "Verification code limit reached");
            return Err(WithdrawError::TooManyCodes {
                max: self.policy.max_codes,
            });
        }
        let now = Utc::now();
        if let Some(last) = codes.last() {
            let elapsed = (now - last.created_at).num_seconds();
            if elapsed < self.policy.resend_cooldown_secs {
                return Err(WithdrawError::ResendTooSoon {
                    retry_after_secs: self.policy.resend_cooldown_secs - elapsed,
                });
            }
        }

        let code = self.new_code(withdrawal_id, user_id, now);
        self.store
            .replace_code(&code)
            .await
            .map_err(|e| self.log_store_error(withdrawal_id, e))?;
        info!(
            withdrawal_id = %withdrawal_id,
            issued = codes.len() + 1,
            "Verification code reissued"
        );
        Ok(code.expires_at)
    }

    /// VERIFIED -> PROCESSING, recording the broadcast hash when known
    pub async fn process(
        &self,
        withdrawal_id: &str,
        tx_hash: Option<&str>,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load(withdrawal_id).await?;
        let mut transition = WithdrawalTransition::to(WithdrawalStatus::Processing, Utc::now());
        transition.tx_hash = tx_hash
            .map(normalize_tx_hash)
            .filter(|h| !h.is_empty());
        self.transition(&withdrawal, transition).await
    }

    /// Attach the broadcast hash to a PROCESSING withdrawal that was
    /// processed without one. Repeating the recorded hash is a no-op; a
    /// different hash is rejected. From here on cancel is refused.
    pub async fn record_broadcast(
        &self,
        withdrawal_id: &str,
        tx_hash: &str,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load(withdrawal_id).await?;
        if withdrawal.status != WithdrawalStatus::Processing {
            return Err(self.illegal(&withdrawal, WithdrawalStatus::Processing));
        }
        let tx_hash = normalize_tx_hash(tx_hash);
        if tx_hash.is_empty() {
            return Err(WithdrawError::MissingTxHash);
        }
        if withdrawal.tx_hash.as_deref() == Some(tx_hash.as_str()) {
            return Ok(withdrawal);
        }
        let at = withdrawal.processing_at.unwrap_or_else(Utc::now);
        let mut transition = WithdrawalTransition::to(WithdrawalStatus::Processing, at);
        transition.tx_hash = Some(tx_hash);
        self.commit(&withdrawal, transition).await
    }

    /// PROCESSING -> COMPLETED; the reservation leaves the ledger
    pub async fn complete(
        &self,
        withdrawal_id: &str,
        confirmations: Option<u32>,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load(withdrawal_id).await?;
        let mut transition = WithdrawalTransition::to(WithdrawalStatus::Completed, Utc::now())
            .with_ledger(LedgerOp::Settle(withdrawal.amount))
            .with_event(EventKind::WithdrawalCompleted);
        transition.confirmations = confirmations;
        self.transition(&withdrawal, transition).await
    }

    /// User cancellation; legal until broadcast has started
    pub async fn cancel(
        &self,
        withdrawal_id: &str,
        user_id: UserId,
        reason: &str,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load_owned(withdrawal_id, user_id).await?;
        self.cancel_loaded(&withdrawal, reason).await
    }

    /// PROCESSING -> FAILED; the reservation returns to available
    pub async fn fail(
        &self,
        withdrawal_id: &str,
        reason: &str,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load(withdrawal_id).await?;
        let transition = WithdrawalTransition::to(WithdrawalStatus::Failed, Utc::now())
            .with_ledger(LedgerOp::Release(withdrawal.amount))
            .with_event(EventKind::WithdrawalFailed)
            .with_reason(reason);
        self.transition(&withdrawal, transition).await
    }

    /// Cancel PENDING withdrawals whose code expired before `now`. Returns
    /// the number cancelled.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, WithdrawError> {
        let stale = self.store.expired_pending_withdrawals(now).await?;
        let mut cancelled = 0;
        for withdrawal in stale {
            match self
                .cancel_loaded(&withdrawal, VERIFICATION_TIMEOUT_REASON)
                .await
            {
                Ok(_) => cancelled += 1,
                Err(WithdrawError::IllegalStateTransition { .. }) => {
                    debug!(withdrawal_id = %withdrawal.withdrawal_id, "Stale withdrawal moved on");
                }
                Err(e) => return Err(e),
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Expired withdrawals cancelled");
        }
        Ok(cancelled)
    }

    pub async fn get(
        &self,
        withdrawal_id: &str,
        user_id: UserId,
    ) -> Result<WithdrawalView, WithdrawError> {
        let withdrawal = self.load_owned(withdrawal_id, user_id).await?;
        Ok(self.view(withdrawal))
    }

    pub async fn history(&self, user_id: UserId) -> Result<Vec<WithdrawalView>, WithdrawError> {
        let rows = self
            .store
            .withdrawals_for_user(user_id, self.policy.history_limit)
            .await?;
        Ok(rows.into_iter().map(|w| self.view(w)).collect())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn cancel_loaded(
        &self,
        withdrawal: &Withdrawal,
        reason: &str,
    ) -> Result<Withdrawal, WithdrawError> {
        if withdrawal.is_broadcast() {
            warn!(
                withdrawal_id = %withdrawal.withdrawal_id,
                "Cancel rejected: broadcast already started"
            );
            return Err(WithdrawError::AlreadyBroadcast(
                withdrawal.withdrawal_id.clone(),
            ));
        }
        let transition = WithdrawalTransition::to(WithdrawalStatus::Cancelled, Utc::now())
            .with_ledger(LedgerOp::Release(withdrawal.amount))
            .with_event(EventKind::WithdrawalCancelled)
            .with_reason(reason);
        self.transition(withdrawal, transition).await
    }

    async fn load(&self, withdrawal_id: &str) -> Result<Withdrawal, WithdrawError> {
        self.store
            .withdrawal(withdrawal_id)
            .await?
            .ok_or_else(|| WithdrawError::NotFound(withdrawal_id.to_string()))
    }

    /// Another user's withdrawal is reported as not found
    async fn load_owned(
        &self,
        withdrawal_id: &str,
        user_id: UserId,
    ) -> Result<Withdrawal, WithdrawError> {
        let withdrawal = self.load(withdrawal_id).await?;
        if withdrawal.user_id != user_id {
            return Err(WithdrawError::NotFound(withdrawal_id.to_string()));
        }
        Ok(withdrawal)
    }

    fn illegal(&self, withdrawal: &Withdrawal, to: WithdrawalStatus) -> WithdrawError {
        error!(
            withdrawal_id = %withdrawal.withdrawal_id,
            from = %withdrawal.status,
            to = %to,
            "Illegal withdrawal transition rejected"
        );
        WithdrawError::IllegalStateTransition {
            id: withdrawal.withdrawal_id.clone(),
            from: withdrawal.status.to_string(),
            to: to.to_string(),
        }
    }

    async fn transition(
        &self,
        withdrawal: &Withdrawal,
        transition: WithdrawalTransition,
    ) -> Result<Withdrawal, WithdrawError> {
        if !withdrawal.status.can_transition_to(transition.next) {
            return Err(self.illegal(withdrawal, transition.next));
        }
        self.commit(withdrawal, transition).await
    }

    /// CAS from `withdrawal.status`; legality is checked by the caller
    async fn commit(
        &self,
        withdrawal: &Withdrawal,
        transition: WithdrawalTransition,
    ) -> Result<Withdrawal, WithdrawError> {
        match self
            .store
            .transition_withdrawal(&withdrawal.withdrawal_id, withdrawal.status, &transition)
            .await
        {
            Ok(updated) => {
                info!(
                    withdrawal_id = %updated.withdrawal_id,
                    from = %withdrawal.status,
                    to = %updated.status,
                    "Withdrawal transitioned"
                );
                Ok(updated)
            }
            Err(StoreError::StateConflict { id, actual, .. }) if id != withdrawal.withdrawal_id => {
                debug!(code_id = %id, state = %actual, "Verification code consumed concurrently");
                Err(WithdrawError::CodeAlreadyUsed)
            }
            Err(StoreError::StateConflict { actual, .. }) => {
                error!(
                    withdrawal_id = %withdrawal.withdrawal_id,
                    expected = %withdrawal.status,
                    actual = %actual,
                    to = %transition.next,
                    "Illegal withdrawal transition rejected (concurrent update)"
                );
                Err(WithdrawError::IllegalStateTransition {
                    id: withdrawal.withdrawal_id.clone(),
                    from: actual,
                    to: transition.next.to_string(),
                })
            }
            Err(e) => Err(self.log_store_error(&withdrawal.withdrawal_id, e)),
        }
    }

    fn log_store_error(&self, withdrawal_id: &str, e: StoreError) -> WithdrawError {
        let e = WithdrawError::from(e);
        if matches!(e, WithdrawError::LedgerInvariantViolation(_)) {
            error!(withdrawal_id = %withdrawal_id, error = %e, "Withdrawal aborted");
        }
        e
    }

    fn view(&self, withdrawal: Withdrawal) -> WithdrawalView {
        let explorer_url = match (&withdrawal.tx_hash, self.registry.get(&withdrawal.chain)) {
            (Some(hash), Ok(chain)) => Some(chain.explorer_tx_url(hash)),
            _ => None,
        };
        WithdrawalView {
            withdrawal,
            explorer_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceConfig;
    use crate::core_types::BalanceKey;
    use crate::price::ReferencePriceOracle;
    use crate::store::MemoryStore;

    const TO: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn d(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn key() -> BalanceKey {
        BalanceKey::new(1, "USDT", "ethereum")
    }

    async fn setup(funds: i64) -> (Arc<MemoryStore>, WithdrawService) {
        setup_with(funds, WithdrawalConfig::default()).await
    }

    async fn setup_with(
        funds: i64,
        policy: WithdrawalConfig,
    ) -> (Arc<MemoryStore>, WithdrawService) {
        let store = Arc::new(MemoryStore::new());
        if funds > 0 {
            store
                .apply_ledger_op(&key(), LedgerOp::Credit(d(funds)))
                .await
                .unwrap();
        }
        let service = WithdrawService::new(
            store.clone(),
            Arc::new(ChainRegistry::builtin().unwrap()),
            Arc::new(ReferencePriceOracle::new(&PriceConfig::default())),
            policy,
        );
        (store, service)
    }

    fn request(amount: i64) -> WithdrawalRequest {
        WithdrawalRequest {
            user_id: 1,
            currency: "USDT".into(),
            chain: "ethereum".into(),
            amount: d(amount),
            to_address: TO.into(),
            memo: None,
        }
    }

    async fn latest_code(store: &MemoryStore, id: &str) -> String {
        store.latest_code(id).await.unwrap().unwrap().code
    }

    #[tokio::test]
    async fn test_create_reserves_full_amount() {
        let (store, service) = setup(100).await;
        let created = service.create_withdrawal_request(&request(50)).await.unwrap();
        assert_eq!(created.fee, d(1));
        assert_eq!(created.net_amount, d(49));
        assert!(created.fee_usd.is_some());

        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.available(), d(50));
        assert_eq!(bal.locked(), d(50));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (_, service) = setup(100).await;
        assert!(matches!(
            service.create_withdrawal_request(&request(5)).await,
            Err(WithdrawError::BelowMinimum { .. })
        ));
        let mut bad = request(20);
        bad.to_address = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into();
        assert!(matches!(
            service.create_withdrawal_request(&bad).await,
            Err(WithdrawError::InvalidAddress { .. })
        ));
        assert!(matches!(
            service.create_withdrawal_request(&request(101)).await,
            Err(WithdrawError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_happy_path_settles() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;

        let w = service.verify_code(&id, &code, 1).await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Verified);
        assert!(w.email_verified);

        service.process(&id, Some("0xBEEF")).await.unwrap();
        let w = service.complete(&id, Some(12)).await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Completed);
        assert_eq!(w.tx_hash.as_deref(), Some("0xbeef"));
        assert_eq!(w.confirmations, 12);
        assert!(w.completed_at.is_some());

        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.available(), d(60));
        assert_eq!(bal.locked(), Decimal::ZERO);
        assert_eq!(bal.total(), d(60));
    }

    #[tokio::test]
    async fn test_code_errors_are_distinct() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        assert!(matches!(
            service.verify_code(&id, wrong, 1).await,
            Err(WithdrawError::InvalidCode)
        ));
        service.verify_code(&id, &code, 1).await.unwrap();
        assert!(matches!(
            service.verify_code(&id, &code, 1).await,
            Err(WithdrawError::CodeAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_other_user_cannot_see_or_verify() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        assert!(matches!(
            service.verify_code(&id, &code, 2).await,
            Err(WithdrawError::NotFound(_))
        ));
        assert!(matches!(
            service.cancel(&id, 2, "nope").await,
            Err(WithdrawError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resend_cooldown() {
        let (_, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        assert!(matches!(
            service.resend_code(&id, 1).await,
            Err(WithdrawError::ResendTooSoon { .. })
        ));
    }

    #[tokio::test]
    async fn test_resend_supersedes_previous_code() {
        let policy = WithdrawalConfig {
            resend_cooldown_secs: 0,
            ..Default::default()
        };
        let (store, service) = setup_with(100, policy).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let old = latest_code(&store, &id).await;
        service.resend_code(&id, 1).await.unwrap();
        let new = latest_code(&store, &id).await;

        if old != new {
            assert!(matches!(
                service.verify_code(&id, &old, 1).await,
                Err(WithdrawError::InvalidCode)
            ));
        }
        let w = service.verify_code(&id, &new, 1).await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Verified);
    }

    #[tokio::test]
    async fn test_resend_stops_at_code_limit() {
        let policy = WithdrawalConfig {
            resend_cooldown_secs: 0,
            max_codes: 3,
            ..Default::default()
        };
        let (store, service) = setup_with(100, policy).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        service.resend_code(&id, 1).await.unwrap();
        service.resend_code(&id, 1).await.unwrap();
        assert!(matches!(
            service.resend_code(&id, 1).await,
            Err(WithdrawError::TooManyCodes { max: 3 })
        ));
        assert_eq!(store.codes_for_withdrawal(&id).await.unwrap().len(), 3);

        // The last issued code still works
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_releases_and_complete_after_fail_rejected() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
        service.process(&id, None).await.unwrap();
        let w = service.fail(&id, "node rejected").await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Failed);
        assert_eq!(w.reason.as_deref(), Some("node rejected"));

        let before = store.withdrawal(&id).await.unwrap().unwrap();
        assert!(matches!(
            service.complete(&id, None).await,
            Err(WithdrawError::IllegalStateTransition { .. })
        ));
        assert_eq!(store.withdrawal(&id).await.unwrap().unwrap(), before);

        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.available(), d(100));
        assert_eq!(bal.locked(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_after_broadcast_rejected() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
        service.process(&id, Some("0xfeed")).await.unwrap();
        assert!(matches!(
            service.cancel(&id, 1, "changed my mind").await,
            Err(WithdrawError::AlreadyBroadcast(_))
        ));
        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.locked(), d(40));
    }

    #[tokio::test]
    async fn test_cancel_processing_without_hash_allowed() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
        service.process(&id, None).await.unwrap();
        let w = service.cancel(&id, 1, "stuck").await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Cancelled);
        assert!(w.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_hash_recorded_after_process_blocks_cancel() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
        let processing = service.process(&id, None).await.unwrap();

        let w = service.record_broadcast(&id, " 0xBEEF ").await.unwrap();
        assert_eq!(w.status, WithdrawalStatus::Processing);
        assert_eq!(w.tx_hash.as_deref(), Some("0xbeef"));
        assert_eq!(w.processing_at, processing.processing_at);
        assert!(w.is_broadcast());

        // Same hash again is a no-op, a different one is refused
        assert_eq!(service.record_broadcast(&id, "0xbeef").await.unwrap(), w);
        assert!(matches!(
            service.record_broadcast(&id, "0xcafe").await,
            Err(WithdrawError::AlreadyBroadcast(_))
        ));

        assert!(matches!(
            service.cancel(&id, 1, "changed my mind").await,
            Err(WithdrawError::AlreadyBroadcast(_))
        ));
        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.locked(), d(40));

        let done = service.complete(&id, Some(12)).await.unwrap();
        assert_eq!(done.tx_hash.as_deref(), Some("0xbeef"));
    }

    #[tokio::test]
    async fn test_record_broadcast_requires_processing_and_hash() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        assert!(matches!(
            service.record_broadcast(&id, "0xbeef").await,
            Err(WithdrawError::IllegalStateTransition { .. })
        ));
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
        service.process(&id, None).await.unwrap();
        assert!(matches!(
            service.record_broadcast(&id, "  ").await,
            Err(WithdrawError::MissingTxHash)
        ));
    }

    #[tokio::test]
    async fn test_store_refuses_cancel_of_broadcast_withdrawal() {
        let (store, service) = setup(100).await;
        let id = service
            .create_withdrawal_request(&request(40))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &id).await;
        service.verify_code(&id, &code, 1).await.unwrap();
        service.process(&id, None).await.unwrap();
        let stale_read = store.withdrawal(&id).await.unwrap().unwrap();
        service.record_broadcast(&id, "0xbeef").await.unwrap();

        // A cancel that read the row before the hash landed still loses
        let cancel = WithdrawalTransition::to(WithdrawalStatus::Cancelled, Utc::now())
            .with_ledger(LedgerOp::Release(stale_read.amount));
        assert!(matches!(
            store
                .transition_withdrawal(&id, WithdrawalStatus::Processing, &cancel)
                .await,
            Err(StoreError::Broadcast(_))
        ));
        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.locked(), d(40));
    }

    #[tokio::test]
    async fn test_expire_stale_cancels_pending_only() {
        let (store, service) = setup(100).await;
        let stale = service
            .create_withdrawal_request(&request(30))
            .await
            .unwrap()
            .withdrawal_id;
        let verified = service
            .create_withdrawal_request(&request(30))
            .await
            .unwrap()
            .withdrawal_id;
        let code = latest_code(&store, &verified).await;
        service.verify_code(&verified, &code, 1).await.unwrap();

        let later = Utc::now() + Duration::seconds(301);
        assert_eq!(service.expire_stale(later).await.unwrap(), 1);

        let w = store.withdrawal(&stale).await.unwrap().unwrap();
        assert_eq!(w.status, WithdrawalStatus::Cancelled);
        assert_eq!(w.reason.as_deref(), Some(VERIFICATION_TIMEOUT_REASON));
        let bal = store.balance(&key()).await.unwrap().unwrap();
        assert_eq!(bal.locked(), d(30));
        assert_eq!(bal.available(), d(70));
    }

    #[test]
    fn test_generated_code_is_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }
}
