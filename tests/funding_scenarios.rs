//! End-to-end funding flows against the in-memory store
//!
//! Deposits go through the mock scanner and the sentinel worker; withdrawals
//! go through the service exactly as the gateway drives them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;

use chain_funding::balance::LedgerOp;
use chain_funding::chain::ChainRegistry;
use chain_funding::config::{PriceConfig, WithdrawalConfig};
use chain_funding::core_types::BalanceKey;
use chain_funding::funding::{
    DepositError, DepositReconciler, DepositStatus, ManualDeposit, WithdrawError,
    WithdrawService, WithdrawalRequest, WithdrawalStatus,
};
use chain_funding::ledger::BalanceLedger;
use chain_funding::price::{PriceOracle, ReferencePriceOracle};
use chain_funding::sentinel::{DetectedTransfer, MockScanner, SentinelWorker};
use chain_funding::store::{FundingStore, MemoryStore};

const DEPOSIT_ADDR: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";
const PAYOUT_ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

struct Funding {
    store: Arc<MemoryStore>,
    ledger: BalanceLedger,
    deposits: Arc<DepositReconciler>,
    withdrawals: Arc<WithdrawService>,
    scanner: Arc<MockScanner>,
    worker: SentinelWorker,
}

async fn funding(tip: u64, policy: WithdrawalConfig) -> Funding {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ChainRegistry::builtin().unwrap());
    let deposits = Arc::new(DepositReconciler::new(store.clone(), registry.clone()));
    deposits
        .register_address(1, "ethereum", DEPOSIT_ADDR)
        .await
        .unwrap();

    let scanner = Arc::new(MockScanner::new("ethereum", tip));
    let mut worker = SentinelWorker::new(store.clone(), registry.clone(), deposits.clone());
    worker.add_scanner(scanner.clone());

    let prices: Arc<dyn PriceOracle> = Arc::new(ReferencePriceOracle::new(&PriceConfig::default()));
    let withdrawals = Arc::new(WithdrawService::new(
        store.clone(),
        registry,
        prices,
        policy,
    ));

    Funding {
        ledger: BalanceLedger::new(store.clone()),
        store,
        deposits,
        withdrawals,
        scanner,
        worker,
    }
}

fn usdt(user_id: i64) -> BalanceKey {
    BalanceKey::new(user_id, "USDT", "ethereum")
}

fn transfer(hash: &str, amount: i64, block: u64) -> DetectedTransfer {
    DetectedTransfer {
        tx_hash: hash.into(),
        to_address: DEPOSIT_ADDR.into(),
        from_address: Some("0x0000000000000000000000000000000000000002".into()),
        currency: "USDT".into(),
        amount: Decimal::from(amount),
        block_number: block,
    }
}

fn withdrawal(user_id: i64, amount: i64) -> WithdrawalRequest {
    WithdrawalRequest {
        user_id,
        currency: "USDT".into(),
        chain: "ethereum".into(),
        amount: Decimal::from(amount),
        to_address: PAYOUT_ADDR.into(),
        memo: None,
    }
}

fn manual(user_id: i64, hash: &str, amount: i64) -> ManualDeposit {
    ManualDeposit {
        user_id,
        chain: "ethereum".into(),
        currency: "USDT".into(),
        tx_hash: hash.into(),
        to_address: DEPOSIT_ADDR.into(),
        from_address: None,
        amount: Decimal::from(amount),
        block_number: Some(1),
    }
}

async fn fund(f: &Funding, user_id: i64, amount: i64) {
    f.store
        .apply_ledger_op(&usdt(user_id), LedgerOp::Credit(Decimal::from(amount)))
        .await
        .unwrap();
}

async fn latest_code(f: &Funding, withdrawal_id: &str) -> String {
    let codes = f.store.codes_for_withdrawal(withdrawal_id).await.unwrap();
    codes.last().unwrap().code.clone()
}

// ============================================================================
// Deposits
// ============================================================================

#[tokio::test]
async fn test_deposit_credits_exactly_at_threshold() {
    let f = funding(100, WithdrawalConfig::default()).await;
    f.scanner.push_transfer(transfer("0xdeposit01", 100, 100));
    f.worker.scan("ethereum").await.unwrap();

    // Eleven updates: 1..=11 confirmations, nothing credited
    for tip in 100..111 {
        f.scanner.set_tip(tip);
        f.worker.update_confirmations("ethereum").await.unwrap();
        let deposit = f.store.deposit_by_tx_hash("0xdeposit01").await.unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert_eq!(f.ledger.balance(&usdt(1)).await.unwrap().available(), Decimal::ZERO);
    }

    f.scanner.set_tip(111);
    let report = f.worker.update_confirmations("ethereum").await.unwrap();
    assert_eq!(report.credited, 1);

    let deposit = f.store.deposit_by_tx_hash("0xdeposit01").await.unwrap().unwrap();
    assert_eq!(deposit.status, DepositStatus::Completed);
    assert_eq!(deposit.confirmations, 12);
    assert!(deposit.completed_at.is_some());
    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::from(100));
    assert_eq!(balance.total(), Decimal::from(100));

    // Further updates never credit twice
    f.scanner.set_tip(130);
    let report = f.worker.update_confirmations("ethereum").await.unwrap();
    assert_eq!(report.credited, 0);
    assert_eq!(
        f.ledger.balance(&usdt(1)).await.unwrap().available(),
        Decimal::from(100)
    );
}

#[tokio::test]
async fn test_rescan_after_credit_changes_nothing() {
    let f = funding(200, WithdrawalConfig::default()).await;
    f.scanner.push_transfer(transfer("0xdeposit02", 40, 150));
    f.worker.run_cycle(Some("ethereum")).await.unwrap();
    assert_eq!(
        f.ledger.balance(&usdt(1)).await.unwrap().available(),
        Decimal::from(40)
    );

    f.store.set_cursor("ethereum", 100).await.unwrap();
    let report = f.worker.scan("ethereum").await.unwrap();
    assert_eq!(report.deposits_found, 1);
    assert_eq!(report.deposits_created, 0);
    assert_eq!(f.store.deposits_for_user(1, 10).await.unwrap().len(), 1);
    assert_eq!(
        f.ledger.balance(&usdt(1)).await.unwrap().available(),
        Decimal::from(40)
    );
}

#[tokio::test]
async fn test_confirmations_never_decrease() {
    let f = funding(100, WithdrawalConfig::default()).await;
    f.scanner.push_transfer(transfer("0xdeposit03", 10, 100));
    f.worker.scan("ethereum").await.unwrap();

    f.scanner.set_tip(105);
    f.worker.update_confirmations("ethereum").await.unwrap();
    // Reorged node reports a lower tip
    f.scanner.set_tip(102);
    f.worker.update_confirmations("ethereum").await.unwrap();

    let deposit = f.store.deposit_by_tx_hash("0xdeposit03").await.unwrap().unwrap();
    assert_eq!(deposit.confirmations, 6);
    assert_eq!(deposit.status, DepositStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_manual_credits_apply_once() {
    let f = funding(100, WithdrawalConfig::default()).await;
    let request = manual(1, "0xmanual01", 25);

    let (a, b) = tokio::join!(
        f.deposits.create_manual_deposit(&request),
        f.deposits.create_manual_deposit(&request)
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(DepositError::DuplicateTransaction(_)))));

    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::from(25));
    assert_eq!(f.store.deposits_for_user(1, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_credit_of_scanned_transaction_is_rejected() {
    let f = funding(100, WithdrawalConfig::default()).await;
    f.scanner.push_transfer(transfer("0xdeposit04", 10, 100));
    f.worker.scan("ethereum").await.unwrap();

    let err = f
        .deposits
        .create_manual_deposit(&manual(1, "0xDEPOSIT04", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, DepositError::DuplicateTransaction(_)));
    assert_eq!(f.ledger.balance(&usdt(1)).await.unwrap().total(), Decimal::ZERO);
}

// ============================================================================
// Withdrawals
// ============================================================================

#[tokio::test]
async fn test_withdraw_whole_balance_and_one_more() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 50).await;
    fund(&f, 2, 50).await;

    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 50))
        .await
        .unwrap();
    assert_eq!(created.status, WithdrawalStatus::Pending);
    assert_eq!(created.fee, Decimal::ONE);
    assert_eq!(created.net_amount, Decimal::from(49));
    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::ZERO);
    assert_eq!(balance.locked(), Decimal::from(50));

    let err = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(2, 51))
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::InsufficientFunds { .. }));
    let balance = f.ledger.balance(&usdt(2)).await.unwrap();
    assert_eq!(balance.available(), Decimal::from(50));
    assert_eq!(balance.locked(), Decimal::ZERO);
    assert!(f.store.withdrawals_for_user(2, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_after_verify_releases_everything() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 80).await;

    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 30))
        .await
        .unwrap();
    let code = latest_code(&f, &created.withdrawal_id).await;
    let verified = f
        .withdrawals
        .verify_code(&created.withdrawal_id, &code, 1)
        .await
        .unwrap();
    assert_eq!(verified.status, WithdrawalStatus::Verified);

    let cancelled = f
        .withdrawals
        .cancel(&created.withdrawal_id, 1, "changed my mind")
        .await
        .unwrap();
    assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);

    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::from(80));
    assert_eq!(balance.locked(), Decimal::ZERO);
    assert_eq!(balance.total(), Decimal::from(80));
}

#[tokio::test]
async fn test_full_lifecycle_settles_amount() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 100).await;

    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 40))
        .await
        .unwrap();
    let code = latest_code(&f, &created.withdrawal_id).await;
    f.withdrawals
        .verify_code(&created.withdrawal_id, &code, 1)
        .await
        .unwrap();
    let processing = f
        .withdrawals
        .process(&created.withdrawal_id, Some("0xPAYOUT01"))
        .await
        .unwrap();
    assert_eq!(processing.status, WithdrawalStatus::Processing);
    assert_eq!(processing.tx_hash.as_deref(), Some("0xpayout01"));

    // Broadcast has started
    let err = f
        .withdrawals
        .cancel(&created.withdrawal_id, 1, "too late")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WithdrawError::AlreadyBroadcast(_) | WithdrawError::IllegalStateTransition { .. }
    ));

    let completed = f
        .withdrawals
        .complete(&created.withdrawal_id, Some(12))
        .await
        .unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);

    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::from(60));
    assert_eq!(balance.locked(), Decimal::ZERO);
    assert_eq!(balance.total(), Decimal::from(60));
}

#[tokio::test]
async fn test_failed_broadcast_returns_funds() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 100).await;

    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 40))
        .await
        .unwrap();
    let code = latest_code(&f, &created.withdrawal_id).await;
    f.withdrawals
        .verify_code(&created.withdrawal_id, &code, 1)
        .await
        .unwrap();
    f.withdrawals
        .process(&created.withdrawal_id, None)
        .await
        .unwrap();
    let failed = f
        .withdrawals
        .fail(&created.withdrawal_id, "node rejected transaction")
        .await
        .unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);

    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::from(100));
    assert_eq!(balance.locked(), Decimal::ZERO);
}

#[tokio::test]
async fn test_illegal_transitions_leave_state_untouched() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 100).await;
    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 20))
        .await
        .unwrap();
    let id = created.withdrawal_id.as_str();

    // PENDING cannot skip verification
    assert!(matches!(
        f.withdrawals.process(id, None).await,
        Err(WithdrawError::IllegalStateTransition { .. })
    ));
    assert!(matches!(
        f.withdrawals.complete(id, None).await,
        Err(WithdrawError::IllegalStateTransition { .. })
    ));
    assert!(matches!(
        f.withdrawals.fail(id, "x").await,
        Err(WithdrawError::IllegalStateTransition { .. })
    ));

    let view = f.withdrawals.get(id, 1).await.unwrap();
    assert_eq!(view.withdrawal.status, WithdrawalStatus::Pending);
    assert_eq!(
        f.ledger.balance(&usdt(1)).await.unwrap().locked(),
        Decimal::from(20)
    );

    // Terminal states accept nothing
    f.withdrawals.cancel(id, 1, "done").await.unwrap();
    let code = latest_code(&f, id).await;
    assert!(f.withdrawals.verify_code(id, &code, 1).await.is_err());
    assert!(f.withdrawals.cancel(id, 1, "again").await.is_err());
    assert_eq!(
        f.ledger.balance(&usdt(1)).await.unwrap().available(),
        Decimal::from(100)
    );
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let policy = WithdrawalConfig {
        code_ttl_secs: 0,
        ..WithdrawalConfig::default()
    };
    let f = funding(100, policy).await;
    fund(&f, 1, 100).await;
    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 20))
        .await
        .unwrap();
    let code = latest_code(&f, &created.withdrawal_id).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = f
        .withdrawals
        .verify_code(&created.withdrawal_id, &code, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::ExpiredCode));

    let cancelled = f.withdrawals.expire_stale(Utc::now()).await.unwrap();
    assert_eq!(cancelled, 1);
    let view = f.withdrawals.get(&created.withdrawal_id, 1).await.unwrap();
    assert_eq!(view.withdrawal.status, WithdrawalStatus::Cancelled);
    assert_eq!(
        f.ledger.balance(&usdt(1)).await.unwrap().available(),
        Decimal::from(100)
    );
}

#[tokio::test]
async fn test_code_is_single_use_and_owner_bound() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 100).await;
    let created = f
        .withdrawals
        .create_withdrawal_request(&withdrawal(1, 20))
        .await
        .unwrap();
    let code = latest_code(&f, &created.withdrawal_id).await;

    // Another user cannot see or verify it
    assert!(matches!(
        f.withdrawals.verify_code(&created.withdrawal_id, &code, 2).await,
        Err(WithdrawError::NotFound(_))
    ));

    f.withdrawals
        .verify_code(&created.withdrawal_id, &code, 1)
        .await
        .unwrap();
    let err = f
        .withdrawals
        .verify_code(&created.withdrawal_id, &code, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WithdrawError::CodeAlreadyUsed | WithdrawError::IllegalStateTransition { .. }
    ));
}

#[tokio::test]
async fn test_concurrent_reservations_never_overdraw() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 100).await;

    let requests: Vec<_> = (0..20).map(|_| withdrawal(1, 10)).collect();
    let results = join_all(
        requests
            .iter()
            .map(|r| f.withdrawals.create_withdrawal_request(r)),
    )
    .await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 10);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, WithdrawError::InsufficientFunds { .. })));

    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.available(), Decimal::ZERO);
    assert_eq!(balance.locked(), Decimal::from(100));
    assert_eq!(balance.total(), Decimal::from(100));
}

#[tokio::test]
async fn test_credits_and_reservations_interleave_conserving_total() {
    let f = funding(100, WithdrawalConfig::default()).await;
    fund(&f, 1, 50).await;

    let credits: Vec<_> = (0..5)
        .map(|i| manual(1, &format!("0xinterleave{:02}", i), 10))
        .collect();
    let reserves: Vec<_> = (0..5).map(|_| withdrawal(1, 10)).collect();

    let (credited, reserved) = tokio::join!(
        join_all(credits.iter().map(|c| f.deposits.create_manual_deposit(c))),
        join_all(
            reserves
                .iter()
                .map(|r| f.withdrawals.create_withdrawal_request(r))
        )
    );
    assert!(credited.iter().all(|r| r.is_ok()));
    assert!(reserved.iter().all(|r| r.is_ok()));

    let balance = f.ledger.balance(&usdt(1)).await.unwrap();
    assert_eq!(balance.total(), Decimal::from(100));
    assert_eq!(balance.locked(), Decimal::from(50));
    assert_eq!(balance.available() + balance.locked() + balance.frozen(), balance.total());
}
