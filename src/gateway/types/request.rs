//! Request DTOs
//!
//! Shape checks run through `validator` before any service call; business
//! rules (registry, minimums, balances) stay in the services.

use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::core_types::UserId;

fn positive(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

fn positive_user(user_id: &UserId) -> Result<(), ValidationError> {
    if *user_id > 0 {
        Ok(())
    } else {
        Err(ValidationError::new("user_id_must_be_positive"))
    }
}

/// `POST /api/v1/withdrawals`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateWithdrawalRequest {
    #[validate(length(min = 1, max = 16))]
    #[schema(example = "USDT")]
    pub currency: String,
    #[validate(length(min = 1, max = 32))]
    #[schema(example = "ethereum")]
    pub chain: String,
    #[validate(custom(function = "positive"))]
    #[schema(value_type = String, example = "50")]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 128))]
    #[schema(example = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e")]
    pub to_address: String,
    #[validate(length(max = 128))]
    pub memo: Option<String>,
}

/// Extra action on the verify endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VerifyAction {
    /// Issue a fresh code instead of verifying one
    Resend,
}

/// `POST /api/v1/withdrawals/verify`: `code` to verify, or `action: "resend"`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct VerifyWithdrawalRequest {
    #[validate(length(min = 1, max = 64))]
    pub withdrawal_id: String,
    #[validate(length(min = 1, max = 16))]
    #[schema(example = "042917")]
    pub code: Option<String>,
    pub action: Option<VerifyAction>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CancelQuery {
    /// Free-form reason stored on the withdrawal
    pub reason: Option<String>,
}

/// Deposit lookup; exactly one of the two
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DepositQuery {
    pub tx_hash: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Number of rows (default: service limit)
    pub limit: Option<usize>,
}

/// `POST /internal/scan`
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ScanRequest {
    /// Single chain; all chains with a scanner when absent
    #[schema(example = "ethereum")]
    pub chain: Option<String>,
}

/// Admin action on a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AdminWithdrawalAction {
    Process,
    /// Attach the hash to a withdrawal already in PROCESSING
    Broadcast,
    Complete,
    Fail,
}

/// `PATCH /internal/withdrawals/{id}`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateWithdrawalRequest {
    pub action: AdminWithdrawalAction,
    /// Broadcast hash, optional on `process`, required on `broadcast`
    #[validate(length(min = 1, max = 128))]
    pub tx_hash: Option<String>,
    /// Chain depth reported on `complete`
    pub confirmations: Option<u32>,
    /// Failure reason, required for `fail`
    #[validate(length(min = 1, max = 256))]
    pub reason: Option<String>,
}

/// `POST /internal/deposits/manual`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ManualDepositRequest {
    #[validate(custom(function = "positive_user"))]
    pub user_id: UserId,
    #[validate(length(min = 1, max = 32))]
    pub chain: String,
    #[validate(length(min = 1, max = 16))]
    pub currency: String,
    #[validate(length(min = 1, max = 128))]
    pub tx_hash: String,
    #[validate(length(min = 1, max = 128))]
    pub to_address: String,
    pub from_address: Option<String>,
    #[validate(custom(function = "positive"))]
    #[schema(value_type = String, example = "100")]
    pub amount: Decimal,
    pub block_number: Option<u64>,
}

/// `POST /internal/addresses`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RegisterAddressRequest {
    #[validate(custom(function = "positive_user"))]
    pub user_id: UserId,
    #[validate(length(min = 1, max = 32))]
    pub chain: String,
    #[validate(length(min = 1, max = 128))]
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_request_validation() {
        let valid: CreateWithdrawalRequest = serde_json::from_str(
            r#"{"currency":"USDT","chain":"ethereum","amount":"50","to_address":"0xabc"}"#,
        )
        .unwrap();
        assert!(valid.validate().is_ok());

        let zero: CreateWithdrawalRequest = serde_json::from_str(
            r#"{"currency":"USDT","chain":"ethereum","amount":"0","to_address":"0xabc"}"#,
        )
        .unwrap();
        assert!(zero.validate().is_err());

        let no_address: CreateWithdrawalRequest = serde_json::from_str(
            r#"{"currency":"USDT","chain":"ethereum","amount":"5","to_address":""}"#,
        )
        .unwrap();
        assert!(no_address.validate().is_err());
    }

    #[test]
    fn test_verify_request_forms() {
        let resend: VerifyWithdrawalRequest =
            serde_json::from_str(r#"{"withdrawal_id":"w-1","action":"resend"}"#).unwrap();
        assert_eq!(resend.action, Some(VerifyAction::Resend));
        assert!(resend.code.is_none());

        let unknown = serde_json::from_str::<VerifyWithdrawalRequest>(
            r#"{"withdrawal_id":"w-1","action":"approve"}"#,
        );
        assert!(unknown.is_err());
    }

    #[test]
    fn test_admin_action_parsing() {
        let req: UpdateWithdrawalRequest =
            serde_json::from_str(r#"{"action":"fail","reason":"nonce too low"}"#).unwrap();
        assert_eq!(req.action, AdminWithdrawalAction::Fail);
        assert!(req.validate().is_ok());

        let broadcast: UpdateWithdrawalRequest =
            serde_json::from_str(r#"{"action":"broadcast","tx_hash":"0xbeef"}"#).unwrap();
        assert_eq!(broadcast.action, AdminWithdrawalAction::Broadcast);
        assert!(broadcast.validate().is_ok());

        let manual: ManualDepositRequest = serde_json::from_value(serde_json::json!({
            "user_id": 0,
            "chain": "ethereum",
            "currency": "USDT",
            "tx_hash": "0x1",
            "to_address": "0x2",
            "amount": "1",
        }))
        .unwrap();
        assert!(manual.validate().is_err());
    }
}
