//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: status + code + message, convertible into the error response
//! - `error_codes`: Standard error code constants
//! - Response DTOs

use axum::{Json, http::StatusCode};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::balance::UserBalance;
use crate::chain::{ChainFamily, ChainParams, TokenParams};
use crate::funding::{DepositError, WithdrawError, WithdrawalStatus};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ErrorBody = (StatusCode, Json<ApiResponse<()>>);

/// Handler result: `(status, envelope)` either way
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ErrorBody>;

/// 200 with `data`
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// 201 with `data`
pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    /// Logs the cause; the client only sees a generic message
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!(error = %cause, "Internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            "Internal server error",
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self.into())
    }
}

impl From<ApiError> for ErrorBody {
    fn from(e: ApiError) -> Self {
        (e.status, Json(ApiResponse::<()>::error(e.code, e.msg)))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<DepositError> for ApiError {
    fn from(e: DepositError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            let mut err = ApiError::internal(&e);
            if matches!(e, DepositError::LedgerInvariantViolation(_)) {
                err.code = error_codes::LEDGER_INVARIANT;
            }
            return err;
        }
        let code = match &e {
            DepositError::DuplicateTransaction(_) => error_codes::DUPLICATE_TRANSACTION,
            DepositError::NotFound(_) => error_codes::DEPOSIT_NOT_FOUND,
            DepositError::InvalidAddress { .. } => error_codes::INVALID_ADDRESS,
            DepositError::AddressInUse(_) => error_codes::ADDRESS_IN_USE,
            DepositError::Chain(_) => error_codes::UNSUPPORTED_ASSET,
            _ => error_codes::INVALID_PARAMETER,
        };
        ApiError::new(status, code, e.to_string())
    }
}

impl From<WithdrawError> for ApiError {
    fn from(e: WithdrawError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            let mut err = ApiError::internal(&e);
            if matches!(e, WithdrawError::LedgerInvariantViolation(_)) {
                err.code = error_codes::LEDGER_INVARIANT;
            }
            return err;
        }
        let code = match &e {
            WithdrawError::NotFound(_) => error_codes::WITHDRAWAL_NOT_FOUND,
            WithdrawError::Chain(_) => error_codes::UNSUPPORTED_ASSET,
            WithdrawError::BelowMinimum { .. } | WithdrawError::FeeExceedsAmount { .. } => {
                error_codes::BELOW_MINIMUM
            }
            WithdrawError::InvalidAddress { .. } => error_codes::INVALID_ADDRESS,
            WithdrawError::InsufficientFunds { .. } => error_codes::INSUFFICIENT_BALANCE,
            WithdrawError::InvalidCode => error_codes::INVALID_CODE,
            WithdrawError::ExpiredCode => error_codes::CODE_EXPIRED,
            WithdrawError::CodeAlreadyUsed => error_codes::CODE_USED,
            WithdrawError::ResendTooSoon { .. } | WithdrawError::TooManyCodes { .. } => {
                error_codes::RATE_LIMITED
            }
            WithdrawError::IllegalStateTransition { .. } | WithdrawError::AlreadyBroadcast(_) => {
                error_codes::ILLEGAL_STATE
            }
            _ => error_codes::INVALID_PARAMETER,
        };
        ApiError::new(status, code, e.to_string())
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Listed token on a chain
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenInfo {
    #[schema(example = "USDT")]
    pub symbol: String,
    pub contract: Option<String>,
    pub decimals: u32,
    /// Human readable fee rule
    #[schema(example = "1 flat")]
    pub withdrawal_fee: String,
    #[schema(value_type = String, example = "10")]
    pub min_withdrawal: Decimal,
    #[schema(value_type = String, example = "1")]
    pub min_deposit: Decimal,
}

impl From<&TokenParams> for TokenInfo {
    fn from(t: &TokenParams) -> Self {
        Self {
            symbol: t.symbol.clone(),
            contract: t.contract.clone(),
            decimals: t.decimals,
            withdrawal_fee: t.withdrawal_fee.describe(),
            min_withdrawal: t.min_withdrawal,
            min_deposit: t.min_deposit,
        }
    }
}

/// Public chain parameters
#[derive(Debug, Serialize, ToSchema)]
pub struct ChainInfo {
    #[schema(example = "ethereum")]
    pub slug: String,
    #[schema(example = "Ethereum")]
    pub display_name: String,
    #[schema(value_type = String, example = "evm")]
    pub family: ChainFamily,
    #[schema(example = 12)]
    pub confirmations: u32,
    /// Seconds
    #[schema(example = 12)]
    pub block_time: u64,
    pub explorer_base_url: String,
    pub tokens: Vec<TokenInfo>,
}

impl From<&ChainParams> for ChainInfo {
    fn from(c: &ChainParams) -> Self {
        Self {
            slug: c.slug.clone(),
            display_name: c.display_name.clone(),
            family: c.family,
            confirmations: c.confirmations,
            block_time: c.block_time,
            explorer_base_url: c.explorer_base_url.clone(),
            tokens: c.tokens.iter().map(TokenInfo::from).collect(),
        }
    }
}

/// One (currency, chain) balance
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceData {
    pub currency: String,
    pub chain: String,
    #[schema(value_type = String)]
    pub available: Decimal,
    #[schema(value_type = String)]
    pub locked: Decimal,
    #[schema(value_type = String)]
    pub frozen: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
}

impl From<&UserBalance> for BalanceData {
    fn from(b: &UserBalance) -> Self {
        Self {
            currency: b.key().currency.clone(),
            chain: b.key().chain.clone(),
            available: b.available(),
            locked: b.locked(),
            frozen: b.frozen(),
            total: b.total(),
        }
    }
}

/// Result of `POST /api/v1/withdrawals/verify`
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub withdrawal_id: String,
    pub status: WithdrawalStatus,
    /// Set when a new code was issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const BELOW_MINIMUM: i32 = 1004;
    pub const INVALID_ADDRESS: i32 = 1005;
    pub const UNSUPPORTED_ASSET: i32 = 1006;

    // Verification code errors (11xx)
    pub const INVALID_CODE: i32 = 1101;
    pub const CODE_EXPIRED: i32 = 1102;
    pub const CODE_USED: i32 = 1103;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const DEPOSIT_NOT_FOUND: i32 = 4001;
    pub const WITHDRAWAL_NOT_FOUND: i32 = 4002;
    pub const DUPLICATE_TRANSACTION: i32 = 4091;
    pub const ILLEGAL_STATE: i32 = 4092;
    pub const ADDRESS_IN_USE: i32 = 4093;
    pub const RATE_LIMITED: i32 = 4291;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const LEDGER_INVARIANT: i32 = 5002;
}
