//! Gateway types module
//!
//! - [`request`]: request DTOs with `validator` shape checks
//! - [`response`]: `ApiResponse<T>`, `ApiError`, response DTOs and error codes

pub mod request;
pub mod response;

pub use request::{
    AdminWithdrawalAction, CancelQuery, CreateWithdrawalRequest, DepositQuery, HistoryQuery,
    ManualDepositRequest, RegisterAddressRequest, ScanRequest, UpdateWithdrawalRequest,
    VerifyAction, VerifyWithdrawalRequest,
};
pub use response::{
    ApiError, ApiResponse, ApiResult, BalanceData, ChainInfo, ErrorBody, TokenInfo,
    VerifyResponse, created, error_codes, ok,
};
