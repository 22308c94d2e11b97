//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::funding::{
    CreatedWithdrawal, Deposit, DepositAddress, DepositSource, DepositStatus, DepositView,
    Withdrawal, WithdrawalStatus, WithdrawalView,
};
use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{
    AdminWithdrawalAction, BalanceData, ChainInfo, CreateWithdrawalRequest, ManualDepositRequest,
    RegisterAddressRequest, ScanRequest, TokenInfo, UpdateWithdrawalRequest, VerifyAction,
    VerifyResponse, VerifyWithdrawalRequest,
};
use crate::scheduler::SweepReport;
use crate::sentinel::ChainCycleReport;

/// Bearer JWT for user routes, shared secret header for internal routes
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("HS256 token, `sub` = user id"))
                        .build(),
                ),
            );
            components.add_security_scheme(
                "internal_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Internal-Secret",
                    "Admin secret for /internal/withdrawals, /internal/deposits and \
                     /internal/addresses; cron secret for /internal/scan and /internal/sweep",
                ))),
            );
        }
    }
}

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chain Funding API",
        version = "1.0.0",
        description = "On-chain deposits, balance ledger and verified withdrawals."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::get_chains,
        crate::gateway::handlers::get_balances,
        crate::gateway::handlers::get_addresses,
        crate::gateway::handlers::get_deposit,
        crate::gateway::handlers::query_deposits,
        crate::gateway::handlers::get_deposit_history,
        crate::gateway::handlers::create_withdrawal,
        crate::gateway::handlers::verify_withdrawal,
        crate::gateway::handlers::cancel_withdrawal,
        crate::gateway::handlers::get_withdrawal,
        crate::gateway::handlers::get_withdrawal_history,
        crate::gateway::handlers::trigger_scan,
        crate::gateway::handlers::trigger_sweep,
        crate::gateway::handlers::update_withdrawal,
        crate::gateway::handlers::create_manual_deposit,
        crate::gateway::handlers::register_address,
    ),
    components(
        schemas(
            HealthResponse,
            ChainInfo,
            TokenInfo,
            BalanceData,
            Deposit,
            DepositView,
            DepositStatus,
            DepositSource,
            DepositAddress,
            Withdrawal,
            WithdrawalView,
            WithdrawalStatus,
            CreatedWithdrawal,
            CreateWithdrawalRequest,
            VerifyWithdrawalRequest,
            VerifyAction,
            VerifyResponse,
            ScanRequest,
            ChainCycleReport,
            SweepReport,
            UpdateWithdrawalRequest,
            AdminWithdrawalAction,
            ManualDepositRequest,
            RegisterAddressRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Chains", description = "Supported chains and tokens"),
        (name = "Account", description = "Balances and deposit addresses (JWT)"),
        (name = "Deposits", description = "Deposit queries (JWT)"),
        (name = "Withdrawals", description = "Withdrawal lifecycle (JWT)"),
        (
            name = "Internal",
            description = "Scheduler trigger and admin actions (X-Internal-Secret)"
        ),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Chain Funding API");
        assert_eq!(spec.info.version, "1.0.0");
    }

    #[test]
    fn test_openapi_json_serializable() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("Chain Funding API"));
    }

    #[test]
    fn test_endpoints_registered() {
        let paths = ApiDoc::openapi().paths;
        assert!(paths.paths.contains_key("/health"));
        assert!(paths.paths.contains_key("/api/v1/chains"));
        assert!(paths.paths.contains_key("/api/v1/withdrawals/verify"));
        assert!(paths.paths.contains_key("/api/v1/withdrawals/{withdrawal_id}"));
        assert!(paths.paths.contains_key("/internal/scan"));
    }

    #[test]
    fn test_security_schemes_registered() {
        let components = ApiDoc::openapi().components.expect("should have components");
        assert!(components.security_schemes.contains_key("bearer_jwt"));
        assert!(components.security_schemes.contains_key("internal_secret"));
    }
}
