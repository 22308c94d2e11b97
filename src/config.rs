use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Per-address scan tracing (target `scan_trace`)
    #[serde(default)]
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    /// Chain registry YAML; built-in mainnet defaults when absent
    #[serde(default)]
    pub chains_file: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub price: PriceConfig,
}

fn default_db_max_connections() -> u32 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// In-process driver for deployments without an external cron
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub outbox_interval_ms: u64,
    pub outbox_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 30_000,
            outbox_interval_ms: 5_000,
            outbox_batch: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Upper bound on any single node request
    pub request_timeout_secs: u64,
    /// Serve chains from the in-process mock scanner instead of nodes
    pub mock: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            mock: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WithdrawalConfig {
    pub code_ttl_secs: i64,
    /// Minimum gap between two issued codes
    pub resend_cooldown_secs: i64,
    /// Codes per withdrawal, including the first
    pub max_codes: u32,
    pub history_limit: usize,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: 300,
            resend_cooldown_secs: 60,
            max_codes: 5,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SecurityConfig {
    /// `X-Internal-Secret` for admin routes
    pub admin_secret: String,
    /// `X-Internal-Secret` for the scheduler trigger
    pub cron_secret: String,
    /// HS256 key for user bearer tokens
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceConfig {
    pub refresh_secs: u64,
    pub stablecoins: Vec<String>,
    #[serde(default)]
    pub reference: HashMap<String, Decimal>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 60,
            stablecoins: vec!["USDT".to_string(), "USDC".to_string()],
            reference: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
