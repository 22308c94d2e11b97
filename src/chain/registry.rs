use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::address;
use crate::fee::FeeRule;

#[derive(Debug, Error)]
pub enum ChainConfigError {
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Currency {currency} is not supported on {chain}")]
    UnsupportedCurrency { chain: String, currency: String },

    #[error("Invalid chain configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Chain family decides which scanner implementation watches the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// Account-model chains (Ethereum, BSC, Polygon)
    Evm,
    /// Output-based chains (Bitcoin)
    Utxo,
}

/// Token listed on a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenParams {
    pub symbol: String,
    /// ERC-20 contract; `None` for the chain's native asset
    #[serde(default)]
    pub contract: Option<String>,
    pub decimals: u32,
    pub withdrawal_fee: FeeRule,
    pub min_withdrawal: Decimal,
    #[serde(default)]
    pub min_deposit: Decimal,
}

/// Static parameters for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub slug: String,
    pub display_name: String,
    pub family: ChainFamily,
    /// Required confirmations before a deposit is credited
    pub confirmations: u32,
    /// Average block time in seconds
    pub block_time: u64,
    pub explorer_base_url: String,
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// How far behind the tip the very first scan starts
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    /// Upper bound on blocks covered by a single scan round
    #[serde(default = "default_max_blocks_per_scan")]
    pub max_blocks_per_scan: u64,
    /// Node is considered stale when its tip is older than this
    #[serde(default = "default_max_block_lag_secs")]
    pub max_block_lag_secs: i64,
    pub tokens: Vec<TokenParams>,
}

fn default_lookback_blocks() -> u64 {
    100
}

fn default_max_blocks_per_scan() -> u64 {
    2_000
}

fn default_max_block_lag_secs() -> i64 {
    3_600
}

impl ChainParams {
    pub fn token(&self, symbol: &str) -> Option<&TokenParams> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn native_token(&self) -> Option<&TokenParams> {
        self.tokens.iter().find(|t| t.contract.is_none())
    }

    /// Lookup an ERC-20 by contract address (case-insensitive)
    pub fn token_by_contract(&self, contract: &str) -> Option<&TokenParams> {
        self.tokens.iter().find(|t| {
            t.contract
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(contract))
        })
    }

    /// `<explorerBaseUrl>/tx/<txHash>`
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!(
            "{}/tx/{}",
            self.explorer_base_url.trim_end_matches('/'),
            tx_hash
        )
    }

    pub fn validate_address(&self, addr: &str) -> bool {
        address::validate_address(self.family, addr)
    }

    pub fn normalize_address(&self, addr: &str) -> String {
        address::normalize_address(self.family, addr)
    }

    fn check(&self) -> Result<(), ChainConfigError> {
        let invalid = |msg: String| ChainConfigError::Invalid(format!("{}: {}", self.slug, msg));

        if self.slug.is_empty() || self.slug != self.slug.to_lowercase() {
            return Err(invalid("slug must be non-empty lowercase".to_string()));
        }
        if self.confirmations == 0 {
            return Err(invalid("confirmations must be at least 1".to_string()));
        }
        if self.tokens.is_empty() {
            return Err(invalid("no tokens listed".to_string()));
        }
        for token in &self.tokens {
            if !token.withdrawal_fee.is_valid() {
                return Err(invalid(format!("{} has an invalid fee rule", token.symbol)));
            }
            let fee_at_min = token
                .withdrawal_fee
                .fee_for(token.min_withdrawal, token.decimals);
            if token.min_withdrawal <= fee_at_min {
                return Err(invalid(format!(
                    "{} minimum withdrawal does not cover its fee",
                    token.symbol
                )));
            }
            if self.family == ChainFamily::Utxo && token.contract.is_some() {
                return Err(invalid(format!("{} has a contract on a UTXO chain", token.symbol)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    chains: Vec<ChainParams>,
}

/// Chain Config Registry: read-only after construction
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: BTreeMap<String, ChainParams>,
}

impl ChainRegistry {
    pub fn from_chains(chains: Vec<ChainParams>) -> Result<Self, ChainConfigError> {
        let mut map = BTreeMap::new();
        for chain in chains {
            chain.check()?;
            if map.contains_key(&chain.slug) {
                return Err(ChainConfigError::Invalid(format!(
                    "duplicate chain slug: {}",
                    chain.slug
                )));
            }
            map.insert(chain.slug.clone(), chain);
        }
        Ok(Self { chains: map })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ChainConfigError> {
        let file: RegistryFile =
            serde_yaml::from_str(content).map_err(|e| ChainConfigError::Parse(e.to_string()))?;
        Self::from_chains(file.chains)
    }

    /// Load registry from YAML file
    pub fn from_file(path: &str) -> Result<Self, ChainConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Built-in mainnet defaults used when no chains file is configured
    pub fn builtin() -> Result<Self, ChainConfigError> {
        Self::from_yaml_str(BUILTIN_CHAINS)
    }

    pub fn get(&self, slug: &str) -> Result<&ChainParams, ChainConfigError> {
        self.chains
            .get(&slug.to_lowercase())
            .ok_or_else(|| ChainConfigError::UnknownChain(slug.to_string()))
    }

    /// Resolve (chain, currency) to its params
    pub fn token(
        &self,
        chain: &str,
        currency: &str,
    ) -> Result<(&ChainParams, &TokenParams), ChainConfigError> {
        let params = self.get(chain)?;
        let token = params
            .token(currency)
            .ok_or_else(|| ChainConfigError::UnsupportedCurrency {
                chain: params.slug.clone(),
                currency: currency.to_string(),
            })?;
        Ok((params, token))
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainParams> {
        self.chains.values()
    }

    pub fn slugs(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

const BUILTIN_CHAINS: &str = r#"
chains:
  - slug: ethereum
    display_name: "Ethereum"
    family: evm
    confirmations: 12
    block_time: 12
    explorer_base_url: "https://etherscan.io"
    tokens:
      - symbol: ETH
        decimals: 18
        withdrawal_fee: { type: flat, amount: "0.002" }
        min_withdrawal: "0.01"
        min_deposit: "0.001"
      - symbol: USDT
        contract: "0xdac17f958d2ee523a2206206994597c13d831ec7"
        decimals: 6
        withdrawal_fee: { type: flat, amount: "1" }
        min_withdrawal: "10"
        min_deposit: "1"
      - symbol: USDC
        contract: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        decimals: 6
        withdrawal_fee: { type: flat, amount: "1" }
        min_withdrawal: "10"
        min_deposit: "1"
  - slug: bsc
    display_name: "BNB Smart Chain"
    family: evm
    confirmations: 15
    block_time: 3
    explorer_base_url: "https://bscscan.com"
    tokens:
      - symbol: BNB
        decimals: 18
        withdrawal_fee: { type: flat, amount: "0.0005" }
        min_withdrawal: "0.01"
      - symbol: USDT
        contract: "0x55d398326f99059ff775485246999027b3197955"
        decimals: 18
        withdrawal_fee: { type: flat, amount: "0.3" }
        min_withdrawal: "5"
        min_deposit: "1"
  - slug: polygon
    display_name: "Polygon PoS"
    family: evm
    confirmations: 64
    block_time: 2
    explorer_base_url: "https://polygonscan.com"
    tokens:
      - symbol: USDT
        contract: "0xc2132d05d31c914a87c6611c10748aeb04b58e8f"
        decimals: 6
        withdrawal_fee: { type: flat, amount: "0.5" }
        min_withdrawal: "5"
        min_deposit: "1"
  - slug: bitcoin
    display_name: "Bitcoin"
    family: utxo
    confirmations: 3
    block_time: 600
    explorer_base_url: "https://mempool.space"
    lookback_blocks: 6
    max_block_lag_secs: 7200
    tokens:
      - symbol: BTC
        decimals: 8
        withdrawal_fee: { type: percent, rate: "0.0005", min: "0.0001" }
        min_withdrawal: "0.001"
        min_deposit: "0.0001"
"#;
