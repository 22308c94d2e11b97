//! EVM Scanner
//!
//! Account-model chains over plain JSON-RPC:
//! - ERC-20 deposits: `eth_getLogs` on the listed contracts, filtered by the
//!   `Transfer` topic with the watched address as recipient
//! - native deposits: full blocks via `eth_getBlockByNumber`, cached briefly
//!   so that many addresses share one fetch per block
//! - inclusion: `eth_getTransactionReceipt`; reverted transactions never
//!   confirm

use async_trait::async_trait;
use cached::{Cached, TimedCache};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::ScannerError;
use super::scanner::{ChainScanner, DetectedTransfer, NodeHealth, from_base_units};
use crate::chain::{ChainParams, TokenParams};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const BLOCK_CACHE_SECS: u64 = 120;

pub struct EvmScanner {
    chain: String,
    rpc_url: String,
    client: reqwest::Client,
    native: Option<TokenParams>,
    /// Lowercase contract address -> token
    contracts: BTreeMap<String, TokenParams>,
    blocks: Mutex<TimedCache<u64, Arc<Vec<NativeTx>>>>,
    next_id: AtomicU64,
}

#[derive(Debug, Clone)]
struct NativeTx {
    hash: String,
    from: Option<String>,
    to: String,
    value: u128,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct EthHeader {
    number: String,
    timestamp: String,
}

#[derive(Deserialize, Debug)]
struct EthBlock {
    #[serde(default)]
    transactions: Vec<EthTransaction>,
}

#[derive(Deserialize, Debug)]
struct EthTransaction {
    hash: String,
    from: Option<String>,
    to: Option<String>,
    value: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    #[serde(default)]
    removed: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

pub fn parse_hex_u64(value: &str) -> Result<u64, ScannerError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| ScannerError::Parse(format!("hex quantity {}: {}", value, e)))
}

/// Parse a hex quantity or a 32-byte word into `u128`
pub fn parse_hex_u128(value: &str) -> Result<u128, ScannerError> {
    let digits = value.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 32 {
        return Err(ScannerError::Parse(format!("hex value {} overflows", value)));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ScannerError::Parse(format!("hex value {}: {}", value, e)))
}

/// Left-pad an address into a 32-byte log topic
pub fn address_topic(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
}

/// Recover the address from a 32-byte log topic
pub fn topic_address(topic: &str) -> String {
    let body = topic.trim_start_matches("0x");
    format!("0x{}", &body[body.len().saturating_sub(40)..]).to_lowercase()
}

impl EvmScanner {
    pub fn new(params: &ChainParams, timeout: Duration) -> Result<Self, ScannerError> {
        let rpc_url = params
            .rpc_url
            .clone()
            .ok_or_else(|| ScannerError::Config(format!("{}: rpc_url is not set", params.slug)))?;

        info!(chain = %params.slug, rpc_url = %rpc_url, "Initializing EVM scanner");

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ScannerError::RpcConnection(format!("Failed to create HTTP client: {}", e))
            })?;

        let contracts = params
            .tokens
            .iter()
            .filter_map(|t| t.contract.as_ref().map(|c| (c.to_lowercase(), t.clone())))
            .collect();

        Ok(Self {
            chain: params.slug.clone(),
            rpc_url,
            client,
            native: params.native_token().cloned(),
            contracts,
            blocks: Mutex::new(TimedCache::with_lifespan(BLOCK_CACHE_SECS)),
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc_call<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<Option<R>, ScannerError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response: JsonRpcResponse<R> = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| ScannerError::Parse(format!("{} response: {}", method, e)))?;

        if let Some(error) = response.error {
            return Err(ScannerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    async fn rpc_required<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<R, ScannerError> {
        self.rpc_call(method, params)
            .await?
            .ok_or_else(|| ScannerError::RpcConnection(format!("{}: empty result", method)))
    }

    fn cached_block(&self, height: u64) -> Option<Arc<Vec<NativeTx>>> {
        self.blocks.lock().ok()?.cache_get(&height).cloned()
    }

    async fn native_block(&self, height: u64) -> Result<Arc<Vec<NativeTx>>, ScannerError> {
        if let Some(hit) = self.cached_block(height) {
            return Ok(hit);
        }

        let block: EthBlock = self
            .rpc_required("eth_getBlockByNumber", json!([format!("0x{:x}", height), true]))
            .await?;
        let mut txs = Vec::new();
        for tx in block.transactions {
            let Some(to) = tx.to else { continue };
            let value = parse_hex_u128(&tx.value)?;
            if value > 0 {
                txs.push(NativeTx {
                    hash: tx.hash.to_lowercase(),
                    from: tx.from.map(|f| f.to_lowercase()),
                    to: to.to_lowercase(),
                    value,
                });
            }
        }
        let txs = Arc::new(txs);
        self.store_block(height, txs.clone());
        Ok(txs)
    }

    fn store_block(&self, height: u64, txs: Arc<Vec<NativeTx>>) {
        if let Ok(mut cache) = self.blocks.lock() {
            cache.cache_set(height, txs);
        }
    }

    async fn native_transfers(
        &self,
        token: &TokenParams,
        address: &str,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<DetectedTransfer>, ScannerError> {
        let mut found = Vec::new();
        for height in blocks {
            for tx in self.native_block(height).await?.iter() {
                if tx.to == address {
                    found.push(DetectedTransfer {
                        tx_hash: tx.hash.clone(),
                        to_address: address.to_string(),
                        from_address: tx.from.clone(),
                        currency: token.symbol.clone(),
                        amount: from_base_units(tx.value, token.decimals)?,
                        block_number: height,
                    });
                }
            }
        }
        Ok(found)
    }

    async fn token_transfers(
        &self,
        address: &str,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<DetectedTransfer>, ScannerError> {
        let filter = json!([{
            "fromBlock": format!("0x{:x}", blocks.start()),
            "toBlock": format!("0x{:x}", blocks.end()),
            "address": self.contracts.keys().collect::<Vec<_>>(),
            "topics": [TRANSFER_TOPIC, Value::Null, address_topic(address)],
        }]);
        let logs: Vec<EthLog> = self.rpc_call("eth_getLogs", filter).await?.unwrap_or_default();

        // One deposit per (tx, token): multiple Transfer logs are summed
        let mut by_tx: BTreeMap<(String, String), DetectedTransfer> = BTreeMap::new();
        for log in logs {
            if log.removed || log.topics.len() < 3 {
                continue;
            }
            let Some(token) = self.contracts.get(&log.address.to_lowercase()) else {
                continue;
            };
            let (Some(tx_hash), Some(block)) = (log.transaction_hash, log.block_number) else {
                continue;
            };
            let amount = from_base_units(parse_hex_u128(&log.data)?, token.decimals)?;
            let tx_hash = tx_hash.to_lowercase();
            by_tx
                .entry((tx_hash.clone(), token.symbol.clone()))
                .and_modify(|t| t.amount += amount)
                .or_insert(DetectedTransfer {
                    tx_hash,
                    to_address: address.to_string(),
                    from_address: Some(topic_address(&log.topics[1])),
                    currency: token.symbol.clone(),
                    amount,
                    block_number: parse_hex_u64(&block)?,
                });
        }
        Ok(by_tx.into_values().collect())
    }
}

#[async_trait]
impl ChainScanner for EvmScanner {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn health_check(&self) -> Result<NodeHealth, ScannerError> {
        let header: EthHeader = self
            .rpc_required("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        Ok(NodeHealth {
            block_height: parse_hex_u64(&header.number)?,
            block_time: parse_hex_u64(&header.timestamp)? as i64,
        })
    }

    async fn get_latest_height(&self) -> Result<u64, ScannerError> {
        let height: String = self.rpc_required("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&height)
    }

    async fn transfers_to(
        &self,
        address: &str,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<DetectedTransfer>, ScannerError> {
        let address = address.to_lowercase();
        let mut found = Vec::new();
        if !self.contracts.is_empty() {
            found.extend(self.token_transfers(&address, blocks.clone()).await?);
        }
        if let Some(native) = &self.native {
            found.extend(self.native_transfers(native, &address, blocks).await?);
        }
        debug!(chain = %self.chain, address = %address, found = found.len(), "EVM address scanned");
        Ok(found)
    }

    async fn inclusion_height(&self, tx_hash: &str) -> Result<Option<u64>, ScannerError> {
        let receipt: Option<EthReceipt> = self
            .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        if receipt.status.as_deref() == Some("0x0") {
            warn!(chain = %self.chain, tx_hash = %tx_hash, "Transaction reverted");
            return Ok(None);
        }
        receipt.block_number.as_deref().map(parse_hex_u64).transpose()
    }
}
