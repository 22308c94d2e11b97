//! UTXO Scanner
//!
//! Output-based chains through an Esplora-compatible REST API. A deposit is
//! one transaction paying the watched address; several outputs to the same
//! address in one transaction are summed.

use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{debug, info};

use super::error::ScannerError;
use super::scanner::{ChainScanner, DetectedTransfer, NodeHealth, from_base_units};
use crate::chain::{ChainParams, TokenParams};

/// Esplora returns confirmed history in pages of this size
const PAGE_SIZE: usize = 25;
/// Pages followed per address per scan
const MAX_PAGES: usize = 40;

pub struct UtxoScanner {
    chain: String,
    base_url: String,
    client: reqwest::Client,
    token: TokenParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraTx {
    txid: String,
    status: EsploraTxStatus,
    #[serde(default)]
    vin: Vec<EsploraVin>,
    #[serde(default)]
    vout: Vec<EsploraVout>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraVin {
    prevout: Option<EsploraVout>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraVout {
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraBlock {
    height: u64,
    timestamp: i64,
}

impl UtxoScanner {
    pub fn new(params: &ChainParams, timeout: Duration) -> Result<Self, ScannerError> {
        let base_url = params
            .rpc_url
            .as_deref()
            .ok_or_else(|| ScannerError::Config(format!("{}: rpc_url is not set", params.slug)))?
            .trim_end_matches('/')
            .to_string();
        let token = params
            .native_token()
            .cloned()
            .ok_or_else(|| ScannerError::Config(format!("{}: no native token", params.slug)))?;

        info!(chain = %params.slug, base_url = %base_url, "Initializing UTXO scanner");

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ScannerError::RpcConnection(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            chain: params.slug.clone(),
            base_url,
            client,
            token,
        })
    }

    async fn get_text(&self, path: &str) -> Result<String, ScannerError> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ScannerError> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| ScannerError::Parse(format!("{}: {}", path, e)))
    }

    /// Confirmed history newest first, stopping once below `from_height`
    async fn confirmed_history(
        &self,
        address: &str,
        from_height: u64,
    ) -> Result<Vec<EsploraTx>, ScannerError> {
        let mut history = Vec::new();
        let mut last_seen: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let path = match &last_seen {
                None => format!("/address/{}/txs/chain", address),
                Some(txid) => format!("/address/{}/txs/chain/{}", address, txid),
            };
            let page: Vec<EsploraTx> = self.get_json(&path).await?;
            let exhausted = page.len() < PAGE_SIZE;
            let oldest = page.last().and_then(|tx| tx.status.block_height);
            last_seen = page.last().map(|tx| tx.txid.clone());
            history.extend(page);
            if exhausted || oldest.is_none_or(|h| h < from_height) {
                break;
            }
        }
        Ok(history)
    }

    fn to_transfer(
        &self,
        tx: &EsploraTx,
        address: &str,
    ) -> Result<Option<DetectedTransfer>, ScannerError> {
        let (true, Some(height)) = (tx.status.confirmed, tx.status.block_height) else {
            return Ok(None);
        };
        let sats: u64 = tx
            .vout
            .iter()
            .filter(|o| o.scriptpubkey_address.as_deref() == Some(address))
            .map(|o| o.value)
            .sum();
        if sats == 0 {
            return Ok(None);
        }
        let from_address = tx
            .vin
            .iter()
            .find_map(|i| i.prevout.as_ref().and_then(|p| p.scriptpubkey_address.clone()));
        Ok(Some(DetectedTransfer {
            tx_hash: tx.txid.to_lowercase(),
            to_address: address.to_string(),
            from_address,
            currency: self.token.symbol.clone(),
            amount: from_base_units(u128::from(sats), self.token.decimals)?,
            block_number: height,
        }))
    }
}

#[async_trait]
impl ChainScanner for UtxoScanner {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn health_check(&self) -> Result<NodeHealth, ScannerError> {
        let hash = self.get_text("/blocks/tip/hash").await?;
        let block: EsploraBlock = self.get_json(&format!("/block/{}", hash.trim())).await?;
        Ok(NodeHealth {
            block_height: block.height,
            block_time: block.timestamp,
        })
    }

    async fn get_latest_height(&self) -> Result<u64, ScannerError> {
        self.get_text("/blocks/tip/height")
            .await?
            .trim()
            .parse()
            .map_err(|_| ScannerError::Parse("Failed to parse block height".to_string()))
    }

    async fn transfers_to(
        &self,
        address: &str,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<DetectedTransfer>, ScannerError> {
        let history = self.confirmed_history(address, *blocks.start()).await?;
        let mut found = Vec::new();
        for tx in &history {
            if let Some(transfer) = self.to_transfer(tx, address)?
                && blocks.contains(&transfer.block_number)
            {
                found.push(transfer);
            }
        }
        debug!(
            chain = %self.chain,
            address = %address,
            found = found.len(),
            "UTXO address scanned"
        );
        Ok(found)
    }

    async fn inclusion_height(&self, tx_hash: &str) -> Result<Option<u64>, ScannerError> {
        let status: EsploraTxStatus = self.get_json(&format!("/tx/{}/status", tx_hash)).await?;
        Ok(if status.confirmed {
            status.block_height
        } else {
            None
        })
    }
}
