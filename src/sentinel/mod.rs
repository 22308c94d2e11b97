//! Sentinel: chain scanners and the scan/confirm worker
//!
//! One scanner per chain family:
//! - [`eth::EvmScanner`] - account-model chains over JSON-RPC
//! - [`btc::UtxoScanner`] - output-based chains over Esplora REST
//! - [`mock::MockScanner`] - in-process chain for tests and local runs

pub mod btc;
pub mod error;
pub mod eth;
pub mod mock;
pub mod scanner;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::chain::{ChainFamily, ChainRegistry};
use crate::config::ScannerConfig;

pub use btc::UtxoScanner;
pub use error::ScannerError;
pub use eth::EvmScanner;
pub use mock::MockScanner;
pub use scanner::{ChainScanner, DetectedTransfer, NodeHealth, confirmations_at};
pub use worker::{ChainCycleReport, ConfirmationReport, ScanReport, SentinelWorker};

/// One scanner per registry chain. Chains without an RPC endpoint are
/// skipped unless the mock scanner is configured.
pub fn build_scanners(
    registry: &ChainRegistry,
    config: &ScannerConfig,
) -> Result<Vec<Arc<dyn ChainScanner>>, ScannerError> {
    let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
    let mut scanners: Vec<Arc<dyn ChainScanner>> = Vec::new();
    for chain in registry.chains() {
        if config.mock {
            scanners.push(Arc::new(MockScanner::new(&chain.slug, 0)));
            continue;
        }
        if chain.rpc_url.is_none() {
            warn!(chain = %chain.slug, "No rpc_url configured, chain not scanned");
            continue;
        }
        match chain.family {
            ChainFamily::Evm => scanners.push(Arc::new(EvmScanner::new(chain, timeout)?)),
            ChainFamily::Utxo => scanners.push(Arc::new(UtxoScanner::new(chain, timeout)?)),
        }
    }
    Ok(scanners)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_scanners() {
        let registry = ChainRegistry::builtin().unwrap();
        let mut config = ScannerConfig::default();
        assert!(build_scanners(&registry, &config).unwrap().is_empty());

        config.mock = true;
        let scanners = build_scanners(&registry, &config).unwrap();
        assert_eq!(scanners.len(), registry.len());
        assert!(scanners.iter().any(|s| s.chain() == "bitcoin"));
    }
}
