//! Address format validation
//!
//! Format-level checks only (charset, prefix, length). Checksum validation is
//! left to the broadcaster, which rejects malformed outputs before signing.

use super::registry::ChainFamily;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Validate an address format for the given chain family
pub fn validate_address(family: ChainFamily, address: &str) -> bool {
    match family {
        ChainFamily::Evm => is_evm_address(address),
        ChainFamily::Utxo => is_bech32_address(address) || is_base58_address(address),
    }
}

/// Canonical form used for storage and matching.
///
/// EVM addresses are case-insensitive (EIP-55 casing is only a checksum), so
/// they are stored lowercase. UTXO addresses are kept verbatim: base58 is
/// case-sensitive.
pub fn normalize_address(family: ChainFamily, address: &str) -> String {
    let trimmed = address.trim();
    match family {
        ChainFamily::Evm => trimmed.to_lowercase(),
        ChainFamily::Utxo if is_bech32_address(&trimmed.to_lowercase()) => trimmed.to_lowercase(),
        ChainFamily::Utxo => trimmed.to_string(),
    }
}

fn is_evm_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
        None => false,
    }
}

fn is_bech32_address(address: &str) -> bool {
    let lower = address.to_lowercase();
    // Mixed case is invalid in bech32
    if lower != address && address.to_uppercase() != address {
        return false;
    }
    let Some((hrp, data)) = lower.rsplit_once('1') else {
        return false;
    };
    if !matches!(hrp, "bc" | "tb" | "bcrt") {
        return false;
    }
    (14..=74).contains(&lower.len())
        && data.len() >= 6
        && data.chars().all(|c| BECH32_CHARSET.contains(c))
}

fn is_base58_address(address: &str) -> bool {
    let first_ok = matches!(address.chars().next(), Some('1' | '3' | 'm' | 'n' | '2'));
    first_ok
        && (26..=35).contains(&address.len())
        && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}
