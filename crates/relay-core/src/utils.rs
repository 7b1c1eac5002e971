//! Small hex and address helpers shared across the workspace.

use ethers_core::types::{Address, H256};

/// Validate and normalize a 0x-prefixed 32-byte transaction hash.
///
/// Accepts any hex casing and returns the lowercase form, which is the only
/// form the store and the upstream API ever see. Returns `None` when the
/// input is not exactly `0x` + 64 hex digits.
pub fn normalize_tx_hash(raw: &str) -> Option<String> {
    let hex_part = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex_part.to_ascii_lowercase()))
}

/// Derive an address from a bytes32 word by taking its low 20 bytes.
pub fn address_from_bytes32(word: H256) -> Address {
    Address::from_slice(&word.as_bytes()[12..])
}

/// Left-pad an address to its bytes32 form.
pub fn bytes32_from_address(address: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256::from(word)
}

/// Strip an optional `0x` prefix and hex-decode.
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
}
