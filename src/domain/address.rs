//! Mixed-case checksum encoding for 20-byte account addresses.
//!
//! The encoding hashes the lowercase hex body with keccak-256 and
//! uppercases every letter whose matching hash nibble has its high bit set.

use alloy::primitives::keccak256;

/// Number of hex characters in an address body (without `0x`).
pub const ADDRESS_HEX_LEN: usize = 40;

/// Errors raised while checksumming an address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The body does not have exactly 40 characters.
    #[error("address must have {ADDRESS_HEX_LEN} hex characters, got {0}")]
    InvalidLength(usize),
    /// The body contains a non-hex character.
    #[error("address contains non-hex character {0:?}")]
    InvalidCharacter(char),
}

/// Encodes a hex address (with or without `0x`, any case) into its
/// mixed-case checksummed form, `0x`-prefixed.
///
/// # Errors
///
/// Returns [`AddressError`] if the body is not 40 hex characters.
pub fn checksum_encode(address: &str) -> Result<String, AddressError> {
    let body = address.strip_prefix("0x").unwrap_or(address);
    if body.len() != ADDRESS_HEX_LEN {
        return Err(AddressError::InvalidLength(body.len()));
    }
    if let Some(bad) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(AddressError::InvalidCharacter(bad));
    }

    let lower = body.to_ascii_lowercase();
    let hash = keccak256(lower.as_bytes());

    let mut encoded = String::with_capacity(ADDRESS_HEX_LEN + 2);
    encoded.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        // high bit of the high nibble for even positions, of the low nibble for odd ones
        let mask = (128 - 120 * (i % 2)) as u8;
        let uppercase = c.is_ascii_alphabetic() && hash.get(i / 2).is_some_and(|b| b & mask != 0);
        encoded.push(if uppercase { c.to_ascii_uppercase() } else { c });
    }
    Ok(encoded)
}

/// Derives the lowercase hex address (no prefix) of an uncompressed
/// secp256k1 public key in SEC1 form (`0x04 ‖ x ‖ y`).
///
/// # Errors
///
/// Returns [`AddressError::InvalidLength`] if `uncompressed` is not 65 bytes.
pub fn address_from_uncompressed_key(uncompressed: &[u8]) -> Result<String, AddressError> {
    let coordinates = match uncompressed.split_first() {
        Some((_, rest)) if uncompressed.len() == 65 => rest,
        _ => return Err(AddressError::InvalidLength(uncompressed.len())),
    };
    let hash = keccak256(coordinates);
    let account = hash.get(12..).unwrap_or_default();
    Ok(alloy::hex::encode(account))
}
