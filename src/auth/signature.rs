//! Typed structured-data signatures over weather reports.
//!
//! A client signs the digest
//! `keccak256(0x1901 ‖ domainSeparator ‖ structHash)` where the domain is
//! `{name: "WeatherReport", version: "1", chainId, verifyingContract}` and
//! the message is `WeatherReport(string address,string report)`.
//!
//! Verification recovers the signer's public key from that digest, derives
//! the checksummed account address from it, and compares it to the address
//! claimed in the request without regard to case.

use std::sync::LazyLock;

use alloy::primitives::{Address, B256, U256, keccak256};
use alloy::signers::Signature;
use alloy::sol_types::Eip712Domain;

use crate::domain::address::{address_from_uncompressed_key, checksum_encode};

/// Name of the signing domain.
pub const DOMAIN_NAME: &str = "WeatherReport";

/// Version of the signing domain.
pub const DOMAIN_VERSION: &str = "1";

/// Canonical type string of the signed message.
pub const REPORT_TYPE: &str = "WeatherReport(string address,string report)";

/// Length of an `r ‖ s ‖ v` signature.
pub const SIGNATURE_LEN: usize = 65;

static REPORT_TYPE_HASH: LazyLock<B256> = LazyLock::new(|| keccak256(REPORT_TYPE));

/// Reasons a report signature is not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// The signature is not 65 bytes of hex or has an invalid `v`.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// No public key could be recovered from the digest and signature.
    #[error("signer recovery failed: {0}")]
    Recovery(String),

    /// The recovered signer is not the claimed address.
    #[error("signer {recovered} does not match claimed address")]
    SignerMismatch {
        /// Checksummed address actually recovered.
        recovered: String,
    },
}

/// Domain a report signature is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningDomain {
    domain: Eip712Domain,
}

impl SigningDomain {
    /// Builds the domain for a registry contract on the given chain.
    #[must_use]
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            domain: Eip712Domain::new(
                Some(DOMAIN_NAME.into()),
                Some(DOMAIN_VERSION.into()),
                Some(U256::from(chain_id)),
                Some(verifying_contract),
                None,
            ),
        }
    }

    /// Returns the domain separator hash.
    #[must_use]
    pub fn separator(&self) -> B256 {
        self.domain.separator()
    }

    /// Returns the digest a client signs for `(address, report)`.
    ///
    /// `address` is hashed exactly as submitted, so the client must sign
    /// the same string it sends.
    #[must_use]
    pub fn signing_hash(&self, address: &str, report: &str) -> B256 {
        let mut struct_data = Vec::with_capacity(3 * 32);
        struct_data.extend_from_slice(REPORT_TYPE_HASH.as_slice());
        struct_data.extend_from_slice(keccak256(address).as_slice());
        struct_data.extend_from_slice(keccak256(report).as_slice());
        let struct_hash = keccak256(&struct_data);

        let mut digest_input = Vec::with_capacity(2 + 2 * 32);
        digest_input.extend_from_slice(&[0x19, 0x01]);
        digest_input.extend_from_slice(self.separator().as_slice());
        digest_input.extend_from_slice(struct_hash.as_slice());
        keccak256(&digest_input)
    }

    /// Checks that `signature` over `(address, report)` was produced by
    /// the key behind `address`.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError`] if the signature is malformed, no key
    /// can be recovered, or the recovered signer differs from `address`.
    pub fn verify(
        &self,
        address: &str,
        report: &str,
        signature: &str,
    ) -> Result<(), VerificationError> {
        let signature = parse_signature(signature)?;
        let digest = self.signing_hash(address, report);
        let recovered = recover_checksummed(&signature, &digest)?;

        if recovered.eq_ignore_ascii_case(address) {
            Ok(())
        } else {
            Err(VerificationError::SignerMismatch { recovered })
        }
    }
}

/// Decodes a hex `r ‖ s ‖ v` signature, accepting `v` as 0/1 or 27/28.
fn parse_signature(signature: &str) -> Result<Signature, VerificationError> {
    let bytes = alloy::hex::decode(signature)
        .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(VerificationError::MalformedSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let (r, tail) = bytes.split_at(32);
    let (s, v) = tail.split_at(32);
    let v = v
        .first()
        .copied()
        .ok_or_else(|| VerificationError::MalformedSignature("missing v".to_string()))?;
    let v = if v >= 27 { v - 27 } else { v };
    let parity = match v {
        0 => false,
        1 => true,
        other => {
            return Err(VerificationError::MalformedSignature(format!(
                "invalid recovery id {other}"
            )));
        }
    };

    Ok(Signature::new(
        U256::from_be_slice(r),
        U256::from_be_slice(s),
        parity,
    ))
}

/// Recovers the signer and returns its checksummed address.
fn recover_checksummed(signature: &Signature, digest: &B256) -> Result<String, VerificationError> {
    let key = signature
        .recover_from_prehash(digest)
        .map_err(|e| VerificationError::Recovery(e.to_string()))?;
    let point = key.to_encoded_point(false);
    let account = address_from_uncompressed_key(point.as_bytes())
        .map_err(|e| VerificationError::Recovery(e.to_string()))?;
    checksum_encode(&account).map_err(|e| VerificationError::Recovery(e.to_string()))
}
