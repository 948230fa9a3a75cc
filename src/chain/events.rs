//! Decoding of raw registry logs into [`ChainEvent`]s.

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

use crate::domain::{ChainEvent, RegistryEvent};

#[allow(missing_docs)]
mod abi {
    alloy::sol! {
        event ParticipantRegistered(address indexed participant);
        event ParticipantResigned(address indexed participant);
    }
}

pub use abi::{ParticipantRegistered, ParticipantResigned};

/// Reasons a log cannot be turned into a [`ChainEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Pending logs have no block number.
    #[error("log has no block number")]
    MissingBlockNumber,

    /// Pending logs have no transaction hash.
    #[error("log has no transaction hash")]
    MissingTransactionHash,

    /// A known event arrived without its indexed participant topic.
    #[error("{0} log has no participant topic")]
    MissingParticipant(&'static str),
}

/// Decodes a registry log.
///
/// Logs whose first topic matches neither registry event decode to
/// [`RegistryEvent::Unrecognized`] rather than failing.
///
/// # Errors
///
/// Returns [`DecodeError`] if the log lacks chain coordinates or a known
/// event lacks its participant topic.
pub fn decode_log(log: &Log) -> Result<ChainEvent, DecodeError> {
    let block_height = log.block_number.ok_or(DecodeError::MissingBlockNumber)?;
    let transaction_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingTransactionHash)?;

    let topics = log.inner.data.topics();
    let participant = |name: &'static str| {
        topics
            .get(1)
            .map(|word| Address::from_word(*word))
            .ok_or(DecodeError::MissingParticipant(name))
    };

    let event = match topics.first() {
        Some(sig) if *sig == ParticipantRegistered::SIGNATURE_HASH => {
            RegistryEvent::ParticipantRegistered {
                participant: participant(ParticipantRegistered::SIGNATURE)?,
            }
        }
        Some(sig) if *sig == ParticipantResigned::SIGNATURE_HASH => {
            RegistryEvent::ParticipantResigned {
                participant: participant(ParticipantResigned::SIGNATURE)?,
            }
        }
        other => RegistryEvent::Unrecognized {
            signature: other.copied(),
        },
    };

    Ok(ChainEvent {
        block_height,
        transaction_hash,
        event,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use alloy::primitives::{B256, Bytes, LogData};

    use super::*;

    pub(crate) fn registry_log(topics: Vec<B256>, block: u64, tx: u8) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xAA),
                data: LogData::new_unchecked(topics, Bytes::new()),
            },
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(tx)),
            ..Default::default()
        }
    }

    pub(crate) fn registered_log(participant: Address, block: u64) -> Log {
        registry_log(
            vec![ParticipantRegistered::SIGNATURE_HASH, participant.into_word()],
            block,
            1,
        )
    }

    pub(crate) fn resigned_log(participant: Address, block: u64) -> Log {
        registry_log(
            vec![ParticipantResigned::SIGNATURE_HASH, participant.into_word()],
            block,
            2,
        )
    }

    #[test]
    fn signature_hashes_match_event_declarations() {
        assert_eq!(
            ParticipantRegistered::SIGNATURE,
            "ParticipantRegistered(address)"
        );
        assert_eq!(
            ParticipantRegistered::SIGNATURE_HASH,
            alloy::primitives::keccak256("ParticipantRegistered(address)")
        );
    }

    #[test]
    fn decodes_registered() {
        let who = Address::repeat_byte(0x11);
        let decoded = decode_log(&registered_log(who, 42));
        assert_eq!(
            decoded,
            Ok(ChainEvent {
                block_height: 42,
                transaction_hash: B256::repeat_byte(1),
                event: RegistryEvent::ParticipantRegistered { participant: who },
            })
        );
    }

    #[test]
    fn decodes_resigned() {
        let who = Address::repeat_byte(0x22);
        let decoded = decode_log(&resigned_log(who, 7)).map(|e| e.event);
        assert_eq!(
            decoded,
            Ok(RegistryEvent::ParticipantResigned { participant: who })
        );
    }

    #[test]
    fn unknown_signature_is_unrecognized() {
        let sig = B256::repeat_byte(0x99);
        let decoded = decode_log(&registry_log(vec![sig], 3, 3)).map(|e| e.event);
        assert_eq!(
            decoded,
            Ok(RegistryEvent::Unrecognized {
                signature: Some(sig)
            })
        );
    }

    #[test]
    fn known_event_without_participant_is_rejected() {
        let log = registry_log(vec![ParticipantResigned::SIGNATURE_HASH], 3, 3);
        assert_eq!(
            decode_log(&log),
            Err(DecodeError::MissingParticipant("ParticipantResigned(address)"))
        );
    }

    #[test]
    fn pending_log_is_rejected() {
        let mut log = registered_log(Address::ZERO, 1);
        log.block_number = None;
        assert_eq!(decode_log(&log), Err(DecodeError::MissingBlockNumber));
    }
}
