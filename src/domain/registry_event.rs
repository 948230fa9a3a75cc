//! Registry contract events as a closed set of variants.

use alloy::primitives::{Address, B256};

use super::MembershipStatus;

/// Event emitted by the registry contract, decoded from a raw log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    /// `ParticipantRegistered(address indexed participant)`.
    ParticipantRegistered {
        /// Address that joined the registry.
        participant: Address,
    },
    /// `ParticipantResigned(address indexed participant)`.
    ParticipantResigned {
        /// Address that left the registry.
        participant: Address,
    },
    /// A log from the registry address whose signature is not handled.
    Unrecognized {
        /// First topic of the log, if any.
        signature: Option<B256>,
    },
}

impl RegistryEvent {
    /// Returns the subject address of the event, if it carries one.
    #[must_use]
    pub const fn participant(&self) -> Option<Address> {
        match self {
            Self::ParticipantRegistered { participant }
            | Self::ParticipantResigned { participant } => Some(*participant),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Returns the membership status this event moves its subject to.
    #[must_use]
    pub const fn implied_status(&self) -> Option<MembershipStatus> {
        match self {
            Self::ParticipantRegistered { .. } => Some(MembershipStatus::Registered),
            Self::ParticipantResigned { .. } => Some(MembershipStatus::Resigned),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Returns the event name as a static string slice.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ParticipantRegistered { .. } => "ParticipantRegistered",
            Self::ParticipantResigned { .. } => "ParticipantResigned",
            Self::Unrecognized { .. } => "Unrecognized",
        }
    }
}

/// A decoded registry event together with its chain coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEvent {
    /// Block that included the transaction.
    pub block_height: u64,
    /// Hash of the emitting transaction.
    pub transaction_hash: B256,
    /// Decoded event payload.
    pub event: RegistryEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_implies_registered_status() {
        let participant = Address::repeat_byte(0x11);
        let event = RegistryEvent::ParticipantRegistered { participant };
        assert_eq!(event.participant(), Some(participant));
        assert_eq!(event.implied_status(), Some(MembershipStatus::Registered));
        assert_eq!(event.name(), "ParticipantRegistered");
    }

    #[test]
    fn resigned_implies_resigned_status() {
        let event = RegistryEvent::ParticipantResigned {
            participant: Address::repeat_byte(0x22),
        };
        assert_eq!(event.implied_status(), Some(MembershipStatus::Resigned));
    }

    #[test]
    fn unrecognized_has_no_subject() {
        let event = RegistryEvent::Unrecognized { signature: None };
        assert_eq!(event.participant(), None);
        assert_eq!(event.implied_status(), None);
    }
}
