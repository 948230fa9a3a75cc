//! Registry membership aggregate.
//!
//! A [`Membership`] row exists for every address the chain watcher has seen
//! in a registry event. Its [`MembershipStatus`] mirrors the latest event
//! for that address; `last_call` is owned by the report ingestion path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle state of a registry participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum MembershipStatus {
    /// Known address that is not (yet) part of the registry.
    Unregistered,
    /// Address registered on-chain; allowed to submit reports.
    Registered,
    /// Address that left the registry.
    Resigned,
}

impl MembershipStatus {
    /// Returns the canonical string stored in the `memberships.status` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unregistered => "Unregistered",
            Self::Registered => "Registered",
            Self::Resigned => "Resigned",
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown membership status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for MembershipStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unregistered" => Ok(Self::Unregistered),
            "Registered" => Ok(Self::Registered),
            "Resigned" => Ok(Self::Resigned),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A registry participant as persisted in the `memberships` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
    /// Surrogate row id, referenced by weather reports.
    pub id: i64,
    /// EIP-55 checksummed participant address. Unique.
    pub address: String,
    /// Status implied by the most recent registry event.
    pub status: MembershipStatus,
    /// Unix seconds of the last accepted report, `0` if none.
    pub last_call: i64,
}

impl Membership {
    /// Returns `true` when the participant may submit reports.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.status == MembershipStatus::Registered
    }

    /// Returns `true` if `address` designates this membership.
    ///
    /// Addresses compare case-insensitively so checksummed and lowercase
    /// renderings of the same account match.
    #[must_use]
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}
