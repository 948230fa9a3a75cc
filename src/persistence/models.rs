//! Database models for weather reports and the chain event ledger.

/// A stored row from the `weather_reports` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherReport {
    /// Auto-increment row ID.
    pub id: i64,
    /// Membership that submitted the report.
    pub membership_id: i64,
    /// Opaque report payload.
    pub report: String,
}

/// A stored row from the `event_logs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    /// Auto-increment row ID.
    pub id: i64,
    /// Upper-cased chain name the event was observed on.
    pub chain_name: String,
    /// Block that included the event.
    pub block_height: u64,
    /// `0x`-prefixed transaction hash.
    pub transaction_hash: String,
    /// Subject address, empty for unrecognized events.
    pub address: String,
    /// Unix seconds at which the watcher processed the event.
    pub created_at: i64,
}

/// Ledger entry to append after a chain event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventLog {
    /// Upper-cased chain name.
    pub chain_name: String,
    /// Block that included the event.
    pub block_height: u64,
    /// `0x`-prefixed transaction hash.
    pub transaction_hash: String,
    /// Subject address, empty for unrecognized events.
    pub address: String,
}
