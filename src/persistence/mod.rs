//! Persistence layer: memberships, weather reports and the event ledger.
//!
//! Provides the [`RegistryStore`] trait used by both the chain watcher and
//! the request path. The production implementation
//! ([`postgres::PostgresStore`]) runs every call on a handle borrowed from
//! the bounded [`connection_pool::ConnectionPool`];
//! [`memory::InMemoryStore`] backs tests and local runs.

pub mod connection_pool;
pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt::Debug;

use futures_util::future::BoxFuture;

use crate::domain::{Membership, MembershipStatus};
use connection_pool::PoolError;
use models::NewEventLog;

/// Storage failures surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No database handle could be obtained.
    #[error("{0}")]
    Pool(#[from] PoolError),

    /// The database rejected or failed a query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the schema failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The referenced membership does not exist.
    #[error("membership not found: {0}")]
    MembershipNotFound(String),

    /// A stored row could not be mapped back into the domain.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    /// The membership's `last_call` moved since it was read, so another
    /// report claimed the same slot first.
    #[error("last call of membership {0} changed concurrently")]
    LastCallChanged(i64),
}

/// Membership store and event ledger.
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn RegistryStore>` between the watcher task and HTTP handlers.
pub trait RegistryStore: Debug + Send + Sync + 'static {
    /// Looks up a membership by address (case-insensitive).
    fn find_membership<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Option<Membership>, StoreError>>;

    /// Inserts a new membership with `last_call = 0`.
    fn create_membership<'a>(
        &'a self,
        address: &'a str,
        status: MembershipStatus,
    ) -> BoxFuture<'a, Result<Membership, StoreError>>;

    /// Sets the status of an existing membership.
    fn update_membership_status<'a>(
        &'a self,
        address: &'a str,
        status: MembershipStatus,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Appends a processed chain event to the ledger, returning its row id.
    fn append_event_log<'a>(&'a self, entry: &'a NewEventLog)
    -> BoxFuture<'a, Result<i64, StoreError>>;

    /// Highest block height recorded in the ledger for `chain_name`.
    fn last_event_height<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>, StoreError>>;

    /// Atomically inserts a weather report for `membership_id` and moves
    /// the membership's `last_call` from `expected_last_call` to
    /// `called_at`. Returns the report id.
    ///
    /// Fails with [`StoreError::LastCallChanged`], writing nothing, when the
    /// stored `last_call` no longer equals `expected_last_call`.
    fn record_report<'a>(
        &'a self,
        membership_id: i64,
        report: &'a str,
        expected_last_call: i64,
        called_at: i64,
    ) -> BoxFuture<'a, Result<i64, StoreError>>;

    /// Idle database handles, for stores backed by a connection pool.
    fn idle_connections(&self) -> Option<usize> {
        None
    }
}
