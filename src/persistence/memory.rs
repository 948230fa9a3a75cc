//! In-process registry store.
//!
//! [`InMemoryStore`] keeps memberships, reports and ledger rows in vectors
//! behind one mutex, so every operation (including the two writes of
//! `record_report`) is atomic. It can be switched into an unavailable mode
//! in which every call fails like an exhausted connection pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::BoxFuture;

use super::connection_pool::PoolError;
use super::models::{EventLog, NewEventLog, WeatherReport};
use super::{RegistryStore, StoreError};
use crate::domain::{Membership, MembershipStatus};

#[derive(Debug, Default)]
struct Tables {
    memberships: Vec<Membership>,
    reports: Vec<WeatherReport>,
    event_logs: Vec<EventLog>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Registry store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`PoolError::Empty`] while
    /// `unavailable` is `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Inserts or overwrites a membership directly, bypassing the watcher.
    pub fn seed_membership(&self, address: &str, status: MembershipStatus, last_call: i64) -> Membership {
        let mut tables = self.lock();
        if let Some(existing) = tables
            .memberships
            .iter_mut()
            .find(|m| m.matches_address(address))
        {
            existing.status = status;
            existing.last_call = last_call;
            return existing.clone();
        }
        let membership = Membership {
            id: tables.next_id(),
            address: address.to_string(),
            status,
            last_call,
        };
        tables.memberships.push(membership.clone());
        membership
    }

    /// Snapshot of all memberships.
    #[must_use]
    pub fn memberships(&self) -> Vec<Membership> {
        self.lock().memberships.clone()
    }

    /// Snapshot of all weather reports.
    #[must_use]
    pub fn reports(&self) -> Vec<WeatherReport> {
        self.lock().reports.clone()
    }

    /// Snapshot of the event ledger.
    #[must_use]
    pub fn event_logs(&self) -> Vec<EventLog> {
        self.lock().event_logs.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Pool(PoolError::Empty));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistryStore for InMemoryStore {
    fn find_membership<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Option<Membership>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .memberships
                .iter()
                .find(|m| m.matches_address(address))
                .cloned())
        })
    }

    fn create_membership<'a>(
        &'a self,
        address: &'a str,
        status: MembershipStatus,
    ) -> BoxFuture<'a, Result<Membership, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut tables = self.lock();
            if tables.memberships.iter().any(|m| m.matches_address(address)) {
                return Err(StoreError::InvalidRecord(format!(
                    "membership {address} already exists"
                )));
            }
            let membership = Membership {
                id: tables.next_id(),
                address: address.to_string(),
                status,
                last_call: 0,
            };
            tables.memberships.push(membership.clone());
            Ok(membership)
        })
    }

    fn update_membership_status<'a>(
        &'a self,
        address: &'a str,
        status: MembershipStatus,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut tables = self.lock();
            let membership = tables
                .memberships
                .iter_mut()
                .find(|m| m.matches_address(address))
                .ok_or_else(|| StoreError::MembershipNotFound(address.to_string()))?;
            membership.status = status;
            Ok(())
        })
    }

    fn append_event_log<'a>(
        &'a self,
        entry: &'a NewEventLog,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut tables = self.lock();
            let id = tables.next_id();
            tables.event_logs.push(EventLog {
                id,
                chain_name: entry.chain_name.clone(),
                block_height: entry.block_height,
                transaction_hash: entry.transaction_hash.clone(),
                address: entry.address.clone(),
                created_at: Utc::now().timestamp(),
            });
            Ok(id)
        })
    }

    fn last_event_height<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .lock()
                .event_logs
                .iter()
                .filter(|log| log.chain_name == chain_name)
                .map(|log| log.block_height)
                .max())
        })
    }

    fn record_report<'a>(
        &'a self,
        membership_id: i64,
        report: &'a str,
        expected_last_call: i64,
        called_at: i64,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut tables = self.lock();
            let membership = tables
                .memberships
                .iter_mut()
                .find(|m| m.id == membership_id)
                .ok_or_else(|| StoreError::MembershipNotFound(membership_id.to_string()))?;
            if membership.last_call != expected_last_call {
                return Err(StoreError::LastCallChanged(membership_id));
            }
            membership.last_call = called_at;
            let id = tables.next_id();
            tables.reports.push(WeatherReport {
                id,
                membership_id,
                report: report.to_string(),
            });
            Ok(id)
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let store = InMemoryStore::new();
        store.seed_membership("0xAbCd", MembershipStatus::Registered, 0);

        let found = store.find_membership("0xabcd").await;
        let Ok(Some(membership)) = found else {
            panic!("membership should be found");
        };
        assert_eq!(membership.address, "0xAbCd");
    }

    #[tokio::test]
    async fn record_report_updates_last_call_with_the_report() {
        let store = InMemoryStore::new();
        let membership = store.seed_membership("0x01", MembershipStatus::Registered, 0);

        tokio_test::assert_ok!(store.record_report(membership.id, "sunny", 0, 1_000).await);
        assert_eq!(store.reports().len(), 1);
        assert_eq!(
            store.memberships().first().map(|m| m.last_call),
            Some(1_000)
        );
    }

    #[tokio::test]
    async fn record_report_for_unknown_membership_writes_nothing() {
        let store = InMemoryStore::new();
        let result = store.record_report(99, "rain", 0, 1_000).await;
        assert!(matches!(result, Err(StoreError::MembershipNotFound(_))));
        assert!(store.reports().is_empty());
    }

    #[tokio::test]
    async fn record_report_refuses_a_moved_last_call() {
        let store = InMemoryStore::new();
        let membership = store.seed_membership("0x01", MembershipStatus::Registered, 500);

        tokio_test::assert_ok!(store.record_report(membership.id, "sunny", 500, 513).await);
        let second = store.record_report(membership.id, "sunny", 500, 514).await;

        assert!(matches!(second, Err(StoreError::LastCallChanged(id)) if id == membership.id));
        assert_eq!(store.reports().len(), 1);
        assert_eq!(store.memberships().first().map(|m| m.last_call), Some(513));
    }

    #[tokio::test]
    async fn unavailable_store_fails_fast() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let result = store.last_event_height("ARB").await;
        assert!(matches!(result, Err(StoreError::Pool(PoolError::Empty))));
    }

    #[tokio::test]
    async fn last_event_height_is_per_chain_maximum() {
        let store = InMemoryStore::new();
        for (chain, height) in [("ARB", 10), ("ARB", 30), ("ARB", 20), ("ETH", 99)] {
            let entry = NewEventLog {
                chain_name: chain.to_string(),
                block_height: height,
                transaction_hash: "0x00".to_string(),
                address: String::new(),
            };
            tokio_test::assert_ok!(store.append_event_log(&entry).await);
        }
        assert!(matches!(store.last_event_height("ARB").await, Ok(Some(30))));
        assert!(matches!(store.last_event_height("BSC").await, Ok(None)));
    }
}
