//! Report service: authentication, call window, and ingestion.

use std::sync::Arc;

use crate::auth::SigningDomain;
use crate::domain::{CallWindow, Membership, RateLimitError};
use crate::error::ServiceError;
use crate::persistence::{RegistryStore, StoreError};

/// Request-path orchestration for weather reports.
///
/// Each step maps to one stage of the `POST /report-weather` chain:
/// [`ReportService::authenticate`], [`ReportService::check_call_window`],
/// and [`ReportService::ingest`].
#[derive(Debug)]
pub struct ReportService {
    store: Arc<dyn RegistryStore>,
    domain: SigningDomain,
    window: CallWindow,
}

impl ReportService {
    /// Creates a new `ReportService`.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, domain: SigningDomain, window: CallWindow) -> Self {
        Self {
            store,
            domain,
            window,
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Verifies the signature and resolves the registered membership
    /// behind `address`. The store is not touched unless the signature
    /// verifies.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Verification`] if the signature does not verify.
    /// - [`ServiceError::Unauthorized`] if the address is unknown or not
    ///   registered.
    /// - [`ServiceError::Storage`] if the lookup fails.
    pub async fn authenticate(
        &self,
        address: &str,
        report: &str,
        signature: &str,
    ) -> Result<Membership, ServiceError> {
        self.domain.verify(address, report, signature)?;

        let membership = self
            .store
            .find_membership(address)
            .await?
            .ok_or(ServiceError::Unauthorized)?;

        if !membership.is_registered() {
            tracing::debug!(%address, status = %membership.status, "membership not registered");
            return Err(ServiceError::Unauthorized);
        }
        Ok(membership)
    }

    /// Applies the call window to `membership` at `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::RateLimited`] when the window refuses.
    pub fn check_call_window(&self, membership: &Membership, now: i64) -> Result<(), ServiceError> {
        self.window.check(membership.last_call, now)?;
        Ok(())
    }

    /// Stores `report` for `membership` and moves its `last_call` to `now`
    /// in one transaction. Returns the new report id.
    ///
    /// The write only lands if `last_call` still holds the value the call
    /// window was checked against, so two requests racing for one slot
    /// store one report.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::RateLimited`] if another report took the slot
    ///   since `membership` was read.
    /// - [`ServiceError::Storage`] if the transaction fails.
    ///
    /// Nothing is written in either case.
    pub async fn ingest(
        &self,
        membership: &Membership,
        report: &str,
        now: i64,
    ) -> Result<i64, ServiceError> {
        let id = match self
            .store
            .record_report(membership.id, report, membership.last_call, now)
            .await
        {
            Ok(id) => id,
            Err(StoreError::LastCallChanged(_)) => {
                tracing::debug!(
                    membership_id = membership.id,
                    address = %membership.address,
                    "concurrent report already claimed this slot"
                );
                return Err(RateLimitError::TooManyRequests.into());
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            membership_id = membership.id,
            address = %membership.address,
            report_id = id,
            "weather report stored"
        );
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use alloy::primitives::Address;
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;

    use super::*;
    use crate::domain::MembershipStatus;
    use crate::persistence::memory::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: ReportService,
        domain: SigningDomain,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let domain = SigningDomain::new(42_161, Address::repeat_byte(0x42));
        let service = ReportService::new(
            Arc::clone(&store) as Arc<dyn RegistryStore>,
            domain.clone(),
            CallWindow::default(),
        );
        Fixture {
            store,
            service,
            domain,
        }
    }

    fn signed(domain: &SigningDomain, signer: &PrivateKeySigner, report: &str) -> (String, String) {
        let address = signer.address().to_checksum(None);
        let Ok(sig) = signer.sign_hash_sync(&domain.signing_hash(&address, report)) else {
            panic!("signing should succeed");
        };
        (address, alloy::hex::encode_prefixed(sig.as_bytes()))
    }

    #[tokio::test]
    async fn registered_signer_is_authenticated() {
        let f = fixture();
        let signer = PrivateKeySigner::random();
        let (address, sig) = signed(&f.domain, &signer, "sunny");
        f.store.seed_membership(&address, MembershipStatus::Registered, 0);

        let result = f.service.authenticate(&address, "sunny", &sig).await;
        assert!(matches!(result, Ok(m) if m.address == address));
    }

    #[tokio::test]
    async fn unknown_and_resigned_addresses_are_unauthorized() {
        let f = fixture();
        let signer = PrivateKeySigner::random();
        let (address, sig) = signed(&f.domain, &signer, "sunny");

        let unknown = f.service.authenticate(&address, "sunny", &sig).await;
        assert!(matches!(unknown, Err(ServiceError::Unauthorized)));

        f.store.seed_membership(&address, MembershipStatus::Resigned, 0);
        let resigned = f.service.authenticate(&address, "sunny", &sig).await;
        assert!(matches!(resigned, Err(ServiceError::Unauthorized)));
    }

    #[tokio::test]
    async fn bad_signature_fails_before_storage() {
        let f = fixture();
        f.store.set_unavailable(true);
        let result = f
            .service
            .authenticate(&Address::ZERO.to_checksum(None), "x", "0x00")
            .await;
        assert!(matches!(result, Err(ServiceError::Verification(_))));
    }

    #[tokio::test]
    async fn call_window_is_applied_to_last_call() {
        let f = fixture();
        let membership = f.store.seed_membership("0x01", MembershipStatus::Registered, 1_000);
        assert!(f.service.check_call_window(&membership, 1_013).is_ok());
        assert!(matches!(
            f.service.check_call_window(&membership, 1_000),
            Err(ServiceError::RateLimited(RateLimitError::TooManyRequests))
        ));
        assert!(matches!(
            f.service.check_call_window(&membership, 1_020),
            Err(ServiceError::RateLimited(RateLimitError::WindowPassed))
        ));
    }

    #[tokio::test]
    async fn ingest_records_report_and_last_call() {
        let f = fixture();
        let membership = f.store.seed_membership("0x01", MembershipStatus::Registered, 0);
        let Ok(id) = f.service.ingest(&membership, "cloudy", 5_000).await else {
            panic!("ingest should succeed");
        };
        let reports = f.store.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports.first().map(|r| r.id), Some(id));
        assert_eq!(f.store.memberships().first().map(|m| m.last_call), Some(5_000));
    }

    #[tokio::test]
    async fn interleaved_requests_store_one_report_per_slot() {
        let f = fixture();
        let signer = PrivateKeySigner::random();
        let (address, sig) = signed(&f.domain, &signer, "windy");
        f.store.seed_membership(&address, MembershipStatus::Registered, 1_000);

        let Ok(first) = f.service.authenticate(&address, "windy", &sig).await else {
            panic!("first request should authenticate");
        };
        let Ok(second) = f.service.authenticate(&address, "windy", &sig).await else {
            panic!("second request should authenticate");
        };
        assert!(f.service.check_call_window(&first, 1_013).is_ok());
        assert!(f.service.check_call_window(&second, 1_013).is_ok());

        assert!(f.service.ingest(&first, "windy", 1_013).await.is_ok());
        let raced = f.service.ingest(&second, "windy", 1_013).await;

        assert!(matches!(
            raced,
            Err(ServiceError::RateLimited(RateLimitError::TooManyRequests))
        ));
        assert_eq!(f.store.reports().len(), 1);
    }

    #[tokio::test]
    async fn ingest_surfaces_storage_failure() {
        let f = fixture();
        let membership = f.store.seed_membership("0x01", MembershipStatus::Registered, 0);
        f.store.set_unavailable(true);
        let result = f.service.ingest(&membership, "cloudy", 5_000).await;
        assert!(matches!(result, Err(ServiceError::Storage(_))));
        f.store.set_unavailable(false);
        assert!(f.store.reports().is_empty());
    }
}
