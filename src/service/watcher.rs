//! Chain watcher: keeps memberships in sync with the registry contract.
//!
//! The watcher owns one [`LogSubscription`] at a time. Each log is decoded,
//! applied to the membership store, and recorded in the event ledger. When
//! the subscription fails the watcher resubscribes from the ledger
//! checkpoint, retrying with a fixed delay until it succeeds or shutdown is
//! signalled.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use tokio::sync::watch;

use crate::chain::{ChainClient, ChainError, LogSubscription, decode_log};
use crate::domain::ChainEvent;
use crate::persistence::models::NewEventLog;
use crate::persistence::{RegistryStore, StoreError};

/// Default delay between resubscription attempts.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(10);

/// Watcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Chain name recorded in the ledger, upper-cased.
    pub chain_name: String,
    /// Registry contract to follow.
    pub registry_contract: Address,
    /// Height to start from when the ledger is empty; `0` means the head.
    pub start_block_height: u64,
    /// Fixed delay between resubscription attempts.
    pub resubscribe_delay: Duration,
}

/// Failures while opening a subscription.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// The node could not serve the request.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The ledger checkpoint could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registry event follower. See the module documentation.
#[derive(Debug)]
pub struct ChainWatcher<C> {
    client: Arc<C>,
    store: Arc<dyn RegistryStore>,
    config: WatcherConfig,
}

/// What woke the event loop.
enum Wake {
    Shutdown,
    Log(Option<Log>),
    Failed(Option<ChainError>),
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl<C: ChainClient> ChainWatcher<C> {
    /// Creates a watcher; nothing happens until [`ChainWatcher::run`].
    #[must_use]
    pub fn new(client: Arc<C>, store: Arc<dyn RegistryStore>, config: WatcherConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Height a new subscription starts from, inclusive.
    ///
    /// The last height recorded in the ledger for this chain wins; without
    /// one the configured start height is used, and when that is zero the
    /// current head.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError`] if the ledger or the node cannot be read.
    pub async fn resolve_start_height(&self) -> Result<u64, WatcherError> {
        if let Some(height) = self.store.last_event_height(&self.config.chain_name).await? {
            return Ok(height);
        }
        if self.config.start_block_height > 0 {
            return Ok(self.config.start_block_height);
        }
        Ok(self.client.latest_block_height().await?)
    }

    /// Opens a subscription from the resolved start height.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError`] if the start height cannot be resolved or
    /// the node refuses the subscription.
    pub async fn subscribe(&self) -> Result<LogSubscription, WatcherError> {
        let from_block = self.resolve_start_height().await?;
        let subscription = self
            .client
            .subscribe_logs(self.config.registry_contract, from_block)
            .await?;
        tracing::info!(
            chain = %self.config.chain_name,
            contract = %self.config.registry_contract,
            from_block,
            "subscribed to registry events"
        );
        Ok(subscription)
    }

    /// Retries [`ChainWatcher::subscribe`] until it succeeds. Returns `None`
    /// if shutdown is signalled first.
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<LogSubscription> {
        let delay = self.config.resubscribe_delay;
        let mut attempt: u64 = 0;
        loop {
            if *shutdown.borrow() {
                return None;
            }
            attempt = attempt.saturating_add(1);
            match self.subscribe().await {
                Ok(subscription) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "registry subscription renewed");
                    }
                    return Some(subscription);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "failed to subscribe to registry events"
                    );
                }
            }
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancelled(shutdown) => return None,
            }
        }
    }

    /// Runs the watcher until `shutdown` turns `true` or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut subscription) = self.resubscribe(&mut shutdown).await else {
            tracing::info!("chain watcher stopped before subscribing");
            return;
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wake = tokio::select! {
                () = cancelled(&mut shutdown) => Wake::Shutdown,
                log = subscription.logs.recv() => Wake::Log(log),
                err = subscription.errors.recv() => Wake::Failed(err),
            };

            let failure = match wake {
                Wake::Shutdown => break,
                Wake::Log(Some(log)) => {
                    self.handle_log(&log).await;
                    continue;
                }
                Wake::Log(None) | Wake::Failed(None) => ChainError::SubscriptionClosed,
                Wake::Failed(Some(e)) => e,
            };

            tracing::error!(error = %failure, "registry subscription failed");
            drop(subscription);
            match self.resubscribe(&mut shutdown).await {
                Some(renewed) => subscription = renewed,
                None => break,
            }
        }

        tracing::info!("chain watcher stopped");
    }

    async fn handle_log(&self, log: &Log) {
        if log.removed {
            tracing::warn!(
                block = ?log.block_number,
                tx = ?log.transaction_hash,
                "ignoring registry log removed by a reorg"
            );
            return;
        }
        match decode_log(log) {
            Ok(event) => self.apply_event(&event).await,
            Err(e) => tracing::error!(
                error = %e,
                block = ?log.block_number,
                tx = ?log.transaction_hash,
                "skipping undecodable registry log"
            ),
        }
    }

    /// Applies one decoded event: moves the subject's membership to the
    /// implied status, creating it if unseen, then appends a ledger row.
    ///
    /// Failures are logged and never abort processing; the ledger append is
    /// attempted even when the membership step failed.
    pub async fn apply_event(&self, chain_event: &ChainEvent) {
        let event = &chain_event.event;
        let address = event
            .participant()
            .map(|participant| participant.to_checksum(None))
            .unwrap_or_default();

        if let Some(status) = event.implied_status() {
            match self.store.find_membership(&address).await {
                Ok(Some(_)) => {
                    if let Err(e) = self.store.update_membership_status(&address, status).await {
                        tracing::error!(%address, error = %e, "failed to update membership");
                    }
                }
                Ok(None) => {
                    if let Err(e) = self.store.create_membership(&address, status).await {
                        tracing::error!(%address, error = %e, "failed to create membership");
                    }
                }
                Err(e) => {
                    tracing::error!(%address, error = %e, "failed to look up membership");
                }
            }
            tracing::info!(
                event = event.name(),
                %address,
                %status,
                block = chain_event.block_height,
                "membership updated from registry event"
            );
        } else {
            tracing::debug!(
                block = chain_event.block_height,
                event = ?event,
                "unrecognized registry log"
            );
        }

        let entry = NewEventLog {
            chain_name: self.config.chain_name.clone(),
            block_height: chain_event.block_height,
            transaction_hash: chain_event.transaction_hash.to_string(),
            address,
        };
        if let Err(e) = self.store.append_event_log(&entry).await {
            tracing::error!(
                block = entry.block_height,
                tx = %entry.transaction_hash,
                error = %e,
                "failed to append event log"
            );
        }
    }
}
