//! Chain client abstraction.
//!
//! The watcher only needs three things from a node: a log subscription
//! for one contract, the current head height, and the chain id. Keeping
//! them behind [`ChainClient`] lets tests script subscriptions and
//! failures without a node.

use std::future::Future;

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Failures reported by a chain client or a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The RPC endpoint rejected or failed a request.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The log subscription failed while running.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// The node closed the log stream.
    #[error("subscription closed by remote")]
    SubscriptionClosed,

    /// The configured endpoint could not be used.
    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),
}

/// An open log subscription.
///
/// Logs arrive on `logs`; a terminal failure arrives on `errors`. The
/// task feeding both channels is aborted when the subscription is dropped.
#[derive(Debug)]
pub struct LogSubscription {
    /// Logs emitted by the subscribed contract, oldest first.
    pub logs: mpsc::Receiver<Log>,
    /// Subscription failures.
    pub errors: mpsc::Receiver<ChainError>,
    handle: Option<JoinHandle<()>>,
}

impl LogSubscription {
    /// Wraps already wired channels together with the task feeding them.
    #[must_use]
    pub fn new(
        logs: mpsc::Receiver<Log>,
        errors: mpsc::Receiver<ChainError>,
        handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            logs,
            errors,
            handle,
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Node operations consumed by the chain watcher.
pub trait ChainClient: Send + Sync + 'static {
    /// Subscribes to logs emitted by `contract`, starting at `from_block`
    /// inclusive.
    fn subscribe_logs(
        &self,
        contract: Address,
        from_block: u64,
    ) -> impl Future<Output = Result<LogSubscription, ChainError>> + Send;

    /// Returns the current head block height.
    fn latest_block_height(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Returns the chain id used for signing domains.
    fn chain_id(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;
}
