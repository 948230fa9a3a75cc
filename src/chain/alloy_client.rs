//! Websocket chain client built on an alloy provider.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::client::{ChainClient, ChainError, LogSubscription};

/// Buffered logs between the pump task and the watcher.
const LOG_BUFFER: usize = 256;

/// [`ChainClient`] over a websocket RPC connection.
///
/// Subscriptions first replay `eth_getLogs` from the requested height up
/// to the current head, then forward live `eth_subscribe` logs. The live
/// subscription is opened before the replay query so no block falls in
/// between; overlap is possible and handled by idempotent processing.
///
/// The transport never reconnects on its own: a dropped socket ends the
/// live stream, which the watcher sees as [`ChainError::SubscriptionClosed`].
/// The next call finds the backend gone and dials a new connection, so
/// every resubscription backfills from the caller's checkpoint.
pub struct AlloyChainClient {
    provider: RwLock<DynProvider>,
    rpc_url: String,
}

impl fmt::Debug for AlloyChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlloyChainClient")
            .field("rpc_url", &self.rpc_url)
            .finish_non_exhaustive()
    }
}

impl AlloyChainClient {
    /// Connects to a websocket RPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidUrl`] for a non-websocket URL and
    /// [`ChainError::Rpc`] if the connection cannot be established.
    pub async fn connect(rpc_url: &str) -> Result<Self, ChainError> {
        if !(rpc_url.starts_with("ws://") || rpc_url.starts_with("wss://")) {
            return Err(ChainError::InvalidUrl(rpc_url.to_string()));
        }
        let provider = dial(rpc_url).await?;

        tracing::info!(rpc_url = %rpc_url, "chain client connected");
        Ok(Self {
            provider: RwLock::new(provider),
            rpc_url: rpc_url.to_string(),
        })
    }

    fn current(&self) -> DynProvider {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a provider whose backend answered a head query, together
    /// with that head. A provider whose connection is gone is replaced by
    /// a freshly dialled one.
    async fn live(&self) -> Result<(DynProvider, u64), ChainError> {
        let provider = self.current();
        match provider.get_block_number().await {
            Ok(head) => return Ok((provider, head)),
            Err(e) => {
                tracing::warn!(rpc_url = %self.rpc_url, error = %e, "chain connection lost, reconnecting");
            }
        }

        let fresh = dial(&self.rpc_url).await?;
        let head = fresh
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        tracing::info!(rpc_url = %self.rpc_url, head, "chain client reconnected");
        Ok((fresh, head))
    }
}

/// Opens a websocket provider with transport-level reconnects disabled.
async fn dial(rpc_url: &str) -> Result<DynProvider, ChainError> {
    let provider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(rpc_url).with_max_retries(0))
        .await
        .map_err(|e| ChainError::Rpc(format!("connect {rpc_url}: {e}")))?;
    Ok(provider.erased())
}

/// Feeds `backfill` and then `live` into `logs_tx`, in that order.
///
/// The live stream is drained into a local queue while the backfill is
/// still being delivered, so a slow consumer never leaves live logs
/// sitting in the transport's bounded buffer. When `live` ends,
/// [`ChainError::SubscriptionClosed`] is reported on `errors_tx`.
async fn pump<S>(
    backfill: Vec<Log>,
    mut live: S,
    logs_tx: mpsc::Sender<Log>,
    errors_tx: mpsc::Sender<ChainError>,
) where
    S: Stream<Item = Log> + Unpin,
{
    let mut backfill = VecDeque::from(backfill);
    let mut queued = VecDeque::new();
    let mut live_open = true;

    while !backfill.is_empty() {
        tokio::select! {
            permit = logs_tx.reserve() => {
                let Ok(permit) = permit else { return };
                if let Some(log) = backfill.pop_front() {
                    permit.send(log);
                }
            }
            next = live.next(), if live_open => match next {
                Some(log) => queued.push_back(log),
                None => live_open = false,
            },
        }
    }

    for log in queued {
        if logs_tx.send(log).await.is_err() {
            return;
        }
    }
    if live_open {
        while let Some(log) = live.next().await {
            if logs_tx.send(log).await.is_err() {
                return;
            }
        }
    }
    let _ = errors_tx.send(ChainError::SubscriptionClosed).await;
}

impl ChainClient for AlloyChainClient {
    async fn subscribe_logs(
        &self,
        contract: Address,
        from_block: u64,
    ) -> Result<LogSubscription, ChainError> {
        let filter = Filter::new().address(contract).from_block(from_block);
        let (provider, _) = self.live().await?;

        let live = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| ChainError::Subscription(e.to_string()))?;

        let head = provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let backfill: Vec<Log> = if from_block <= head {
            provider
                .get_logs(&filter.clone().to_block(head))
                .await
                .map_err(|e| ChainError::Rpc(format!("get_logs {from_block}..={head}: {e}")))?
        } else {
            Vec::new()
        };
        tracing::debug!(
            contract = %contract,
            from_block,
            head,
            backfilled = backfill.len(),
            "log subscription opened"
        );

        let (logs_tx, logs_rx) = mpsc::channel(LOG_BUFFER);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let handle = tokio::spawn(pump(backfill, Box::pin(live.into_stream()), logs_tx, errors_tx));

        Ok(LogSubscription::new(logs_rx, errors_rx, Some(handle)))
    }

    async fn latest_block_height(&self) -> Result<u64, ChainError> {
        let (_, head) = self.live().await?;
        Ok(head)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        let (provider, _) = self.live().await?;
        provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }
}
