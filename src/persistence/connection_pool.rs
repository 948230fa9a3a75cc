//! Fixed-capacity pool of ready database handles.
//!
//! [`ConnectionPool`] is filled once at startup and never grows. Acquiring
//! is non-blocking: when every handle is checked out the caller gets
//! [`PoolError::Empty`] immediately and decides how to degrade. The
//! internal mutex only guards the idle list; it is never held while a
//! handle talks to the database.
//!
//! A handle that hit a connection-level failure is marked broken by its
//! guard. Instead of returning to the idle list it is closed, and a
//! replacement is opened into the same slot by the pool's [`Connector`].

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::PgConnection;

/// Default pause between attempts to replace a broken handle.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Opens a fresh handle for a slot whose handle broke.
pub type Connector<H> = Arc<dyn Fn() -> BoxFuture<'static, Result<H, PoolError>> + Send + Sync>;

/// Errors returned by [`ConnectionPool`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every handle is currently checked out.
    #[error("connection pool is empty")]
    Empty,
    /// The pool has been closed.
    #[error("connection pool is closed")]
    Closed,
    /// A replacement handle could not be opened.
    #[error("failed to open replacement connection: {0}")]
    Connect(String),
}

/// A database handle that can live in a [`ConnectionPool`].
pub trait PooledHandle: Send + 'static {
    /// Gracefully terminates the handle.
    fn close(self) -> impl Future<Output = ()> + Send;
}

impl PooledHandle for PgConnection {
    async fn close(self) {
        if let Err(e) = sqlx::Connection::close(self).await {
            tracing::warn!(error = %e, "failed to close database connection cleanly");
        }
    }
}

struct PoolState<H> {
    idle: Vec<H>,
    closed: bool,
}

/// Bounded pool of database handles shared by the watcher and the
/// request path.
///
/// # Concurrency
///
/// - `acquire`, `release` and `close` may be called from any task.
/// - A handle is owned by exactly one [`PooledConnection`] at a time.
/// - The idle list never exceeds [`ConnectionPool::max_size`].
pub struct ConnectionPool<H> {
    max_size: usize,
    state: Mutex<PoolState<H>>,
    connector: Option<Connector<H>>,
    reconnect_delay: Duration,
}

impl<H: PooledHandle> ConnectionPool<H> {
    /// Creates a pool holding exactly `handles`; its capacity is their count.
    ///
    /// Without a [`Connector`] the slot of a broken handle stays empty.
    #[must_use]
    pub fn new(handles: Vec<H>) -> Self {
        Self {
            max_size: handles.len(),
            state: Mutex::new(PoolState {
                idle: handles,
                closed: false,
            }),
            connector: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Replaces broken handles with ones opened by `connector`, retrying
    /// every `reconnect_delay` until one opens or the pool closes.
    #[must_use]
    pub fn with_connector(mut self, connector: Connector<H>, reconnect_delay: Duration) -> Self {
        self.connector = Some(connector);
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Takes an idle handle out of the pool without waiting.
    ///
    /// The handle returns to the pool when the guard is released or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Empty`] if no handle is idle and
    /// [`PoolError::Closed`] after [`ConnectionPool::close`].
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection<H>, PoolError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        let handle = state.idle.pop().ok_or(PoolError::Empty)?;
        drop(state);

        Ok(PooledConnection {
            pool: Arc::clone(self),
            handle: Some(handle),
            broken: false,
        })
    }

    /// Returns a checked-out handle to the pool.
    ///
    /// Equivalent to dropping the guard.
    pub fn release(connection: PooledConnection<H>) {
        drop(connection);
    }

    /// Closes every idle handle and marks the pool closed.
    ///
    /// Handles still checked out are closed when their guard is released.
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        let count = drained.len();
        for handle in drained {
            handle.close().await;
        }
        tracing::info!(closed = count, "connection pool closed");
    }

    /// Maximum number of handles this pool manages.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of handles currently idle.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Returns `true` once [`ConnectionPool::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn put_back(&self, handle: H) {
        let mut state = self.lock();
        if !state.closed && state.idle.len() < self.max_size {
            state.idle.push(handle);
            return;
        }
        drop(state);

        // The pool no longer wants this handle; close it off the caller's path.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(handle.close());
            }
            Err(_) => drop(handle),
        }
    }

    /// Closes a broken handle and refills its slot in the background.
    fn replace_broken(self: &Arc<Self>, handle: H) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime to replace broken database handle; slot stays empty");
            drop(handle);
            return;
        };
        let pool = Arc::clone(self);
        runtime.spawn(async move {
            handle.close().await;
            let Some(connector) = pool.connector.as_ref() else {
                tracing::warn!("broken database handle dropped; pool has no connector");
                return;
            };
            let mut attempt: u64 = 0;
            loop {
                if pool.is_closed() {
                    return;
                }
                attempt = attempt.saturating_add(1);
                match connector().await {
                    Ok(fresh) => {
                        tracing::info!(attempt, "broken database handle replaced");
                        pool.put_back(fresh);
                        return;
                    }
                    Err(e) => tracing::warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = pool.reconnect_delay.as_millis(),
                        "failed to replace broken database handle"
                    ),
                }
                tokio::time::sleep(pool.reconnect_delay).await;
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H> fmt::Debug for ConnectionPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (idle, closed) = match self.state.lock() {
            Ok(state) => (state.idle.len(), state.closed),
            Err(poisoned) => {
                let state = poisoned.into_inner();
                (state.idle.len(), state.closed)
            }
        };
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.max_size)
            .field("idle", &idle)
            .field("closed", &closed)
            .field("reconnects", &self.connector.is_some())
            .finish()
    }
}

/// Exclusive access to one pooled handle.
///
/// Dereferences to the handle. Dropping the guard hands the handle back,
/// unless it was marked broken.
pub struct PooledConnection<H: PooledHandle> {
    pool: Arc<ConnectionPool<H>>,
    handle: Option<H>,
    broken: bool,
}

impl<H: PooledHandle> PooledConnection<H> {
    /// Flags the handle as unusable; on drop it is closed and replaced
    /// instead of returning to the idle list.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<H: PooledHandle> Deref for PooledConnection<H> {
    type Target = H;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &H {
        // Only `Drop` takes the handle out.
        self.handle
            .as_ref()
            .expect("pooled handle is present until drop")
    }
}

impl<H: PooledHandle> DerefMut for PooledConnection<H> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut H {
        self.handle
            .as_mut()
            .expect("pooled handle is present until drop")
    }
}

impl<H: PooledHandle> Drop for PooledConnection<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.broken {
                self.pool.replace_broken(handle);
            } else {
                self.pool.put_back(handle);
            }
        }
    }
}

impl<H: PooledHandle> fmt::Debug for PooledConnection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingHandle {
        id: usize,
        closes: Arc<AtomicUsize>,
    }

    impl PooledHandle for CountingHandle {
        async fn close(self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_pool(size: usize) -> (Arc<ConnectionPool<CountingHandle>>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let handles = (0..size)
            .map(|id| CountingHandle {
                id,
                closes: Arc::clone(&closes),
            })
            .collect();
        (Arc::new(ConnectionPool::new(handles)), closes)
    }

    #[test]
    fn acquire_from_empty_pool_fails_immediately() {
        let (pool, _) = make_pool(0);
        assert_eq!(pool.acquire().err(), Some(PoolError::Empty));
    }

    #[test]
    fn exhausted_pool_reports_empty_until_release() {
        let (pool, _) = make_pool(2);
        let Ok(first) = pool.acquire() else {
            panic!("first acquire");
        };
        let Ok(second) = pool.acquire() else {
            panic!("second acquire");
        };
        assert_ne!(first.id, second.id);
        assert_eq!(pool.acquire().err(), Some(PoolError::Empty));
        assert_eq!(pool.idle_count(), 0);

        ConnectionPool::release(first);
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.acquire().is_ok());
        drop(second);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let (pool, _) = make_pool(3);
        for _ in 0..10 {
            let guards: Vec<_> = (0..3).filter_map(|_| pool.acquire().ok()).collect();
            assert_eq!(guards.len(), 3);
            drop(guards);
            assert_eq!(pool.idle_count(), pool.max_size());
        }
    }

    #[tokio::test]
    async fn close_drains_every_handle_once() {
        let (pool, closes) = make_pool(4);
        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 4);
        assert_eq!(pool.acquire().err(), Some(PoolError::Closed));
    }

    #[test]
    fn second_close_is_a_no_op() {
        let (pool, closes) = make_pool(2);
        tokio_test::block_on(async {
            pool.close().await;
            pool.close().await;
        });
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handle_released_after_close_is_closed_not_pooled() {
        let (pool, closes) = make_pool(2);
        let Ok(guard) = pool.acquire() else {
            panic!("acquire before close");
        };
        pool.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        drop(guard);
        tokio::task::yield_now().await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    /// Connector that fails `failures` times, then hands out fresh handles
    /// numbered from 100.
    fn flaky_connector(
        failures: usize,
        closes: &Arc<AtomicUsize>,
    ) -> (Connector<CountingHandle>, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let closes = Arc::clone(closes);
        let connector: Connector<CountingHandle> = Arc::new(move || -> BoxFuture<'static, _> {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let closes = Arc::clone(&closes);
            Box::pin(async move {
                if attempt < failures {
                    return Err(PoolError::Connect("connection refused".to_string()));
                }
                Ok(CountingHandle {
                    id: 100 + attempt,
                    closes,
                })
            })
        });
        (connector, attempts)
    }

    async fn wait_for_idle(pool: &ConnectionPool<CountingHandle>, idle: usize) {
        for _ in 0..200 {
            if pool.idle_count() == idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pool never reached {idle} idle handles");
    }

    #[tokio::test]
    async fn broken_handle_is_closed_and_replaced_in_its_slot() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (connector, attempts) = flaky_connector(2, &closes);
        let handles = (0..2)
            .map(|id| CountingHandle {
                id,
                closes: Arc::clone(&closes),
            })
            .collect();
        let pool = Arc::new(
            ConnectionPool::new(handles).with_connector(connector, Duration::from_millis(5)),
        );

        let Ok(mut guard) = pool.acquire() else {
            panic!("acquire");
        };
        let broken_id = guard.id;
        guard.mark_broken();
        drop(guard);

        wait_for_idle(&pool, 2).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let guards: Vec<_> = (0..3).filter_map(|_| pool.acquire().ok()).collect();
        assert_eq!(guards.len(), 2);
        assert!(guards.iter().all(|g| g.id != broken_id));
        assert!(guards.iter().any(|g| g.id == 102));
    }

    #[tokio::test]
    async fn broken_handle_without_connector_leaves_slot_empty() {
        let (pool, closes) = make_pool(2);
        let Ok(mut guard) = pool.acquire() else {
            panic!("acquire");
        };
        guard.mark_broken();
        drop(guard);

        for _ in 0..200 {
            if closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn replacement_stops_once_the_pool_closes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (connector, attempts) = flaky_connector(usize::MAX, &closes);
        let handles = vec![CountingHandle {
            id: 0,
            closes: Arc::clone(&closes),
        }];
        let pool = Arc::new(
            ConnectionPool::new(handles).with_connector(connector, Duration::from_millis(5)),
        );

        let Ok(mut guard) = pool.acquire() else {
            panic!("acquire");
        };
        guard.mark_broken();
        drop(guard);
        for _ in 0..200 {
            if attempts.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pool.close().await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), settled);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_acquire_never_shares_a_handle() {
        let (pool, _) = make_pool(4);
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                match pool.acquire() {
                    Ok(guard) => {
                        let id = guard.id;
                        tokio::task::yield_now().await;
                        Some(id)
                    }
                    Err(PoolError::Empty) => None,
                    Err(e) => panic!("unexpected pool error: {e}"),
                }
            }));
        }
        for task in tasks {
            let Ok(result) = task.await else {
                panic!("task panicked");
            };
            if let Some(id) = result {
                assert!(id < 4);
            }
        }
        assert_eq!(pool.idle_count(), 4);
    }
}
