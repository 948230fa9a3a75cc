//! PostgreSQL implementation of the registry store.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use sqlx::{Connection, PgConnection};

use super::connection_pool::{
    ConnectionPool, Connector, DEFAULT_RECONNECT_DELAY, PoolError, PooledConnection,
};
use super::models::NewEventLog;
use super::{RegistryStore, StoreError};
use crate::domain::{Membership, MembershipStatus};

/// Raw `memberships` row: id, address, status, last_call.
type MembershipRow = (i64, String, String, i64);

/// PostgreSQL-backed store running every query on a handle borrowed from
/// a [`ConnectionPool`].
///
/// Each call acquires a handle without waiting, so an exhausted pool
/// surfaces as [`StoreError::Pool`] instead of queueing the caller. A call
/// that fails at the connection level marks its handle broken, so the pool
/// reconnects that slot rather than handing the dead handle out again.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<ConnectionPool<PgConnection>>,
}

impl PostgresStore {
    /// Creates a store on top of an already filled pool.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool<PgConnection>>) -> Self {
        Self { pool }
    }

    /// Opens `max_size` connections to `database_url` and wraps them in a
    /// pool that reconnects broken slots to the same URL. If any connection
    /// fails, the ones already opened are closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a connection cannot be opened.
    pub async fn open_pool(
        database_url: &str,
        max_size: usize,
    ) -> Result<Arc<ConnectionPool<PgConnection>>, StoreError> {
        let mut handles = Vec::with_capacity(max_size);
        for _ in 0..max_size {
            match PgConnection::connect(database_url).await {
                Ok(conn) => handles.push(conn),
                Err(e) => {
                    for conn in handles {
                        let _ = Connection::close(conn).await;
                    }
                    return Err(e.into());
                }
            }
        }
        tracing::info!(connections = max_size, "database connection pool ready");
        let url = database_url.to_string();
        let connector: Connector<PgConnection> = Arc::new(move || -> BoxFuture<'static, _> {
            let url = url.clone();
            Box::pin(async move {
                PgConnection::connect(&url)
                    .await
                    .map_err(|e| PoolError::Connect(e.to_string()))
            })
        });
        Ok(Arc::new(
            ConnectionPool::new(handles).with_connector(connector, DEFAULT_RECONNECT_DELAY),
        ))
    }

    /// Applies the embedded schema migrations on a dedicated connection.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the database is unreachable or a
    /// migration fails.
    pub async fn migrate(database_url: &str) -> Result<(), StoreError> {
        let mut conn = PgConnection::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;
        Connection::close(conn).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }
}

/// Whether `error` leaves the connection unusable for further queries:
/// transport failures, or a server error in the connection exception (`08`)
/// or operator intervention (`57P`) classes.
fn is_connection_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || code.starts_with("57P")),
        _ => false,
    }
}

/// Passes `outcome` through, marking `conn` broken first if it failed at
/// the connection level.
fn track<T>(
    conn: &mut PooledConnection<PgConnection>,
    outcome: Result<T, sqlx::Error>,
) -> Result<T, StoreError> {
    outcome.map_err(|e| {
        if is_connection_error(&e) {
            tracing::warn!(error = %e, "database connection broken");
            conn.mark_broken();
        }
        StoreError::Database(e)
    })
}

fn membership_from_row((id, address, status, last_call): MembershipRow) -> Result<Membership, StoreError> {
    let status = status
        .parse::<MembershipStatus>()
        .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
    Ok(Membership {
        id,
        address,
        status,
        last_call,
    })
}

fn height_to_db(height: u64) -> Result<i64, StoreError> {
    i64::try_from(height)
        .map_err(|_| StoreError::InvalidRecord(format!("block height {height} out of range")))
}

/// Runs the report transaction on `conn`. The outer error is a database
/// failure; the inner one a refusal after which the transaction rolled back.
async fn insert_report(
    conn: &mut PgConnection,
    membership_id: i64,
    report: &str,
    expected_last_call: i64,
    called_at: i64,
) -> Result<Result<i64, StoreError>, sqlx::Error> {
    let mut tx = conn.begin().await?;

    let claimed = sqlx::query(
        "UPDATE memberships SET last_call = $1, updated_at = now() \
         WHERE id = $2 AND last_call = $3",
    )
    .bind(called_at)
    .bind(membership_id)
    .bind(expected_last_call)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM memberships WHERE id = $1)",
        )
        .bind(membership_id)
        .fetch_one(&mut *tx)
        .await?;
        // dropping `tx` rolls back
        return Ok(Err(if exists {
            StoreError::LastCallChanged(membership_id)
        } else {
            StoreError::MembershipNotFound(membership_id.to_string())
        }));
    }

    let report_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO weather_reports (membership_id, report) VALUES ($1, $2) RETURNING id",
    )
    .bind(membership_id)
    .bind(report)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Ok(report_id))
}

impl RegistryStore for PostgresStore {
    fn find_membership<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Option<Membership>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire()?;
            let row = sqlx::query_as::<_, MembershipRow>(
                "SELECT id, address, status, last_call FROM memberships \
                 WHERE lower(address) = lower($1) AND deleted_at IS NULL",
            )
            .bind(address)
            .fetch_optional(&mut *conn)
            .await;

            track(&mut conn, row)?.map(membership_from_row).transpose()
        })
    }

    fn create_membership<'a>(
        &'a self,
        address: &'a str,
        status: MembershipStatus,
    ) -> BoxFuture<'a, Result<Membership, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire()?;
            let row = sqlx::query_as::<_, MembershipRow>(
                "INSERT INTO memberships (address, status) VALUES ($1, $2) \
                 RETURNING id, address, status, last_call",
            )
            .bind(address)
            .bind(status.as_str())
            .fetch_one(&mut *conn)
            .await;

            membership_from_row(track(&mut conn, row)?)
        })
    }

    fn update_membership_status<'a>(
        &'a self,
        address: &'a str,
        status: MembershipStatus,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire()?;
            let result = sqlx::query(
                "UPDATE memberships SET status = $1, updated_at = now() \
                 WHERE lower(address) = lower($2) AND deleted_at IS NULL",
            )
            .bind(status.as_str())
            .bind(address)
            .execute(&mut *conn)
            .await;

            if track(&mut conn, result)?.rows_affected() == 0 {
                return Err(StoreError::MembershipNotFound(address.to_string()));
            }
            Ok(())
        })
    }

    fn append_event_log<'a>(
        &'a self,
        entry: &'a NewEventLog,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let block_height = height_to_db(entry.block_height)?;
            let mut conn = self.pool.acquire()?;
            let id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO event_logs (chain_name, block_height, transaction_hash, address, created_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(&entry.chain_name)
            .bind(block_height)
            .bind(&entry.transaction_hash)
            .bind(&entry.address)
            .bind(Utc::now().timestamp())
            .fetch_one(&mut *conn)
            .await;

            track(&mut conn, id)
        })
    }

    fn last_event_height<'a>(
        &'a self,
        chain_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire()?;
            let height = sqlx::query_scalar::<_, Option<i64>>(
                "SELECT MAX(block_height) FROM event_logs WHERE chain_name = $1",
            )
            .bind(chain_name)
            .fetch_one(&mut *conn)
            .await;

            track(&mut conn, height)?
                .map(|h| {
                    u64::try_from(h).map_err(|_| {
                        StoreError::InvalidRecord(format!("negative block height {h}"))
                    })
                })
                .transpose()
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
            let mut conn = self.pool.acquire()?;
            let outcome =
                insert_report(&mut conn, membership_id, report, expected_last_call, called_at)
                    .await;
            match outcome {
                Ok(Ok(report_id)) => Ok(report_id),
                Ok(Err(refused)) => Err(refused),
                Err(e) => track(&mut conn, Err(e)),
            }
        })
    }

    fn idle_connections(&self) -> Option<usize> {
        Some(self.pool.idle_count())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn row_with_known_status_maps_to_membership() {
        let row = (7, "0xAbC".to_string(), "Resigned".to_string(), 42);
        let Ok(membership) = membership_from_row(row) else {
            panic!("valid row");
        };
        assert_eq!(membership.status, MembershipStatus::Resigned);
        assert_eq!(membership.last_call, 42);
    }

    #[test]
    fn row_with_unknown_status_is_invalid() {
        let row = (7, "0xAbC".to_string(), "Pending".to_string(), 0);
        assert!(matches!(
            membership_from_row(row),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn transport_failures_break_the_connection() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(is_connection_error(&sqlx::Error::Io(reset)));
        assert!(is_connection_error(&sqlx::Error::Protocol("unexpected eof".to_string())));
        assert!(is_connection_error(&sqlx::Error::WorkerCrashed));
    }

    #[test]
    fn query_level_failures_keep_the_connection() {
        assert!(!is_connection_error(&sqlx::Error::RowNotFound));
        assert!(!is_connection_error(&sqlx::Error::ColumnNotFound("id".to_string())));
    }

    #[test]
    fn heights_beyond_bigint_are_rejected() {
        assert!(matches!(height_to_db(u64::MAX), Err(StoreError::InvalidRecord(_))));
        assert!(matches!(height_to_db(12), Ok(12)));
    }
}
