use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{query, PgConnection, PgPool, Postgres};

use crate::errors::Result;

/// Open a connection pool the way the rest of the crate expects it.
pub async fn connect(database_url: &str, max_connections: u32) -> sqlx::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Check out a session, run `f` on it, and release it on every exit path.
///
/// The session is returned to the pool when the `PoolConnection` drops,
/// whether `f` succeeded or not. Re-entrant use of the same session is
/// expressed structurally: `f` borrows the connection mutably, so nothing
/// else can check out "the same owner's" session concurrently.
pub async fn checkout<T, F>(pool: &PgPool, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut conn = pool.acquire().await?;
    f(&mut conn).await
}

/// A single Postgres session checked out for an extended lifetime.
///
/// The locker holds one of these for its whole run: advisory locks are
/// session-scoped, so the locking session must never be shared with the
/// workers, and must survive from registration to the end of shutdown.
pub struct Session {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl Session {
    /// Check out a dedicated session from the pool.
    pub async fn checkout(pool: &PgPool) -> Result<Session> {
        let conn = pool.acquire().await?;
        Ok(Session {
            conn,
            in_transaction: false,
        })
    }

    /// Wrap an already-acquired connection (used when the caller supplies
    /// its own dedicated session).
    pub fn from_connection(conn: PoolConnection<Postgres>) -> Session {
        Session {
            conn,
            in_transaction: false,
        }
    }

    /// The raw connection, for executing statements.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// True iff a transaction opened through [`Session::transaction`] is
    /// currently in progress.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Run `f` inside a transaction on this session.
    ///
    /// If a transaction is already open the call passes straight through;
    /// otherwise it issues `BEGIN`, commits on success, and rolls back on
    /// any error.
    pub async fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
    {
        if self.in_transaction {
            return f(&mut self.conn).await;
        }

        query("begin").execute(&mut *self.conn).await?;
        self.in_transaction = true;

        let result = f(&mut self.conn).await;

        let end = match &result {
            Ok(_) => "commit",
            Err(_) => "rollback",
        };
        let ended = query(end).execute(&mut *self.conn).await;
        self.in_transaction = false;
        ended?;

        result
    }
}
