use sqlx::{query, query_scalar, PgConnection};

use crate::errors::Result;

/// Release the session-level advisory lock for `job_id` on this session.
///
/// Returns `false` when the session did not hold the lock, which indicates
/// an accounting bug upstream; callers log it rather than fail.
pub async fn unlock_job(conn: &mut PgConnection, job_id: i64) -> Result<bool> {
    let unlocked = query_scalar("select pg_advisory_unlock($1::bigint)")
        .bind(job_id)
        .fetch_one(conn)
        .await?;

    Ok(unlocked)
}

/// Release every advisory lock held by this session.
///
/// Used as the last shutdown step before the dedicated session returns to
/// the pool: a pooled connection keeps its session, so any lock a failed
/// release left behind must be scrubbed here.
pub async fn unlock_all(conn: &mut PgConnection) -> Result<()> {
    query("select pg_advisory_unlock_all()")
        .execute(conn)
        .await?;

    Ok(())
}
