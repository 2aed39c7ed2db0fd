use indoc::indoc;
use sqlx::{query, query_scalar, PgConnection};

use crate::errors::Result;

/// Insert this session's row into `que_lockers`, returning the backend pid
/// the row is keyed by. Must run on the locker's dedicated session, since
/// `pg_backend_pid()` identifies the session holding the advisory locks.
pub async fn register_locker(
    conn: &mut PgConnection,
    worker_count: i32,
    listening: bool,
) -> Result<i32> {
    let sql = indoc! {
        r#"
            insert into que_lockers (pid, worker_count, ruby_pid, ruby_hostname, listening)
            values (pg_backend_pid(), $1::integer, $2::integer, $3::text, $4::boolean)
            returning pid
        "#
    };

    let pid = query_scalar(sql)
        .bind(worker_count)
        .bind(std::process::id() as i32)
        .bind(crate::utils::hostname())
        .bind(listening)
        .fetch_one(conn)
        .await?;

    Ok(pid)
}

/// Garbage-collect registry rows left behind by crashed processes: any pid
/// no longer present in `pg_stat_activity` is gone for good.
pub async fn clean_lockers(conn: &mut PgConnection) -> Result<u64> {
    let sql = indoc! {
        r#"
            delete from que_lockers
            where pid not in (select pid from pg_stat_activity)
        "#
    };

    let result = query(sql).execute(conn).await?;
    Ok(result.rows_affected())
}

/// Remove this locker's registry row during shutdown.
pub async fn delete_locker(conn: &mut PgConnection, pid: i32) -> Result<()> {
    let sql = indoc! {
        r#"
            delete from que_lockers
            where pid = $1::integer
        "#
    };

    query(sql).bind(pid).execute(conn).await?;
    Ok(())
}
