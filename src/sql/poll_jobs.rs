use indoc::formatdoc;
use sqlx::{query_as, PgConnection};

use crate::errors::Result;
use crate::job::JobHandle;

/// Walk `table` in `(priority, run_at, job_id)` order and take session-level
/// advisory locks one candidate at a time, until `limit` jobs are locked or
/// the table is exhausted.
///
/// The recursion visits exactly one candidate per step, so at most one
/// `pg_try_advisory_lock` is attempted per row considered; a candidate whose
/// lock is already held elsewhere is skipped and the walk continues from its
/// key. A flat `select pg_try_advisory_lock(job_id) from ...` would instead
/// lock every visible row.
///
/// `exclude` carries the job_ids this process already holds, so a poll never
/// re-locks (and never double-counts) a job that is still in the pipeline.
pub async fn poll_jobs(
    conn: &mut PgConnection,
    table: &str,
    exclude: &[i64],
    limit: i32,
) -> Result<Vec<JobHandle>> {
    let sql = formatdoc!(
        r#"
            with recursive candidates as (
                select (j).*, pg_try_advisory_lock((j).job_id) as locked
                from (
                    select j
                    from {table} as j
                    where not job_id = any($1::bigint[])
                    and run_at <= now()
                    order by priority, run_at, job_id
                    limit 1
                ) as t1
                union all (
                    select (j).*, pg_try_advisory_lock((j).job_id) as locked
                    from (
                        select (
                            select j
                            from {table} as j
                            where not job_id = any($1::bigint[])
                            and run_at <= now()
                            and (priority, run_at, job_id) >
                                (candidates.priority, candidates.run_at, candidates.job_id)
                            order by priority, run_at, job_id
                            limit 1
                        ) as j
                        from candidates
                        where candidates.job_id is not null
                        limit 1
                    ) as t1
                )
            )
            select priority, run_at, job_id
            from candidates
            where locked
            limit $2::integer
        "#
    );

    let handles = query_as(&sql)
        .bind(exclude)
        .bind(limit)
        .fetch_all(conn)
        .await?;

    Ok(handles)
}
