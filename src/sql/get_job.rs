use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;
use crate::job::{JobHandle, JobRow};

/// Re-read a locked job by its handle.
///
/// Returns `None` when the row was destroyed between lock acquisition and
/// this load; that is a normal outcome, not an error.
pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    table: &str,
    handle: &JobHandle,
) -> Result<Option<JobRow>> {
    let sql = formatdoc!(
        r#"
            select priority, run_at, job_id, job_class, args, error_count, last_error
            from {table}
            where priority = $1::smallint
            and run_at = $2::timestamptz
            and job_id = $3::bigint
        "#
    );

    let job = query_as(&sql)
        .bind(handle.priority())
        .bind(handle.run_at())
        .bind(handle.job_id())
        .fetch_optional(executor)
        .await?;

    Ok(job)
}
