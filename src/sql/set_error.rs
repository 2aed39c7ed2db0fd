use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;
use crate::job::JobHandle;

/// Record a failed run: bump the error count, reschedule the job
/// `retry_in_secs` from now, and store the error message.
pub async fn set_error<'e>(
    executor: impl PgExecutor<'e>,
    table: &str,
    handle: &JobHandle,
    error_count: i32,
    retry_in_secs: i64,
    message: &str,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            update {table}
            set error_count = $1::integer,
                run_at = now() + $2::bigint * '1 second'::interval,
                last_error = $3::text
            where priority = $4::smallint
            and run_at = $5::timestamptz
            and job_id = $6::bigint
        "#
    );

    query(&sql)
        .bind(error_count)
        .bind(retry_in_secs)
        .bind(message)
        .bind(handle.priority())
        .bind(handle.run_at())
        .bind(handle.job_id())
        .execute(executor)
        .await?;

    Ok(())
}
