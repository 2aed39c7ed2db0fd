use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;
use crate::job::JobHandle;

/// Delete a finished job row. Deleting an already-absent row is a no-op.
pub async fn destroy_job<'e>(
    executor: impl PgExecutor<'e>,
    table: &str,
    handle: &JobHandle,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            delete from {table}
            where priority = $1::smallint
            and run_at = $2::timestamptz
            and job_id = $3::bigint
        "#
    );

    query(&sql)
        .bind(handle.priority())
        .bind(handle.run_at())
        .bind(handle.job_id())
        .execute(executor)
        .await?;

    Ok(())
}
