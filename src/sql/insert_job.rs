use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use tracing::info;

use crate::errors::Result;
use crate::job::JobHandle;
use crate::job_spec::JobSpec;

/// Add a job to a queue table, returning its handle.
pub async fn insert_job<'e>(
    executor: impl PgExecutor<'e>,
    table: &str,
    job_class: &str,
    args: serde_json::Value,
    spec: JobSpec,
) -> Result<JobHandle> {
    let sql = formatdoc!(
        r#"
            insert into {table} (priority, run_at, job_class, args)
            values (
                coalesce($1::smallint, 100::smallint),
                coalesce($2::timestamptz, now()),
                $3::text,
                $4::json
            )
            returning priority, run_at, job_id
        "#
    );

    let handle: JobHandle = query_as(&sql)
        .bind(spec.priority)
        .bind(spec.run_at)
        .bind(job_class)
        .bind(&args)
        .fetch_one(executor)
        .await?;

    info!(
        job_class,
        job_id = handle.job_id(),
        priority = handle.priority(),
        "Job added to queue"
    );

    Ok(handle)
}
