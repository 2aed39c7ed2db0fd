use indoc::{formatdoc, indoc};
use sqlx::{query, PgPool};
use tracing::info;

use crate::errors::Result;

/// Create a queue table if it does not exist yet.
///
/// Every queue table shares the same shape; the composite primary key is
/// also the order jobs become eligible in.
pub async fn install_queue(pool: &PgPool, table: &str) -> Result<()> {
    let sql = formatdoc!(
        r#"
            create table if not exists {table} (
                priority smallint not null default 100,
                run_at timestamptz not null default now(),
                job_id bigserial not null,
                job_class text not null,
                args json not null default '[]'::json,
                error_count integer not null default 0,
                last_error text,
                primary key (priority, run_at, job_id)
            )
        "#
    );

    query(&sql).execute(pool).await?;
    Ok(())
}

/// Ensure the registry table and the default `que_jobs` queue exist.
///
/// `que_lockers` is unlogged: its rows only describe live sessions, so
/// they are worthless after a crash and are garbage-collected on the next
/// registration anyway.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let lockers_sql = indoc! {
        r#"
            create unlogged table if not exists que_lockers (
                pid integer not null primary key,
                worker_count integer not null,
                ruby_pid integer not null,
                ruby_hostname text not null,
                listening boolean not null
            )
        "#
    };

    query(lockers_sql).execute(pool).await?;
    install_queue(pool, crate::builder::DEFAULT_QUEUE).await?;

    info!("Schema ready");
    Ok(())
}
