use sqlx::{query_as, Executor, FromRow, Postgres};

use crate::errors::Result;

#[derive(FromRow)]
struct EscapeIdentifierRow {
    escaped_identifier: String,
}

/// Quote a queue table name so it can be interpolated into statements.
pub async fn escape_identifier<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    identifier: &str,
) -> Result<String> {
    let result: EscapeIdentifierRow =
        query_as("select format('%I', $1::text) as escaped_identifier")
            .bind(identifier)
            .fetch_one(executor)
            .await?;

    Ok(result.escaped_identifier)
}

/// Get the system hostname, or "unknown" if it can't be determined.
pub(crate) fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".into())
}
