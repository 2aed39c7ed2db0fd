use futures::FutureExt;
use que_worker::pool::{checkout, Session};

use crate::helpers::with_test_db;

mod helpers;

#[tokio::test]
async fn checkout_releases_the_session_on_error_paths_too() {
    with_test_db(|test_db| async move {
        let failed: que_worker::Result<()> = checkout(&test_db.test_pool, |conn| {
            async move {
                sqlx::query("select no_such_column")
                    .execute(conn)
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            }
            .boxed()
        })
        .await;
        assert!(failed.is_err());

        // The pool got its session back and hands it out again.
        let ok: que_worker::Result<i32> = checkout(&test_db.test_pool, |conn| {
            async move {
                let one = sqlx::query_scalar("select 1")
                    .fetch_one(conn)
                    .await?;
                Ok(one)
            }
            .boxed()
        })
        .await;
        assert_eq!(ok.unwrap(), 1);
    })
    .await;
}

#[tokio::test]
async fn transaction_commits_on_success() {
    with_test_db(|test_db| async move {
        let mut session = Session::checkout(&test_db.test_pool)
            .await
            .expect("Failed to check out session");
        assert!(!session.in_transaction());

        session
            .transaction(|conn| {
                async move {
                    sqlx::query("insert into que_jobs (job_class, args) values ('tx', '[]')")
                        .execute(conn)
                        .await?;
                    Ok(())
                }
                .boxed()
            })
            .await
            .expect("Transaction failed");

        assert!(!session.in_transaction());
        let jobs = test_db.get_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_class(), "tx");
    })
    .await;
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    with_test_db(|test_db| async move {
        let mut session = Session::checkout(&test_db.test_pool)
            .await
            .expect("Failed to check out session");

        let result: que_worker::Result<()> = session
            .transaction(|conn| {
                async move {
                    sqlx::query("insert into que_jobs (job_class, args) values ('tx', '[]')")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("select no_such_column")
                        .execute(conn)
                        .await?;
                    Ok(())
                }
                .boxed()
            })
            .await;

        assert!(result.is_err());
        assert!(!session.in_transaction());

        // The insert was rolled back with the failed transaction.
        assert!(test_db.get_jobs().await.is_empty());
    })
    .await;
}
