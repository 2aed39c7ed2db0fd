#![allow(dead_code)]

use que_worker::migrate::migrate;
use que_worker::{insert_job, JobHandle, JobRow, JobSpec, LockerOptions};
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    /// Options preconfigured for tests: fast cadences, no OS signal
    /// handling, shutdown driven by the test itself.
    pub fn locker_options(&self) -> LockerOptions {
        LockerOptions::default()
            .pg_pool(self.test_pool.clone())
            .listen_os_shutdown_signals(false)
            .poll_interval(Duration::from_millis(50))
            .wait_period(Duration::from_millis(10))
    }

    pub async fn enqueue(
        &self,
        job_class: &str,
        args: impl serde::Serialize,
        spec: JobSpec,
    ) -> JobHandle {
        insert_job(
            &self.test_pool,
            "que_jobs",
            job_class,
            serde_json::to_value(args).expect("Failed to serialize args"),
            spec,
        )
        .await
        .expect("Failed to insert job")
    }

    pub async fn get_jobs(&self) -> Vec<JobRow> {
        self.get_jobs_in("que_jobs").await
    }

    pub async fn get_jobs_in(&self, table: &str) -> Vec<JobRow> {
        sqlx::query_as(&format!(
            r#"
                select priority, run_at, job_id, job_class, args, error_count, last_error
                from {table}
                order by priority, run_at, job_id
            "#
        ))
        .fetch_all(&self.test_pool)
        .await
        .expect("Failed to get jobs")
    }

    /// Advisory locks currently held against this test database, by any
    /// session.
    pub async fn advisory_lock_count(&self) -> i64 {
        sqlx::query_scalar(
            r#"
                select count(*) from pg_locks
                where locktype = 'advisory'
                and database = (select oid from pg_database where datname = current_database())
            "#,
        )
        .fetch_one(&self.test_pool)
        .await
        .expect("Failed to count advisory locks")
    }

    pub async fn locker_pids(&self) -> Vec<i32> {
        sqlx::query_scalar("select pid from que_lockers order by pid")
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get locker registrations")
    }
}

pub async fn create_test_database() -> TestDatabase {
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_que_worker");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = uuid::Uuid::now_v7();
    let db_name = format!("__test_que_worker_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(test_options)
        .await
        .expect("Failed to connect to test database");

    migrate(&test_pool).await.expect("Failed to migrate");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let test_db = create_test_database().await;
    let test_db_2 = test_db.clone();

    let result = tokio::spawn(async move {
        test_fn(test_db_2).await;
    })
    .await;

    test_db.drop().await;
    result.expect("Test failed");
}

pub struct StaticCounter {
    cell: OnceCell<Mutex<u32>>,
}

async fn init_job_count() -> Mutex<u32> {
    Mutex::new(0)
}

impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn increment(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        let mut count = cell.lock().await;
        *count += 1;
        *count
    }

    pub async fn get(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        *cell.lock().await
    }
}

/// An append-only log for asserting on execution order across tasks.
pub struct StaticLog {
    cell: OnceCell<Mutex<Vec<String>>>,
}

async fn init_log() -> Mutex<Vec<String>> {
    Mutex::new(Vec::new())
}

impl StaticLog {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn push(&self, entry: impl Into<String>) {
        let cell = self.cell.get_or_init(init_log).await;
        cell.lock().await.push(entry.into());
    }

    pub async fn snapshot(&self) -> Vec<String> {
        let cell = self.cell.get_or_init(init_log).await;
        cell.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }
}

/// Poll `check` until it returns true or the deadline passes.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
