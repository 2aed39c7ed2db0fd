use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::buffer::JobBuffer;
use crate::locker::{Locker, LockerState, QueueConfig};
use crate::registry::{TaskRegistry, WorkerContext};
use crate::results::ResultQueue;
use crate::shutdown::{never_shutdown_signal, shutdown_signal};
use crate::utils::escape_identifier;

pub const DEFAULT_QUEUE: &str = "que_jobs";
pub const DEFAULT_WORKER_COUNT: usize = 6;
pub const DEFAULT_WORKER_PRIORITIES: [i16; 3] = [10, 30, 50];
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_WAIT_PERIOD: Duration = Duration::from_millis(50);
pub const DEFAULT_MINIMUM_BUFFER_SIZE: usize = 2;
pub const DEFAULT_MAXIMUM_BUFFER_SIZE: usize = 8;

/// Poll intervals below this are considered a configuration mistake.
pub const MINIMUM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Builder for [`Locker`] instances.
pub struct LockerOptions {
    worker_count: Option<usize>,
    worker_priorities: Option<Vec<Option<i16>>>,
    queues: Vec<(String, Option<Duration>)>,
    poll_interval: Option<Duration>,
    wait_period: Option<Duration>,
    minimum_buffer_size: Option<usize>,
    maximum_buffer_size: Option<usize>,
    pg_pool: Option<PgPool>,
    database_url: Option<String>,
    max_pg_conn: Option<u32>,
    connection: Option<PoolConnection<Postgres>>,
    listen_os_shutdown_signals: bool,
    registry: TaskRegistry,
}

impl Default for LockerOptions {
    fn default() -> Self {
        Self {
            worker_count: None,
            worker_priorities: None,
            queues: Vec::new(),
            poll_interval: None,
            wait_period: None,
            minimum_buffer_size: None,
            maximum_buffer_size: None,
            pg_pool: None,
            database_url: None,
            max_pg_conn: None,
            connection: None,
            listen_os_shutdown_signals: true,
            registry: TaskRegistry::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LockerBuildError {
    #[error("Error occured while connecting to the postgres database : {0}")]
    ConnectError(#[from] sqlx::Error),
    #[error("Error occured while querying : {0}")]
    QueryError(#[from] crate::errors::QueWorkerError),
    #[error("Missing database_url config")]
    MissingDatabaseUrl,
    #[error("Invalid configuration : {0}")]
    InvalidConfig(String),
}

/// Pad or truncate the configured ceilings to exactly `worker_count`
/// entries; missing entries mean "no ceiling".
fn resolve_priorities(configured: Option<Vec<Option<i16>>>, worker_count: usize) -> Vec<Option<i16>> {
    let mut priorities = configured.unwrap_or_else(|| {
        DEFAULT_WORKER_PRIORITIES
            .iter()
            .copied()
            .map(Some)
            .collect()
    });
    priorities.resize(worker_count, None);
    priorities
}

impl LockerOptions {
    /// Validate the configuration, connect, and assemble a [`Locker`].
    pub async fn init(self) -> Result<Locker, LockerBuildError> {
        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval < MINIMUM_POLL_INTERVAL {
            return Err(LockerBuildError::InvalidConfig(format!(
                "poll_interval must be at least {MINIMUM_POLL_INTERVAL:?}, got {poll_interval:?}"
            )));
        }

        let minimum_buffer_size = self
            .minimum_buffer_size
            .unwrap_or(DEFAULT_MINIMUM_BUFFER_SIZE);
        let maximum_buffer_size = self
            .maximum_buffer_size
            .unwrap_or(DEFAULT_MAXIMUM_BUFFER_SIZE);
        if minimum_buffer_size > maximum_buffer_size {
            return Err(LockerBuildError::InvalidConfig(format!(
                "minimum_buffer_size ({minimum_buffer_size}) must not exceed \
                 maximum_buffer_size ({maximum_buffer_size})"
            )));
        }

        let pg_pool = match self.pg_pool {
            Some(pg_pool) => pg_pool,
            None => {
                let db_url = self
                    .database_url
                    .ok_or(LockerBuildError::MissingDatabaseUrl)?;

                crate::pool::connect(&db_url, self.max_pg_conn.unwrap_or(20)).await?
            }
        };

        let mut queue_configs = self.queues;
        if queue_configs.is_empty() {
            queue_configs.push((DEFAULT_QUEUE.to_string(), None));
        }

        let mut queues = Vec::with_capacity(queue_configs.len());
        for (name, interval) in queue_configs {
            let interval = interval.unwrap_or(poll_interval);
            if interval < MINIMUM_POLL_INTERVAL {
                return Err(LockerBuildError::InvalidConfig(format!(
                    "poll interval for queue '{name}' must be at least \
                     {MINIMUM_POLL_INTERVAL:?}, got {interval:?}"
                )));
            }

            let table = escape_identifier(&pg_pool, &name).await?;
            queues.push(QueueConfig::new(name, table, interval));
        }

        let worker_count = self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT);
        let worker_priorities = resolve_priorities(self.worker_priorities, worker_count);

        let shutdown_signal = if self.listen_os_shutdown_signals {
            shutdown_signal()
        } else {
            never_shutdown_signal()
        };

        Ok(Locker {
            worker_count,
            worker_priorities,
            queues,
            wait_period: self.wait_period.unwrap_or(DEFAULT_WAIT_PERIOD),
            minimum_buffer_size,
            maximum_buffer_size,
            pg_pool,
            registry: Arc::new(self.registry),
            buffer: Arc::new(JobBuffer::new()),
            results: Arc::new(ResultQueue::new()),
            shutdown_signal,
            shutdown_notifier: Arc::new(Notify::new()),
            state: RwLock::new(LockerState::Starting),
            dedicated_connection: Mutex::new(self.connection),
        })
    }

    pub fn worker_count(mut self, value: usize) -> Self {
        self.worker_count = Some(value);
        self
    }

    /// Per-worker priority ceilings; `None` entries accept any priority.
    /// The list is padded with `None` (or truncated) to the worker count.
    pub fn worker_priorities(mut self, value: Vec<Option<i16>>) -> Self {
        self.worker_priorities = Some(value);
        self
    }

    /// Add a queue table to poll. `poll_interval` falls back to the
    /// locker-wide default. Queues are polled in the order they are added.
    pub fn add_queue(mut self, name: &str, poll_interval: Option<Duration>) -> Self {
        self.queues.push((name.into(), poll_interval));
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    pub fn wait_period(mut self, value: Duration) -> Self {
        self.wait_period = Some(value);
        self
    }

    pub fn minimum_buffer_size(mut self, value: usize) -> Self {
        self.minimum_buffer_size = Some(value);
        self
    }

    pub fn maximum_buffer_size(mut self, value: usize) -> Self {
        self.maximum_buffer_size = Some(value);
        self
    }

    pub fn pg_pool(mut self, value: PgPool) -> Self {
        self.pg_pool = Some(value);
        self
    }

    pub fn database_url(mut self, value: &str) -> Self {
        self.database_url = Some(value.into());
        self
    }

    pub fn max_pg_conn(mut self, value: u32) -> Self {
        self.max_pg_conn = Some(value);
        self
    }

    /// Supply the dedicated session the locker will hold for its lifetime
    /// instead of letting it check one out of the pool.
    pub fn connection(mut self, value: PoolConnection<Postgres>) -> Self {
        self.connection = Some(value);
        self
    }

    /// Whether `run` should also complete shutdown on INT/TERM. Tests and
    /// embedders that call `request_shutdown` themselves turn this off.
    pub fn listen_os_shutdown_signals(mut self, value: bool) -> Self {
        self.listen_os_shutdown_signals = value;
        self
    }

    /// Register a handler for `job_class`; see [`TaskRegistry::define_job`].
    pub fn define_job<T, E, Fut, F>(mut self, job_class: &str, task_fn: F) -> Self
    where
        T: for<'de> Deserialize<'de> + Send,
        E: Debug,
        Fut: Future<Output = Result<(), E>> + Send,
        F: Fn(WorkerContext, T) -> Fut + Send + Sync + 'static,
    {
        self.registry.define_job(job_class, task_fn);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_are_padded_with_none() {
        let resolved = resolve_priorities(None, 6);
        assert_eq!(
            resolved,
            vec![Some(10), Some(30), Some(50), None, None, None]
        );
    }

    #[test]
    fn priorities_are_truncated_to_the_worker_count() {
        let resolved = resolve_priorities(Some(vec![Some(1), Some(2), Some(3), Some(4)]), 2);
        assert_eq!(resolved, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn rejects_a_too_small_poll_interval() {
        let result = LockerOptions::default()
            .poll_interval(Duration::from_millis(1))
            .init()
            .await;

        assert!(matches!(result, Err(LockerBuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn rejects_inverted_buffer_watermarks() {
        let result = LockerOptions::default()
            .minimum_buffer_size(9)
            .maximum_buffer_size(8)
            .init()
            .await;

        assert!(matches!(result, Err(LockerBuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn requires_a_connection_source() {
        let result = LockerOptions::default().init().await;
        assert!(matches!(result, Err(LockerBuildError::MissingDatabaseUrl)));
    }
}
