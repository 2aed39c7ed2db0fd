use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::buffer::JobBuffer;
use crate::registry::TaskRegistry;
use crate::results::ResultQueue;

/// One member of the worker pool.
///
/// A worker repeatedly pops the most urgent job within its priority
/// ceiling, hands it to the task registry, and forwards the handle to the
/// result queue so the locker can release its advisory lock. It exits when
/// the buffer hands back the stop sentinel.
pub(crate) struct Worker {
    ceiling: Option<i16>,
    buffer: Arc<JobBuffer>,
    results: Arc<ResultQueue>,
    registry: Arc<TaskRegistry>,
    pg_pool: PgPool,
}

impl Worker {
    pub(crate) fn new(
        ceiling: Option<i16>,
        buffer: Arc<JobBuffer>,
        results: Arc<ResultQueue>,
        registry: Arc<TaskRegistry>,
        pg_pool: PgPool,
    ) -> Self {
        Self {
            ceiling,
            buffer,
            results,
            registry,
            pg_pool,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        trace!(ceiling = ?self.ceiling, "Worker started");

        while let Some(job) = self.buffer.pop(self.ceiling).await {
            self.registry.run_job(&self.pg_pool, &job).await;

            // Success, failure, or vanished row: the lock is always
            // released, so the handle always reaches the locker.
            self.results.push(job).await;
        }

        debug!(ceiling = ?self.ceiling, "Worker stopped");
    }
}
