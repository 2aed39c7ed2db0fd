use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use getset::Getters;
use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::job::{JobRow, LockedJob};
use crate::sql::destroy_job::destroy_job;
use crate::sql::get_job::get_job;
use crate::sql::set_error::set_error;

/// Type alias for task handler functions.
///
/// A task handler is a closure that takes a `WorkerContext` and returns a
/// future resolving to `Result<(), String>`; the string is the error
/// message recorded on the job row when the task fails.
pub type TaskFn = Box<
    dyn Fn(WorkerContext) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// Everything a task handler gets to work with: the loaded job row, the
/// queue table it came from, and a pool for its own database access.
///
/// Handlers never see the locker's dedicated session; they check sessions
/// out of the shared pool like any other caller.
#[derive(Clone, Getters)]
#[getset(get = "pub")]
pub struct WorkerContext {
    pg_pool: PgPool,
    job: JobRow,
    queue: String,
}

#[derive(Error, Debug)]
enum RunJobError {
    #[error("No handler registered for job class '{0}'")]
    ClassNotFound(String),
    #[error("Task failed execution to complete : {0}")]
    TaskPanic(#[from] tokio::task::JoinError),
    #[error("Task returned the following error : {0}")]
    TaskError(String),
}

/// How long to wait before retrying a job that has now failed
/// `error_count` times.
fn retry_interval_secs(error_count: i32) -> i64 {
    i64::from(error_count).pow(4) + 3
}

/// Maps job classes to their handler functions and runs locked jobs
/// through them.
///
/// The registry is the job runtime the locker pipeline hands work to: it
/// re-fetches the row for a locked handle, executes the matching handler,
/// and settles the row (destroy on success, reschedule with a bumped error
/// count on failure). It never touches advisory locks; releasing those is
/// the worker's and locker's business, and is always correct regardless of
/// what happened here.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `job_class`. The job's `args` JSON is
    /// deserialized into `T` before the handler runs; a payload that fails
    /// to deserialize fails the job.
    pub fn define_job<T, E, Fut, F>(&mut self, job_class: &str, task_fn: F)
    where
        T: for<'de> Deserialize<'de> + Send,
        E: Debug,
        Fut: Future<Output = Result<(), E>> + Send,
        F: Fn(WorkerContext, T) -> Fut + Send + Sync + 'static,
    {
        let task_fn = Arc::new(task_fn);
        let wrapped = move |ctx: WorkerContext| {
            let task_fn = task_fn.clone();
            async move {
                let args = serde_json::from_value(ctx.job().args().clone());

                match args {
                    Err(e) => Err(format!("{e:?}")),
                    Ok(args) => match task_fn(ctx, args).await {
                        Err(e) => Err(format!("{e:?}")),
                        Ok(v) => Ok(v),
                    },
                }
            }
            .boxed()
        };

        self.tasks.insert(job_class.to_string(), Box::new(wrapped));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run one locked job to completion and settle its row.
    ///
    /// Every outcome is terminal for this attempt; nothing is propagated,
    /// because the caller releases the advisory lock unconditionally:
    /// on success the row is gone, on failure `run_at` has been pushed
    /// into the future, and on a vanished row there is nothing left to
    /// protect.
    pub(crate) async fn run_job(&self, pool: &PgPool, locked: &LockedJob) {
        let handle = locked.handle();
        let queue = locked.queue();

        let row = match get_job(pool, queue, handle).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(
                    job_id = handle.job_id(),
                    queue, "Job row gone before execution, skipping"
                );
                return;
            }
            Err(e) => {
                error!(job_id = handle.job_id(), queue, error = %e, "Could not load job");
                return;
            }
        };

        let start = Instant::now();
        let result = self.invoke(pool, queue, &row).await;
        let duration = start.elapsed().as_millis();

        match result {
            Ok(()) => {
                info!(
                    job_class = row.job_class(),
                    job_id = handle.job_id(),
                    duration,
                    "Completed job with success"
                );

                if let Err(e) = destroy_job(pool, queue, handle).await {
                    error!(job_id = handle.job_id(), error = %e, "Failed to destroy finished job");
                }
            }
            Err(e) => {
                let error_count = row.error_count() + 1;
                let retry_in = retry_interval_secs(error_count);
                warn!(
                    error = ?e,
                    job_class = row.job_class(),
                    job_id = handle.job_id(),
                    error_count,
                    retry_in,
                    "Failed job"
                );

                let message = format!("{e:?}");
                if let Err(e) =
                    set_error(pool, queue, handle, error_count, retry_in, &message).await
                {
                    error!(job_id = handle.job_id(), error = %e, "Failed to record job error");
                }
            }
        }
    }

    async fn invoke(&self, pool: &PgPool, queue: &str, row: &JobRow) -> Result<(), RunJobError> {
        let task_fn = self
            .tasks
            .get(row.job_class())
            .ok_or_else(|| RunJobError::ClassNotFound(row.job_class().clone()))?;

        let ctx = WorkerContext {
            pg_pool: pool.clone(),
            job: row.clone(),
            queue: queue.to_string(),
        };

        // Spawned so a panicking handler surfaces as a JoinError instead
        // of taking the worker task down with it.
        let task_fut = task_fn(ctx);
        tokio::spawn(task_fut)
            .await?
            .map_err(RunJobError::TaskError)?;

        Ok(())
    }
}
