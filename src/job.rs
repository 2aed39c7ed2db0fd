use chrono::{DateTime, Utc};
use getset::Getters;
use serde_json::Value;
use sqlx::FromRow;

/// The canonical identity of a job row: its primary key
/// `(priority, run_at, job_id)`.
///
/// A handle is sufficient to re-fetch, update, destroy, or unlock a job.
/// Handles order ascending lexicographically on the key, which is also the
/// order jobs become eligible to run; lower `priority` values run earlier.
#[derive(FromRow, Getters, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[getset(get = "pub")]
pub struct JobHandle {
    /// Lower number means it should run sooner
    priority: i16,
    /// When it was due to run
    run_at: DateTime<Utc>,
    /// Unique id within the queue table
    job_id: i64,
}

impl JobHandle {
    pub fn new(priority: i16, run_at: DateTime<Utc>, job_id: i64) -> Self {
        Self {
            priority,
            run_at,
            job_id,
        }
    }
}

/// A full job row as loaded from a queue table.
#[derive(FromRow, Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct JobRow {
    priority: i16,
    run_at: DateTime<Utc>,
    job_id: i64,
    /// Class name used to look up the handler in the task registry
    job_class: String,
    /// The JSON arguments of the job
    args: Value,
    /// How many times this job has errored so far
    error_count: i32,
    /// If error_count > 0, why did it fail last ?
    last_error: Option<String>,
}

impl JobRow {
    /// The handle identifying this row.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            priority: self.priority,
            run_at: self.run_at,
            job_id: self.job_id,
        }
    }
}

/// A job whose advisory lock is currently held by this process.
///
/// Queue names name tables, and the handle triple alone cannot tell which
/// table it came from, so the pipeline carries the queue alongside the
/// handle. Ordering compares the handle first, so a sorted collection of
/// `LockedJob`s is sorted exactly like the underlying handles.
#[derive(Getters, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[getset(get = "pub")]
pub struct LockedJob {
    handle: JobHandle,
    /// The (escaped) queue table this job was locked from
    queue: String,
}

impl LockedJob {
    pub fn new(queue: impl Into<String>, handle: JobHandle) -> Self {
        Self {
            handle,
            queue: queue.into(),
        }
    }
}
