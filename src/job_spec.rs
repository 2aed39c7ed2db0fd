use chrono::{DateTime, Utc};

/// Optional per-job settings used when inserting a job.
///
/// Fields left as `None` fall back to the table defaults: priority 100 and
/// `run_at = now()`.
///
/// ```
/// use que_worker::JobSpec;
///
/// let spec = JobSpec {
///     priority: Some(10),
///     ..Default::default()
/// };
/// # let _ = spec;
/// ```
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub priority: Option<i16>,
    pub run_at: Option<DateTime<Utc>>,
}
