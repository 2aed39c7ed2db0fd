use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use getset::Getters;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::JobBuffer;
use crate::errors::Result;
use crate::job::LockedJob;
use crate::pool::Session;
use crate::registry::TaskRegistry;
use crate::results::ResultQueue;
use crate::shutdown::ShutdownSignal;
use crate::sql::lockers::{clean_lockers, delete_locker, register_locker};
use crate::sql::poll_jobs::poll_jobs;
use crate::sql::unlock_job::{unlock_all, unlock_job};
use crate::worker::Worker;

/// Lifecycle of a [`Locker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// One queue table and its polling cadence.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct QueueConfig {
    /// Queue name as configured
    name: String,
    /// Escaped identifier safe to interpolate into SQL
    table: String,
    poll_interval: Duration,
}

impl QueueConfig {
    pub(crate) fn new(name: String, table: String, poll_interval: Duration) -> Self {
        Self {
            name,
            table,
            poll_interval,
        }
    }
}

/// The coordination engine: polls queue tables for work under session-level
/// advisory locks, keeps a bounded buffer of locked jobs fed to a fixed
/// pool of priority-stratified workers, and releases every lock on the way
/// down.
///
/// One dedicated Postgres session belongs to the locker for its entire
/// run. Advisory locks are scoped to that session, so it is never shared
/// with the workers: a worker's rollback or disconnect must not be able to
/// drop the locks. Workers check their own sessions out of the shared
/// pool.
///
/// The locker registers itself in `que_lockers` on startup and removes the
/// row during shutdown; rows abandoned by crashed processes are cleaned up
/// the next time any locker registers.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Locker {
    /// Number of workers spawned
    pub(crate) worker_count: usize,
    /// Per-worker priority ceilings, one entry per worker
    pub(crate) worker_priorities: Vec<Option<i16>>,
    /// Queue tables to poll, in configuration order
    pub(crate) queues: Vec<QueueConfig>,
    /// Pause between poll-loop ticks
    pub(crate) wait_period: Duration,
    /// Buffer size below which a refill poll is triggered
    pub(crate) minimum_buffer_size: usize,
    /// Hard cap on the number of advisory locks held at once
    pub(crate) maximum_buffer_size: usize,
    /// Shared connection pool for workers and job settlement
    pub(crate) pg_pool: PgPool,
    #[getset(skip)]
    pub(crate) registry: Arc<TaskRegistry>,
    #[getset(skip)]
    pub(crate) buffer: Arc<JobBuffer>,
    #[getset(skip)]
    pub(crate) results: Arc<ResultQueue>,
    #[getset(skip)]
    pub(crate) shutdown_signal: ShutdownSignal,
    #[getset(skip)]
    pub(crate) shutdown_notifier: Arc<Notify>,
    #[getset(skip)]
    pub(crate) state: RwLock<LockerState>,
    /// Caller-supplied dedicated session, taken by the first `run`
    #[getset(skip)]
    pub(crate) dedicated_connection: Mutex<Option<PoolConnection<Postgres>>>,
}

impl Locker {
    /// Creates a new `LockerOptions` builder with default settings.
    pub fn options() -> crate::builder::LockerOptions {
        crate::builder::LockerOptions::default()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LockerState {
        *self.state.read().await
    }

    /// Request a graceful shutdown.
    ///
    /// Returns immediately; `run` completes the shutdown sequence and
    /// returns once every advisory lock has been dealt with. Safe to call
    /// any number of times, from any task.
    pub fn request_shutdown(&self) {
        self.shutdown_notifier.notify_one();
    }

    /// Run the locker until a shutdown is requested (programmatically or
    /// by an OS signal), then shut down in order and return.
    ///
    /// Startup: check out the dedicated session, garbage-collect stale
    /// `que_lockers` rows, register this locker, spawn the workers. Then
    /// each tick of the poll loop drains the result queue (releasing
    /// locks), refills the buffer from any queue whose cadence is due
    /// while the buffer sits under its low watermark, and sleeps for the
    /// wait period.
    ///
    /// By the time `run` returns, no advisory lock acquired by this locker
    /// is still held and its `que_lockers` row is gone.
    pub async fn run(&self) -> Result<()> {
        let mut session = match self.dedicated_connection.lock().await.take() {
            Some(conn) => Session::from_connection(conn),
            None => Session::checkout(&self.pg_pool).await?,
        };

        let cleaned = clean_lockers(session.conn()).await?;
        if cleaned > 0 {
            info!(cleaned, "Removed stale locker registrations");
        }

        let locker_pid =
            register_locker(session.conn(), self.worker_count as i32, false).await?;
        info!(
            locker_pid,
            worker_count = self.worker_count,
            queues = ?self.queues.iter().map(|q| q.name()).collect::<Vec<_>>(),
            "Locker registered"
        );

        let workers: Vec<JoinHandle<()>> = self
            .worker_priorities
            .iter()
            .map(|ceiling| {
                Worker::new(
                    *ceiling,
                    self.buffer.clone(),
                    self.results.clone(),
                    self.registry.clone(),
                    self.pg_pool.clone(),
                )
                .spawn()
            })
            .collect();

        // job_ids whose advisory locks this session currently holds. Only
        // this task touches it: polls add ids, confirmed unlocks remove
        // them, so it always equals buffer + in-flight + result queue.
        let mut held: HashSet<i64> = HashSet::new();
        let mut last_polls: Vec<Option<Instant>> = vec![None; self.queues.len()];

        let signal = self.shutdown_signal.clone();
        let notifier = self.shutdown_notifier.clone();
        let shutdown = async move {
            tokio::select! {
                _ = signal => {},
                _ = notifier.notified() => {},
            }
        };
        tokio::pin!(shutdown);

        self.set_state(LockerState::Running).await;
        info!("Locker running");

        loop {
            self.drain_results(&mut session, &mut held).await;
            self.refill(&mut session, &mut held, &mut last_polls).await;

            tokio::select! {
                _ = tokio::time::sleep(self.wait_period) => {}
                _ = &mut shutdown => break,
            }
        }

        self.shutdown(&mut session, &mut held, locker_pid, workers)
            .await;

        // Hand the dedicated session back to the pool before reporting
        // the locker stopped.
        drop(session);
        self.set_state(LockerState::Stopped).await;
        info!("Locker stopped");

        Ok(())
    }

    async fn set_state(&self, new_state: LockerState) {
        let mut state = self.state.write().await;
        debug!(old_state = ?*state, ?new_state, "Locker state transition");
        *state = new_state;
    }

    /// Release the lock of every job the workers have finished, until the
    /// result queue is momentarily empty.
    ///
    /// A handle is only forgotten once its unlock is confirmed; on a
    /// transient SQL error the handle goes back on the queue and release
    /// is retried next tick. (If the process dies first, Postgres drops
    /// the session's locks itself.)
    async fn drain_results(&self, session: &mut Session, held: &mut HashSet<i64>) {
        loop {
            let batch = self.results.drain().await;
            if batch.is_empty() {
                return;
            }

            let mut batch = batch.into_iter();
            while let Some(job) = batch.next() {
                let job_id = *job.handle().job_id();
                match unlock_job(session.conn(), job_id).await {
                    Ok(was_held) => {
                        if !was_held {
                            warn!(job_id, "Advisory lock was not held at release");
                        }
                        held.remove(&job_id);
                        debug!(job_id, "Released job");
                    }
                    Err(e) => {
                        error!(job_id, error = %e, "Failed to release advisory lock, will retry");
                        self.results.push(job).await;
                        for rest in batch {
                            self.results.push(rest).await;
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Poll any queue whose cadence is due while the buffer is under its
    /// low watermark, and push the newly locked jobs into the buffer.
    ///
    /// Each queue keeps its own cadence clock: one queue refilling the
    /// buffer does not postpone another queue's poll, and a skipped queue
    /// (buffer full enough, or no lock capacity left) stays due until it
    /// actually polls. The poll excludes every job_id currently in the
    /// pipeline and asks for no more than the remaining lock capacity.
    async fn refill(
        &self,
        session: &mut Session,
        held: &mut HashSet<i64>,
        last_polls: &mut [Option<Instant>],
    ) {
        for (idx, queue) in self.queues.iter().enumerate() {
            let due = last_polls[idx].map_or(true, |at| at.elapsed() >= *queue.poll_interval());
            if !due {
                continue;
            }

            if self.buffer.size().await >= self.minimum_buffer_size {
                continue;
            }

            let capacity = self.maximum_buffer_size.saturating_sub(held.len());
            if capacity == 0 {
                continue;
            }

            let exclude: Vec<i64> = held.iter().copied().collect();
            match poll_jobs(
                session.conn(),
                queue.table(),
                &exclude,
                capacity as i32,
            )
            .await
            {
                Ok(handles) => {
                    last_polls[idx] = Some(Instant::now());

                    if handles.is_empty() {
                        continue;
                    }
                    debug!(
                        queue = queue.name(),
                        count = handles.len(),
                        "Locked jobs"
                    );

                    held.extend(handles.iter().map(|h| *h.job_id()));
                    let locked = handles
                        .into_iter()
                        .map(|handle| LockedJob::new(queue.table().clone(), handle))
                        .collect();
                    self.buffer.push(locked).await;
                }
                Err(e) => {
                    last_polls[idx] = Some(Instant::now());
                    error!(queue = queue.name(), error = %e, "Failed to poll for jobs");
                }
            }
        }
    }

    /// The ordered shutdown sequence. Errors here are logged and the
    /// remaining steps still run; only process death beats a thorough
    /// cleanup, and Postgres handles that case itself.
    async fn shutdown(
        &self,
        session: &mut Session,
        held: &mut HashSet<i64>,
        locker_pid: i32,
        workers: Vec<JoinHandle<()>>,
    ) {
        self.set_state(LockerState::Stopping).await;
        info!("Locker stopping");

        // Wake blocked workers with the stop sentinel; whatever is still
        // buffered was never started and is harvested for release.
        self.buffer.stop().await;
        let unstarted = self.buffer.clear().await;

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = ?e, "Worker task panicked");
            }
        }

        // With the workers gone, everything owed a release is either in
        // the result queue or in the harvested remainder.
        for job in self.results.drain().await {
            self.release_on_shutdown(session, held, &job).await;
        }
        for job in unstarted {
            self.release_on_shutdown(session, held, &job).await;
        }

        if !held.is_empty() {
            warn!(
                count = held.len(),
                "Advisory locks still accounted as held after shutdown drain"
            );
        }
        // The dedicated session returns to the pool rather than closing,
        // so scrub anything a failed release may have left behind.
        if let Err(e) = unlock_all(session.conn()).await {
            error!(error = %e, "Failed to scrub advisory locks");
        }
        held.clear();

        if let Err(e) = delete_locker(session.conn(), locker_pid).await {
            error!(error = %e, "Failed to delete locker registration");
        }
    }

    async fn release_on_shutdown(
        &self,
        session: &mut Session,
        held: &mut HashSet<i64>,
        job: &LockedJob,
    ) {
        let job_id = *job.handle().job_id();
        match unlock_job(session.conn(), job_id).await {
            Ok(was_held) => {
                if !was_held {
                    warn!(job_id, "Advisory lock was not held at release");
                }
                held.remove(&job_id);
                debug!(job_id, "Released job during shutdown");
            }
            Err(e) => {
                error!(job_id, error = %e, "Failed to release advisory lock during shutdown");
            }
        }
    }
}
