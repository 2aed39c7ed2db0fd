use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{oneshot, Mutex};

use crate::job::LockedJob;

struct Waiter {
    ceiling: Option<i16>,
    tx: oneshot::Sender<Option<LockedJob>>,
}

/// Bounded, priority-ordered buffer of locked jobs sitting between the
/// locker and the worker pool.
///
/// Jobs are kept sorted by their `(priority, run_at, job_id)` handle, so a
/// pop always hands out the most urgent eligible job. Poppers that find
/// nothing eligible park FIFO on a oneshot channel, exactly one of which is
/// completed per pushed job. The buffer itself never enforces its upper
/// bound; the locker limits what it polls for instead.
///
/// `stop` closes the buffer: parked and future pops resolve to `None` (the
/// worker stop sentinel) while any jobs still buffered stay behind for
/// `clear` to harvest during shutdown.
pub struct JobBuffer {
    jobs: Mutex<Vec<LockedJob>>,
    waiters: Mutex<VecDeque<Waiter>>,
    stopped: AtomicBool,
}

fn eligible_index(jobs: &[LockedJob], ceiling: Option<i16>) -> Option<usize> {
    jobs.iter()
        .position(|job| ceiling.map_or(true, |max| *job.handle().priority() <= max))
}

impl JobBuffer {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            waiters: Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Insert `incoming` jobs at their sorted positions, then serve any
    /// parked poppers, in the order they started waiting.
    pub async fn push(&self, incoming: Vec<LockedJob>) {
        let mut jobs = self.jobs.lock().await;
        for job in incoming {
            let at = jobs.partition_point(|held| held <= &job);
            jobs.insert(at, job);
        }

        let mut waiters = self.waiters.lock().await;
        let mut i = 0;
        while i < waiters.len() && !jobs.is_empty() {
            let Some(at) = eligible_index(&jobs, waiters[i].ceiling) else {
                i += 1;
                continue;
            };

            let waiter = waiters.remove(i).expect("index was in bounds");
            let job = jobs.remove(at);
            if let Err(Some(job)) = waiter.tx.send(Some(job)) {
                // The popper gave up (dropped its receiver); keep its job.
                let at = jobs.partition_point(|held| held <= &job);
                jobs.insert(at, job);
            }
        }
    }

    /// Remove and return the smallest job whose priority is within
    /// `ceiling` (any job when `ceiling` is `None`), waiting for one to be
    /// pushed if necessary. Returns `None` once the buffer is stopped.
    pub async fn pop(&self, ceiling: Option<i16>) -> Option<LockedJob> {
        let rx = {
            let mut jobs = self.jobs.lock().await;
            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(at) = eligible_index(&jobs, ceiling) {
                return Some(jobs.remove(at));
            }

            let (tx, rx) = oneshot::channel();
            self.waiters.lock().await.push_back(Waiter { ceiling, tx });
            rx
        };

        rx.await.unwrap_or(None)
    }

    /// Close the buffer and wake every parked popper with the stop
    /// sentinel. Buffered jobs are left in place for `clear`.
    pub async fn stop(&self) {
        let _jobs = self.jobs.lock().await;
        self.stopped.store(true, Ordering::SeqCst);

        let mut waiters = self.waiters.lock().await;
        while let Some(waiter) = waiters.pop_front() {
            let _ = waiter.tx.send(None);
        }
    }

    pub async fn size(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Snapshot of the buffered jobs in sorted order.
    pub async fn to_vec(&self) -> Vec<LockedJob> {
        self.jobs.lock().await.clone()
    }

    /// Drain every buffered job, returning them in sorted order. Used at
    /// shutdown to harvest jobs whose locks still need releasing.
    pub async fn clear(&self) -> Vec<LockedJob> {
        let mut jobs = self.jobs.lock().await;
        std::mem::take(&mut *jobs)
    }
}

impl Default for JobBuffer {
    fn default() -> Self {
        Self::new()
    }
}
