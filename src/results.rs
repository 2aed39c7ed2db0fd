use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::job::LockedJob;

/// Unbounded FIFO of finished jobs whose advisory locks still need to be
/// released on the locker's dedicated session.
///
/// Workers push from their own tasks; only the locker drains. No bound is
/// needed: the buffer upstream already limits how many jobs can be in
/// flight at once.
pub struct ResultQueue {
    queue: Mutex<VecDeque<LockedJob>>,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, job: LockedJob) {
        self.queue.lock().await.push_back(job);
    }

    /// Take everything currently queued, oldest first.
    pub async fn drain(&self) -> Vec<LockedJob> {
        self.queue.lock().await.drain(..).collect()
    }

    pub async fn size(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for ResultQueue {
    fn default() -> Self {
        Self::new()
    }
}
