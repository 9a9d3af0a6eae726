use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::AppResult;
use crate::types::job::Job;

/// Fire-and-forget background job submission. The worker side runs each job
/// at least once; no deduplication is assumed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &Job) -> AppResult<()>;

    /// Whether jobs can currently be handed off. Submissions still persist
    /// while this is false; only their notifications are lost.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Hand every pending job to the queue. A failed enqueue is logged and the
/// rest are still attempted; the originating request has already committed.
pub async fn dispatch_all(queue: &dyn JobQueue, jobs: Vec<Job>) -> usize {
    let mut dispatched = 0;
    for job in jobs {
        match queue.enqueue(&job).await {
            Ok(()) => dispatched += 1,
            Err(e) => {
                tracing::error!(error = %e, routing_key = job.routing_key(), "failed to enqueue job");
            }
        }
    }
    dispatched
}

/// In-process queue that only records what was enqueued.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    pub fn drain(&self) -> Vec<Job> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: &Job) -> AppResult<()> {
        self.jobs.lock().push(job.clone());
        Ok(())
    }
}
