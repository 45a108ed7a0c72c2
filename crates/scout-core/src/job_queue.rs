use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::job::CrawlJob;

/// Result of trying to claim work from the queue.
#[derive(Debug)]
pub enum Claim {
    /// A job whose backoff has elapsed; lowest rank first.
    Ready(CrawlJob),
    /// Nothing is ready yet; the earliest pending job becomes ready at this instant.
    Wait(Instant),
    /// No pending jobs remain.
    Drained,
}

#[derive(Debug)]
struct PendingJob {
    ready_at: Instant,
    job: CrawlJob,
}

/// In-memory pending queue shared by the crawl workers of one request.
///
/// This is the only structure workers mutate concurrently; all access goes
/// through a single mutex. Jobs leave the queue when claimed and are owned by
/// exactly one worker until they are re-queued or finish.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: Mutex<Vec<PendingJob>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(jobs: impl IntoIterator<Item = CrawlJob>) -> Self {
        let now = Instant::now();
        let pending = jobs
            .into_iter()
            .map(|job| PendingJob { ready_at: now, job })
            .collect();
        Self {
            pending: Mutex::new(pending),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingJob>> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job queue mutex");
            poisoned.into_inner()
        })
    }

    /// Re-queue a job that becomes eligible at `ready_at`.
    pub fn push(&self, job: CrawlJob, ready_at: Instant) {
        self.lock().push(PendingJob { ready_at, job });
        self.notify.notify_waiters();
    }

    /// Claim the lowest-ranked job that is ready at `now`.
    pub fn claim(&self, now: Instant) -> Claim {
        let mut pending = self.lock();

        let ready = pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.ready_at <= now)
            .min_by_key(|(_, p)| p.job.rank())
            .map(|(idx, _)| idx);

        match ready {
            Some(idx) => Claim::Ready(pending.swap_remove(idx).job),
            None => pending
                .iter()
                .map(|p| p.ready_at)
                .min()
                .map_or(Claim::Drained, Claim::Wait),
        }
    }

    /// Remove every pending job, regardless of readiness.
    pub fn drain(&self) -> Vec<CrawlJob> {
        self.lock().drain(..).map(|p| p.job).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the next time a job is pushed.
    pub async fn pushed(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::SearchHit;

    fn job(rank: usize) -> CrawlJob {
        let hit = SearchHit {
            url: format!("https://shop{rank}.example.com/"),
            title: String::new(),
            snippet: String::new(),
            rank,
        };
        CrawlJob::new(hit, Instant::now() + Duration::from_secs(60))
    }

    #[tokio::test]
    async fn claims_in_rank_order() {
        let queue = JobQueue::new([job(2), job(0), job(1)]);
        let now = Instant::now();

        let mut ranks = Vec::new();
        while let Claim::Ready(job) = queue.claim(now) {
            ranks.push(job.rank());
        }
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(matches!(queue.claim(now), Claim::Drained));
    }

    #[tokio::test]
    async fn delayed_job_is_not_ready_until_backoff_elapses() {
        let queue = JobQueue::new([]);
        let now = Instant::now();
        let ready_at = now + Duration::from_millis(500);
        queue.push(job(0), ready_at);

        match queue.claim(now) {
            Claim::Wait(at) => assert_eq!(at, ready_at),
            other => panic!("expected Wait, got {other:?}"),
        }
        assert!(matches!(queue.claim(ready_at), Claim::Ready(_)));
    }

    #[tokio::test]
    async fn ready_job_beats_lower_ranked_delayed_job() {
        let queue = JobQueue::new([job(3)]);
        let now = Instant::now();
        queue.push(job(0), now + Duration::from_secs(1));

        match queue.claim(now) {
            Claim::Ready(job) => assert_eq!(job.rank(), 3),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drain_empties_queue() {
        let queue = JobQueue::new([job(0), job(1)]);
        queue.push(job(2), Instant::now() + Duration::from_secs(5));
        assert_eq!(queue.drain().len(), 3);
        assert!(queue.is_empty());
    }
}
