use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use uuid::Uuid;

/// A live recurring job, keyed by chat id in the jobs map.
struct ArmedJob {
    job_id: Uuid,
    interval_seconds: u64,
}

/// One row of /listjobs output.
pub struct ActiveJob {
    pub chat_id: i64,
    pub interval_seconds: u64,
    pub next_fire: Option<DateTime<Utc>>,
}

/// Wrapper around tokio-cron-scheduler that maintains at most one recurring
/// report task per chat. Re-arming replaces the old task (cancel, then
/// register fresh) rather than mutating its interval in place, which resets
/// the phase: the first tick of a new arm always fires immediately.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Mutex<HashMap<i64, ArmedJob>>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Start the underlying scheduler loop
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    /// Register the recurring task for `chat_id`, replacing any existing one.
    /// `tick` runs once immediately and then every `interval_seconds`.
    ///
    /// The jobs lock is held across the whole replace so two concurrent arms
    /// for one chat cannot leave two live tasks behind.
    pub async fn arm<F>(&self, chat_id: i64, interval_seconds: u64, tick: F) -> Result<()>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let tick = Arc::new(tick);
        let mut jobs = self.jobs.lock().await;

        if let Some(old) = jobs.remove(&chat_id) {
            self.inner
                .remove(&old.job_id)
                .await
                .with_context(|| format!("Failed to cancel old job for chat {chat_id}"))?;
        }

        let job_tick = tick.clone();
        let job = Job::new_repeated_async(
            Duration::from_secs(interval_seconds),
            move |_uuid, _lock| job_tick(),
        )
        .with_context(|| format!("Failed to create job for chat {chat_id}"))?;

        let job_id = job.guid();
        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job for chat {chat_id}"))?;

        jobs.insert(
            chat_id,
            ArmedJob {
                job_id,
                interval_seconds,
            },
        );

        // Repeated jobs first fire a full interval from now; the zero-delay
        // first tick runs here.
        tokio::spawn(tick());

        info!(
            "Armed reports for chat {} every {} seconds",
            chat_id, interval_seconds
        );
        Ok(())
    }

    /// Cancel the task for `chat_id`. Returns whether one existed; disarming
    /// a chat with no task is a no-op. An in-flight tick is allowed to
    /// finish, but no further ticks fire after this returns.
    pub async fn disarm(&self, chat_id: i64) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;

        match jobs.remove(&chat_id) {
            Some(job) => {
                self.inner
                    .remove(&job.job_id)
                    .await
                    .with_context(|| format!("Failed to cancel job for chat {chat_id}"))?;
                info!("Disarmed reports for chat {}", chat_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn is_armed(&self, chat_id: i64) -> bool {
        self.jobs.lock().await.contains_key(&chat_id)
    }

    /// All live tasks across chats, ordered by chat id.
    pub async fn list_active(&self) -> Vec<ActiveJob> {
        let jobs = self.jobs.lock().await;

        let mut active = Vec::with_capacity(jobs.len());
        for (&chat_id, job) in jobs.iter() {
            let next_fire = self
                .inner
                .clone()
                .next_tick_for_job(job.job_id)
                .await
                .ok()
                .flatten();
            active.push(ActiveJob {
                chat_id,
                interval_seconds: job.interval_seconds,
                next_fire,
            });
        }
        active.sort_by_key(|job| job.chat_id);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tick(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static {
        move || -> BoxFuture<'static, ()> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    async fn scheduler() -> Scheduler {
        let scheduler = Scheduler::new().await.unwrap();
        scheduler.start().await.unwrap();
        scheduler
    }

    #[tokio::test]
    async fn arm_fires_immediately() {
        let scheduler = scheduler().await;
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .arm(42, 3600, counting_tick(counter.clone()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_arm_leaves_one_job() {
        let scheduler = scheduler().await;
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            scheduler
                .arm(42, 3600, counting_tick(counter.clone()))
                .await
                .unwrap();
        }

        let active = scheduler.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].chat_id, 42);
        assert_eq!(active[0].interval_seconds, 3600);
    }

    #[tokio::test]
    async fn rearm_replaces_interval() {
        let scheduler = scheduler().await;
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .arm(42, 3600, counting_tick(counter.clone()))
            .await
            .unwrap();
        scheduler
            .arm(42, 60, counting_tick(counter.clone()))
            .await
            .unwrap();

        let active = scheduler.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].interval_seconds, 60);
    }

    #[tokio::test]
    async fn disarm_reports_whether_a_job_existed() {
        let scheduler = scheduler().await;
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(!scheduler.disarm(42).await.unwrap());

        scheduler
            .arm(42, 3600, counting_tick(counter.clone()))
            .await
            .unwrap();
        assert!(scheduler.is_armed(42).await);

        assert!(scheduler.disarm(42).await.unwrap());
        assert!(!scheduler.disarm(42).await.unwrap());
        assert!(!scheduler.is_armed(42).await);
        assert!(scheduler.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn chats_keep_independent_jobs() {
        let scheduler = scheduler().await;
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .arm(1, 3600, counting_tick(counter.clone()))
            .await
            .unwrap();
        scheduler
            .arm(2, 60, counting_tick(counter.clone()))
            .await
            .unwrap();
        scheduler.disarm(1).await.unwrap();

        let active = scheduler.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].chat_id, 2);
        assert_eq!(active[0].interval_seconds, 60);
    }
}
