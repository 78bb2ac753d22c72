use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sfn_core::UpdateFrequency;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

pub const FETCH_JOB: &str = "sfn_fetch_news";

pub type EntryPoint = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Named repeating jobs on top of a started `JobScheduler`.
pub struct FetchScheduler {
    inner: JobScheduler,
    jobs: Mutex<HashMap<String, Uuid>>,
}

impl FetchScheduler {
    pub async fn start() -> Result<Self> {
        let inner = JobScheduler::new().await.context("creating scheduler")?;
        inner.start().await.context("starting scheduler")?;
        Ok(Self {
            inner,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Arm `job` to fire every `frequency` interval. Replaces a job of the same name.
    pub async fn schedule(&self, job: &str, frequency: UpdateFrequency, entry: EntryPoint) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(job) {
            self.inner
                .remove(&previous)
                .await
                .with_context(|| format!("removing previous `{job}` job"))?;
        }
        let scheduled = Job::new_repeated_async(frequency.interval(), move |_uuid, _sched| {
            let entry = entry.clone();
            Box::pin(async move { entry().await })
        })
        .with_context(|| format!("creating `{job}` job"))?;
        let id = self
            .inner
            .add(scheduled)
            .await
            .with_context(|| format!("adding `{job}` job"))?;
        jobs.insert(job.to_string(), id);
        info!(job, frequency = frequency.as_str(), "job scheduled");
        Ok(())
    }

    /// Returns whether a job by that name was armed.
    pub async fn cancel(&self, job: &str) -> Result<bool> {
        let Some(id) = self.jobs.lock().await.remove(job) else {
            return Ok(false);
        };
        self.inner
            .remove(&id)
            .await
            .with_context(|| format!("removing `{job}` job"))?;
        debug!(job, "job cancelled");
        Ok(true)
    }

    pub async fn reschedule(&self, job: &str, frequency: UpdateFrequency, entry: EntryPoint) -> Result<()> {
        self.cancel(job).await?;
        self.schedule(job, frequency, entry).await
    }

    pub async fn is_scheduled(&self, job: &str) -> bool {
        self.jobs.lock().await.contains_key(job)
    }

    pub async fn next_run(&self, job: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(id) = self.jobs.lock().await.get(job).copied() else {
            return Ok(None);
        };
        let mut sched = self.inner.clone();
        sched
            .next_tick_for_job(id)
            .await
            .with_context(|| format!("reading next tick for `{job}`"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.jobs.lock().await.clear();
        let mut sched = self.inner.clone();
        sched.shutdown().await.context("shutting down scheduler")
    }
}
