//! Job registry: the single authority over the persistent collections.
//!
//! Every operation that mutates state takes the registry mutex for its whole
//! read-modify-write sequence, which makes the store-level replace the
//! serialization point. In particular a claim's read, flip and write-back
//! form one critical section, so two workers can never both observe the same
//! pending job.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::{JobqError, Result};
use crate::queue::job::{Job, JobSpec, JobState, DEFAULT_MAX_RETRIES};
use crate::store::JobStore;
use crate::worker::executor::ExecutionResult;

pub struct JobRegistry {
    store: Mutex<JobStore>,
}

impl JobRegistry {
    pub fn new(store: JobStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Append a new pending job to the live collection and persist it.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the command is missing or empty, `DuplicateId`
    /// when a supplied id already exists in the live collection.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<String> {
        let command = spec.command.as_deref().map(str::trim).unwrap_or_default();
        if command.is_empty() {
            return Err(JobqError::InvalidPayload("command is required".into()));
        }
        let max_retries = spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);

        let store = self.store.lock().await;
        let mut jobs = store.load_jobs()?;

        let job = match spec.id {
            Some(id) => {
                if jobs.iter().any(|j| j.id == id) {
                    return Err(JobqError::DuplicateId(id));
                }
                Job::with_id(id, command, max_retries)
            }
            None => Job::new(command, max_retries),
        };
        let id = job.id.clone();
        jobs.push(job);
        store.save_jobs(&jobs)?;

        tracing::info!(job_id = %id, command, "job enqueued");
        Ok(id)
    }

    /// All live jobs in store (insertion) order, optionally filtered by
    /// exact state.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let jobs = self.store.lock().await.load_jobs()?;
        Ok(match state {
            Some(state) => jobs.into_iter().filter(|j| j.state == state).collect(),
            None => jobs,
        })
    }

    /// Per-state counts over the live collection. DLQ entries are not
    /// included; report them separately via [`Self::dlq_list`].
    pub async fn status(&self) -> Result<BTreeMap<JobState, usize>> {
        let jobs = self.store.lock().await.load_jobs()?;
        let mut counts = BTreeMap::new();
        for job in &jobs {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub async fn dlq_list(&self) -> Result<Vec<Job>> {
        self.store.lock().await.load_dlq()
    }

    /// Move a dead job back to the live collection, reset for a fresh run.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent from the DLQ; neither collection is
    /// touched in that case.
    pub async fn dlq_retry(&self, id: &str) -> Result<()> {
        let store = self.store.lock().await;
        let mut dlq = store.load_dlq()?;
        let idx = dlq
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| JobqError::NotFound(id.to_string()))?;

        let mut job = dlq.remove(idx);
        job.state = JobState::Pending;
        job.attempts = 0;
        job.last_error = None;
        job.next_run_at = None;
        job.updated_at = Utc::now();

        let mut jobs = store.load_jobs()?;
        jobs.push(job);
        store.save_jobs(&jobs)?;
        store.save_dlq(&dlq)?;

        tracing::info!(job_id = id, "DLQ job re-enqueued");
        Ok(())
    }

    /// Claim the first eligible pending job, flipping it to `processing`.
    ///
    /// Eligible means `pending` with `next_run_at` unset or due. Returns
    /// `None` when nothing qualifies. The transition is persisted before the
    /// job is handed to the caller.
    pub async fn claim(&self) -> Result<Option<Job>> {
        let store = self.store.lock().await;
        let mut jobs = store.load_jobs()?;
        let now = Utc::now();

        let Some(job) = jobs.iter_mut().find(|j| j.is_claimable(now)) else {
            return Ok(None);
        };
        job.state = JobState::Processing;
        job.updated_at = now;
        let claimed = job.clone();
        store.save_jobs(&jobs)?;
        Ok(Some(claimed))
    }

    /// Apply an execution outcome to a claimed job: complete it, reschedule
    /// it with backoff, or move it to the DLQ.
    ///
    /// The live collection is re-read here because it may have changed since
    /// the claim (a concurrent `dlq_retry`, another settle). A job that
    /// vanished is re-inserted rather than having its outcome dropped.
    pub async fn settle(
        &self,
        mut job: Job,
        result: ExecutionResult,
        backoff_base: u32,
    ) -> Result<()> {
        let store = self.store.lock().await;
        let mut jobs = store.load_jobs()?;
        let idx = jobs.iter().position(|j| j.id == job.id);
        let id = job.id.clone();
        let now = Utc::now();

        if result.success {
            match idx {
                Some(i) => {
                    jobs[i].state = JobState::Completed;
                    jobs[i].output = result.output;
                    jobs[i].updated_at = now;
                }
                None => {
                    job.state = JobState::Completed;
                    job.output = result.output;
                    job.updated_at = now;
                    jobs.push(job);
                }
            }
            store.save_jobs(&jobs)?;
            tracing::info!(job_id = %id, "job completed");
            return Ok(());
        }

        job.attempts += 1;
        job.last_error = Some(result.error.unwrap_or_else(|| "unknown error".into()));
        job.updated_at = now;

        if job.attempts >= job.max_retries {
            job.state = JobState::Dead;
            job.output = result.output;
            if let Some(i) = idx {
                jobs.remove(i);
            }
            let mut dlq = store.load_dlq()?;
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "job exhausted retries, moving to DLQ"
            );
            dlq.push(job);
            store.save_dlq(&dlq)?;
            store.save_jobs(&jobs)?;
        } else {
            let delay = backoff_delay(backoff_base, job.attempts);
            job.state = JobState::Pending;
            job.next_run_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
            tracing::info!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_secs = delay.num_seconds(),
                "retry scheduled"
            );
            match idx {
                Some(i) => jobs[i] = job,
                None => jobs.push(job),
            }
            store.save_jobs(&jobs)?;
        }
        Ok(())
    }
}

/// Retry delay: `base^attempts` seconds. The curve is uncapped; saturating
/// arithmetic only guards against overflow on pathological retry budgets.
fn backoff_delay(base: u32, attempts: u32) -> Duration {
    let secs = u64::from(base).saturating_pow(attempts);
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}
