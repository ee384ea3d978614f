//! In-memory job registry.
//!
//! The registry is the only owner of [`Job`] records. Jobs in `pending` or
//! `processing` never expire; once a job reaches `done` or `failed` it is kept
//! for the configured retention period and then evicted.

use std::time::{Duration, Instant};

use chrono::Utc;
use moka::future::Cache;
use moka::ops::compute::Op;
use moka::Expiry;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{Job, JobStatus, SummaryPayload};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

impl From<JobError> for crate::error::Error {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound(id) => crate::error::Error::NotFound(id),
            other => crate::error::Error::Validation(other.to_string()),
        }
    }
}

impl Job {
    pub fn new(id: String, url: String, fast_summary: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            url,
            fast_summary,
            result: None,
            error: None,
        }
    }

    fn advance(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        // Wall clocks can step backwards; updated_at must not.
        self.updated_at = Utc::now().max(self.updated_at);
        Ok(())
    }
}

struct RetentionExpiry {
    retention: Duration,
}

impl RetentionExpiry {
    fn ttl_for(&self, job: &Job) -> Option<Duration> {
        job.status.is_terminal().then_some(self.retention)
    }
}

impl Expiry<String, Job> for RetentionExpiry {
    fn expire_after_create(&self, _key: &String, job: &Job, _created_at: Instant) -> Option<Duration> {
        self.ttl_for(job)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        job: &Job,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.ttl_for(job)
    }
}

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Cache<String, Job>,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Cache::builder()
                .expire_after(RetentionExpiry { retention })
                .build(),
        }
    }

    /// Register a new `pending` job and return it.
    pub async fn create(&self, url: &str, fast_summary: Option<String>) -> Job {
        loop {
            let job = Job::new(new_job_id(), url.to_string(), fast_summary.clone());
            let entry = self
                .jobs
                .entry(job.id.clone())
                .or_insert_with(async { job.clone() })
                .await;
            if entry.is_fresh() {
                debug!("Created job {} for {}", job.id, url);
                return job;
            }
            warn!("Job id collision on {}; regenerating", job.id);
        }
    }

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        self.jobs
            .get(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub async fn mark_processing(&self, id: &str) -> Result<Job, JobError> {
        self.update(id, |job| job.advance(JobStatus::Processing))
            .await
    }

    pub async fn complete(&self, id: &str, result: SummaryPayload) -> Result<Job, JobError> {
        self.update(id, move |job| {
            job.advance(JobStatus::Done)?;
            job.result = Some(result);
            job.error = None;
            Ok(())
        })
        .await
    }

    pub async fn fail(&self, id: &str, error: String) -> Result<Job, JobError> {
        self.update(id, move |job| {
            job.advance(JobStatus::Failed)?;
            job.error = Some(error);
            job.result = None;
            Ok(())
        })
        .await
    }

    /// Number of live jobs, after flushing pending evictions.
    pub async fn job_count(&self) -> u64 {
        self.jobs.run_pending_tasks().await;
        self.jobs.entry_count()
    }

    /// Apply `apply` to the stored job atomically with respect to other updates.
    async fn update<F>(&self, id: &str, apply: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let mut outcome = Err(JobError::NotFound(id.to_string()));
        self.jobs
            .entry(id.to_string())
            .and_compute_with(|entry| {
                let op = match entry {
                    None => Op::Nop,
                    Some(entry) => {
                        let mut job = entry.into_value();
                        match apply(&mut job) {
                            Ok(()) => {
                                outcome = Ok(job.clone());
                                Op::Put(job)
                            }
                            Err(e) => {
                                outcome = Err(e);
                                Op::Nop
                            }
                        }
                    }
                };
                std::future::ready(op)
            })
            .await;
        outcome
    }
}

/// Time-ordered id: millisecond timestamp plus random bits.
fn new_job_id() -> String {
    Uuid::now_v7().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> JobRegistry {
        JobRegistry::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = registry();
        let job = registry
            .create("https://example.com/a", Some("Preview.".into()))
            .await;
        assert_eq!(job.status, JobStatus::Pending);

        let fetched = registry.get(&job.id).await.unwrap();
        assert_eq!(fetched, job);
        assert_eq!(fetched.fast_summary.as_deref(), Some("Preview."));
    }

    #[tokio::test]
    async fn test_unknown_id_not_found() {
        let err = registry().get("nope").await.unwrap_err();
        assert_eq!(err, JobError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let registry = registry();
        let job = registry.create("https://example.com/a", None).await;

        let processing = registry.mark_processing(&job.id).await.unwrap();
        assert_eq!(processing.status, JobStatus::Processing);
        assert!(processing.updated_at >= job.updated_at);

        let done = registry
            .complete(&job.id, SummaryPayload::Text("All good.".into()))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.updated_at >= processing.updated_at);
        assert!(done.result.is_some());
        assert!(done.error.is_none());
        assert_eq!(done.created_at, job.created_at);
    }

    #[tokio::test]
    async fn test_terminal_state_is_stable() {
        let registry = registry();
        let job = registry.create("https://example.com/a", None).await;
        registry.mark_processing(&job.id).await.unwrap();
        let failed = registry.fail(&job.id, "boom".into()).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.result.is_none());

        let err = registry
            .complete(&job.id, SummaryPayload::Text("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::IllegalTransition { .. }));
        assert!(registry.mark_processing(&job.id).await.is_err());

        assert_eq!(registry.get(&job.id).await.unwrap(), failed);
    }

    #[tokio::test]
    async fn test_cannot_skip_processing() {
        let registry = registry();
        let job = registry.create("https://example.com/a", None).await;
        let err = registry
            .complete(&job.id, SummaryPayload::Text("x".into()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JobError::IllegalTransition {
                id: job.id.clone(),
                from: JobStatus::Pending,
                to: JobStatus::Done,
            }
        );
        assert_eq!(registry.get(&job.id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let err = registry().mark_processing("ghost").await.unwrap_err();
        assert_eq!(err, JobError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = registry();
        let mut ids = HashSet::new();
        for _ in 0..500 {
            let job = registry.create("https://example.com/a", None).await;
            assert!(ids.insert(job.id));
        }
    }

    #[tokio::test]
    async fn test_terminal_jobs_expire_after_retention() {
        let registry = JobRegistry::new(Duration::from_millis(50));
        let finished = registry.create("https://example.com/done", None).await;
        let in_flight = registry.create("https://example.com/busy", None).await;

        registry.mark_processing(&finished.id).await.unwrap();
        registry
            .complete(&finished.id, SummaryPayload::Text("ok".into()))
            .await
            .unwrap();
        registry.mark_processing(&in_flight.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(matches!(
            registry.get(&finished.id).await,
            Err(JobError::NotFound(_))
        ));
        assert_eq!(
            registry.get(&in_flight.id).await.unwrap().status,
            JobStatus::Processing
        );
    }
}
