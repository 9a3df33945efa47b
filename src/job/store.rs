use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::model::{BatchJob, JobPatch, JobStatus};

/// Job persistence boundary shared by the worker and the control surface.
///
/// `update_job` is a conditional single-record update: the patch applies
/// only while the job's current status is in `expected`, and returns
/// whether it did. Both sides race on the same record (worker progress vs
/// user cancel), so every mutation goes through this check instead of a
/// held lock.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: BatchJob) -> Result<Uuid>;
    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>>;
    /// Pending jobs in creation order (oldest first).
    async fn list_pending(&self) -> Result<Vec<BatchJob>>;
    async fn update_job(&self, job_id: Uuid, expected: &[JobStatus], patch: JobPatch)
        -> Result<bool>;
}

/// In-memory store backed by a single mutex-guarded map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, BatchJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: BatchJob) -> Result<Uuid> {
        let mut jobs = self.jobs.lock().await;
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<BatchJob>> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<BatchJob> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        Ok(pending)
    }

    async fn update_job(
        &self,
        job_id: Uuid,
        expected: &[JobStatus],
        patch: JobPatch,
    ) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::Store(format!("no such job: {job_id}")))?;

        if !expected.contains(&job.status) {
            return Ok(false);
        }

        if let Some(status) = patch.status {
            job.status = status;
            if status.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        }
        if let Some(n) = patch.processed_files {
            job.processed_files = n;
        }
        if let Some(n) = patch.failed_files {
            job.failed_files = n;
        }
        if let Some(outcome) = patch.push_result {
            // Degraded files carry an error message next to success; their
            // note belongs in error_details too.
            if !outcome.success || outcome.error.is_some() {
                let why = outcome.error.as_deref().unwrap_or("unknown error");
                job.error_details
                    .push(format!("{}: {why}", outcome.file_id));
            }
            job.results.push(outcome);
        }
        job.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{FileOutcome, JobOptions};

    fn sample_job(files: &[&str]) -> BatchJob {
        BatchJob::new(
            "u1",
            files.iter().map(|s| s.to_string()).collect(),
            JobOptions::new("ja", "en"),
        )
        .expect("job")
    }

    #[tokio::test]
    async fn pending_jobs_come_back_oldest_first() {
        let store = MemoryJobStore::new();
        let mut first = sample_job(&["a.pptx"]);
        let mut second = sample_job(&["b.pptx"]);
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        second.created_at = Utc::now();
        let first_id = first.id;
        store.create_job(second).await.expect("create");
        store.create_job(first).await.expect("create");

        let pending = store.list_pending().await.expect("list");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first_id);
    }

    #[tokio::test]
    async fn conditional_update_applies_only_on_expected_status() {
        let store = MemoryJobStore::new();
        let job = sample_job(&["a.pptx"]);
        let id = store.create_job(job).await.expect("create");

        let claimed = store
            .update_job(id, &[JobStatus::Pending], JobPatch::status(JobStatus::Processing))
            .await
            .expect("update");
        assert!(claimed);

        // A second claim must lose the race.
        let reclaimed = store
            .update_job(id, &[JobStatus::Pending], JobPatch::status(JobStatus::Processing))
            .await
            .expect("update");
        assert!(!reclaimed);

        let job = store.get_job(id).await.expect("get").expect("present");
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn terminal_status_stamps_completed_at_and_blocks_cancel() {
        let store = MemoryJobStore::new();
        let id = store.create_job(sample_job(&["a.pptx"])).await.expect("create");

        store
            .update_job(id, &[JobStatus::Pending], JobPatch::status(JobStatus::Processing))
            .await
            .expect("claim");
        store
            .update_job(
                id,
                &[JobStatus::Processing],
                JobPatch::status(JobStatus::Completed),
            )
            .await
            .expect("finish");

        let job = store.get_job(id).await.expect("get").expect("present");
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());

        // Cancel after terminal is a no-op.
        let cancelled = store
            .update_job(
                id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobPatch::status(JobStatus::Cancelled),
            )
            .await
            .expect("cancel attempt");
        assert!(!cancelled);
        let job = store.get_job(id).await.expect("get").expect("present");
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failed_outcomes_accumulate_error_details() {
        let store = MemoryJobStore::new();
        let id = store.create_job(sample_job(&["a.pptx", "b.pptx"])).await.expect("create");
        store
            .update_job(id, &[JobStatus::Pending], JobPatch::status(JobStatus::Processing))
            .await
            .expect("claim");

        let ok = JobPatch {
            processed_files: Some(1),
            push_result: Some(FileOutcome::succeeded("a.pptx", "results/u1/a.pptx")),
            ..JobPatch::default()
        };
        let bad = JobPatch {
            failed_files: Some(1),
            push_result: Some(FileOutcome::failed("b.pptx", "structural parse: bad zip")),
            ..JobPatch::default()
        };
        store
            .update_job(id, &[JobStatus::Processing], ok)
            .await
            .expect("ok update");
        store
            .update_job(id, &[JobStatus::Processing], bad)
            .await
            .expect("bad update");

        let job = store.get_job(id).await.expect("get").expect("present");
        assert_eq!(job.processed_files, 1);
        assert_eq!(job.failed_files, 1);
        assert_eq!(job.results.len(), 2);
        assert_eq!(job.error_details.len(), 1);
        assert!(job.error_details[0].contains("b.pptx"));
        assert!(job.error_details[0].contains("structural parse"));
    }

    #[tokio::test]
    async fn degraded_outcome_records_details_without_counting_as_failed() {
        let store = MemoryJobStore::new();
        let id = store.create_job(sample_job(&["a.pptx"])).await.expect("create");
        store
            .update_job(id, &[JobStatus::Pending], JobPatch::status(JobStatus::Processing))
            .await
            .expect("claim");

        let patch = JobPatch {
            processed_files: Some(1),
            push_result: Some(FileOutcome::degraded(
                "a.pptx",
                "results/u1/a.pptx",
                "fragments kept source text after failed translation: 3",
            )),
            ..JobPatch::default()
        };
        store
            .update_job(id, &[JobStatus::Processing], patch)
            .await
            .expect("update");

        let job = store.get_job(id).await.expect("get").expect("present");
        assert_eq!(job.processed_files, 1);
        assert_eq!(job.failed_files, 0);
        assert_eq!(job.error_details.len(), 1);
        assert!(job.error_details[0].contains("a.pptx"));
        assert!(job.error_details[0].contains("source text"));
        assert!(job.results[0].success);
        assert_eq!(
            job.results[0].result_path.as_deref(),
            Some("results/u1/a.pptx")
        );
    }

    #[tokio::test]
    async fn updating_a_missing_job_is_a_store_error() {
        let store = MemoryJobStore::new();
        let err = store
            .update_job(
                Uuid::new_v4(),
                &[JobStatus::Pending],
                JobPatch::status(JobStatus::Processing),
            )
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::Store(_)));
    }
}
