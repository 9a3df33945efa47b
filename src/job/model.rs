use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal jobs never transition again; only reads are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Job configuration, validated at creation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobOptions {
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_preserve_formatting")]
    pub preserve_formatting: bool,
}

fn default_preserve_formatting() -> bool {
    true
}

impl JobOptions {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            model: None,
            preserve_formatting: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_lang.trim().is_empty() {
            return Err(Error::validation("source_lang must not be empty"));
        }
        if self.target_lang.trim().is_empty() {
            return Err(Error::validation("target_lang must not be empty"));
        }
        Ok(())
    }
}

/// Per-file result recorded on the job as processing advances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result_path: Option<String>,
}

impl FileOutcome {
    pub fn succeeded(file_id: impl Into<String>, result_path: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            success: true,
            error: None,
            result_path: Some(result_path.into()),
        }
    }

    pub fn failed(file_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            success: false,
            error: Some(error.into()),
            result_path: None,
        }
    }

    /// A file whose output was written but kept source text for some
    /// fragments. Counts as processed; the note still reaches the job's
    /// error details.
    pub fn degraded(
        file_id: impl Into<String>,
        result_path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            success: true,
            error: Some(error.into()),
            result_path: Some(result_path.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    /// File ids in submission order; processed front to back.
    pub files: Vec<String>,
    pub options: JobOptions,
    pub results: Vec<FileOutcome>,
    /// One entry per failed or degraded file: which file and why.
    pub error_details: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(user_id: impl Into<String>, files: Vec<String>, options: JobOptions) -> Result<Self> {
        options.validate()?;
        if files.is_empty() {
            return Err(Error::validation("job needs at least one file"));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: JobStatus::Pending,
            total_files: files.len(),
            processed_files: 0,
            failed_files: 0,
            files,
            options,
            results: Vec::new(),
            error_details: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Clone for a retry: a fresh PENDING job over the same files and
    /// options. The source job stays immutable.
    pub fn retried(&self) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            status: JobStatus::Pending,
            total_files: self.files.len(),
            processed_files: 0,
            failed_files: 0,
            files: self.files.clone(),
            options: self.options.clone(),
            results: Vec::new(),
            error_details: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Partial job update applied by the store under a status condition.
///
/// `completed_at` is not settable directly: the store stamps it when a
/// patch moves the job into a terminal status.
#[derive(Clone, Debug, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub processed_files: Option<usize>,
    pub failed_files: Option<usize>,
    pub push_result: Option<FileOutcome>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_screaming_snake() {
        let s = serde_json::to_string(&JobStatus::Pending).expect("serialize");
        assert_eq!(s, r#""PENDING""#);
        let back: JobStatus = serde_json::from_str(r#""CANCELLED""#).expect("deserialize");
        assert_eq!(back, JobStatus::Cancelled);
    }

    #[test]
    fn terminal_statuses_are_flagged() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn creation_validates_options_and_files() {
        let ok = BatchJob::new(
            "u1",
            vec!["deck.pptx".to_string()],
            JobOptions::new("ja", "en"),
        )
        .expect("valid job");
        assert_eq!(ok.status, JobStatus::Pending);
        assert_eq!(ok.total_files, 1);
        assert!(ok.completed_at.is_none());

        assert!(BatchJob::new("u1", vec![], JobOptions::new("ja", "en")).is_err());
        assert!(BatchJob::new(
            "u1",
            vec!["deck.pptx".to_string()],
            JobOptions::new("", "en")
        )
        .is_err());
    }

    #[test]
    fn retry_clones_files_and_options_into_a_fresh_job() {
        let mut job = BatchJob::new(
            "u1",
            vec!["a.pptx".to_string(), "b.pptx".to_string()],
            JobOptions::new("en", "ar"),
        )
        .expect("job");
        job.status = JobStatus::Failed;
        job.failed_files = 2;
        job.error_details.push("a.pptx: boom".to_string());

        let retry = job.retried();
        assert_ne!(retry.id, job.id);
        assert_eq!(retry.status, JobStatus::Pending);
        assert_eq!(retry.files, job.files);
        assert_eq!(retry.options.target_lang, "ar");
        assert_eq!(retry.failed_files, 0);
        assert!(retry.error_details.is_empty());
    }
}
