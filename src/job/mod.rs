//! Batch job domain: records, persistence boundaries, file storage.

pub mod files;
pub mod model;
pub mod store;

pub use files::{FileStore, FsFileStore};
pub use model::{BatchJob, FileOutcome, JobOptions, JobPatch, JobStatus};
pub use store::{JobStore, MemoryJobStore};
