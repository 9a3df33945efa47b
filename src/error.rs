use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the translation worker.
///
/// File-level failures (`StructuralParse`, `Content`, `Translation`, `Write`,
/// `Timeout`) are caught at the per-file boundary and recorded on the job;
/// they never abort sibling files. `Validation` is caller-recoverable and
/// never retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    /// Corrupt or unsupported PPTX archive. Fatal for the file, not retried.
    #[error("structural parse: {0}")]
    StructuralParse(String),

    /// Valid archive but nothing usable inside (e.g. no slide parts).
    #[error("content: {0}")]
    Content(String),

    /// Backend call failed after retries, fragment- or batch-scoped.
    #[error("translation: {0}")]
    Translation(String),

    #[error("write: {0}")]
    Write(String),

    #[error("job store: {0}")]
    Store(String),

    #[error("file store: {0}")]
    FileStore(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralParse(msg.into())
    }

    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content(msg.into())
    }
}
