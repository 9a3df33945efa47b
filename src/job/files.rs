use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Package storage boundary: originals in, rewritten decks out.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read_original(&self, user_id: &str, file_id: &str) -> Result<Vec<u8>>;
    /// Writes the finished deck and returns its path. The write must be
    /// atomic: a failed file never leaves bytes at the download location.
    async fn write_result(&self, user_id: &str, file_id: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Directory-backed store: `<root>/originals/<user>/<file>` and
/// `<root>/results/<user>/<file>`.
pub struct FsFileStore {
    root: PathBuf,
}

impl FsFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn original_path(&self, user_id: &str, file_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("originals")
            .join(safe_component(user_id)?)
            .join(safe_component(file_id)?))
    }

    fn result_path(&self, user_id: &str, file_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("results")
            .join(safe_component(user_id)?)
            .join(safe_component(file_id)?))
    }

    /// Ingests an original package for later processing.
    pub async fn store_original(
        &self,
        user_id: &str,
        file_id: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.original_path(user_id, file_id)?;
        write_atomic(&path, bytes).await?;
        Ok(path)
    }
}

/// Ids become single path components; anything that could escape the
/// store's root is rejected up front.
fn safe_component(id: &str) -> Result<&str> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        return Err(Error::validation(format!("unsafe id: {id:?}")));
    }
    Ok(id)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::FileStore(format!("no parent dir for {}", path.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::FileStore(format!("create {}: {e}", parent.display())))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| Error::FileStore(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::FileStore(format!("rename into {}: {e}", path.display())))?;
    Ok(())
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn read_original(&self, user_id: &str, file_id: &str) -> Result<Vec<u8>> {
        let path = self.original_path(user_id, file_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::FileStore(format!("read {}: {e}", path.display())))
    }

    async fn write_result(&self, user_id: &str, file_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.result_path(user_id, file_id)?;
        write_atomic(&path, bytes).await?;
        Ok(path)
    }
}
