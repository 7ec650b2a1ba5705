//! Atomic file publication: write to a sibling temp file, then rename.

use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Writer that publishes its content under the final path only on `commit`.
///
/// The temporary file lives in the same directory as the target so the final
/// rename never crosses a filesystem boundary. Readers of the target path see
/// either the previous complete file or the new complete file.
pub struct AtomicWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    temp_file: Option<File>,
    committed: bool,
}

impl AtomicWriter {
    /// Create a new atomic writer for the target path
    pub async fn new(target_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let final_path = target_path.as_ref().to_path_buf();
        let temp_path = sibling_path(&final_path, "tmp")?;

        let temp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        Ok(AtomicWriter {
            temp_path,
            final_path,
            temp_file: Some(temp_file),
            committed: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.final_path
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.temp_file.as_mut() {
            Some(file) => file.write_all(data).await,
            None => Err(std::io::Error::other("atomic writer already closed")),
        }
    }

    /// Flush and sync the temporary file without publishing it
    pub async fn sync(&mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.temp_file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// Sync and rename the temporary file over the target. On failure the
    /// temporary file is removed when the writer drops.
    pub async fn commit(mut self) -> std::io::Result<()> {
        self.sync().await?;
        tokio::fs::rename(&self.temp_path, &self.final_path).await?;
        self.committed = true;
        Ok(())
    }

    /// Abort the operation and clean up the temporary file
    pub async fn abort(mut self) -> std::io::Result<()> {
        self.temp_file.take();
        self.committed = true;
        match tokio::fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.temp_file.take();
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Unique hidden path next to the target, e.g. `.out.wasm.tmp.<uuid>`
fn sibling_path(target_path: &Path, kind: &str) -> std::io::Result<PathBuf> {
    let parent = target_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target_path
        .file_name()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid target path: {}", target_path.display()),
            )
        })?
        .to_string_lossy();

    let name = format!(".{}.{}.{}", file_name, kind, Uuid::new_v4().simple());
    Ok(parent.join(name))
}

/// Create parent directories and write `data` to a synced temp file
async fn stage(path: &Path, data: &[u8]) -> std::io::Result<AtomicWriter> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut writer = AtomicWriter::new(path).await?;
    writer.write_all(data).await?;
    writer.sync().await?;
    Ok(writer)
}

/// Atomically replace `path` with `data`, creating parent directories.
pub async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    stage(path, data).await?.commit().await
}

/// Failure to publish one file of a group
#[derive(Debug)]
pub struct PublishError {
    pub path: PathBuf,
    pub error: std::io::Error,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write {}: {}", self.path.display(), self.error)
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A target already renamed into place, with the content it replaced
struct Published {
    target: PathBuf,
    backup: Option<PathBuf>,
}

/// Publish several files so that either all of them are replaced or none is.
///
/// Every file is written to a synced temp file before the first rename. If a
/// later rename fails, targets published earlier get their previous content
/// back, or are removed when they did not exist before.
pub async fn atomic_write_all(files: &[(&Path, &[u8])]) -> Result<(), PublishError> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, data) in files {
        let writer = stage(path, data).await.map_err(|error| PublishError {
            path: path.to_path_buf(),
            error,
        })?;
        staged.push(writer);
    }

    let mut published: Vec<Published> = Vec::with_capacity(staged.len());
    for writer in staged {
        let target = writer.target().to_path_buf();
        let backup = match keep_previous(&target).await {
            Ok(backup) => backup,
            Err(error) => {
                roll_back(published).await;
                return Err(PublishError { path: target, error });
            }
        };

        if let Err(error) = writer.commit().await {
            if let Some(backup) = backup {
                let _ = tokio::fs::remove_file(&backup).await;
            }
            roll_back(published).await;
            return Err(PublishError { path: target, error });
        }
        published.push(Published { target, backup });
    }

    for entry in published {
        if let Some(backup) = entry.backup {
            if let Err(e) = tokio::fs::remove_file(&backup).await {
                warn!("Failed to remove {}: {}", backup.display(), e);
            }
        }
    }
    Ok(())
}

/// Link (or copy) an existing regular file at `target` to a hidden sibling
async fn keep_previous(target: &Path) -> std::io::Result<Option<PathBuf>> {
    match tokio::fs::metadata(target).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }

    let backup = sibling_path(target, "bak")?;
    if tokio::fs::hard_link(target, &backup).await.is_err() {
        tokio::fs::copy(target, &backup).await?;
    }
    Ok(Some(backup))
}

async fn roll_back(published: Vec<Published>) {
    for entry in published.into_iter().rev() {
        let restored = match &entry.backup {
            Some(backup) => tokio::fs::rename(backup, &entry.target).await,
            None => tokio::fs::remove_file(&entry.target).await,
        };
        if let Err(e) = restored {
            warn!("Failed to roll back {}: {}", entry.target.display(), e);
        }
    }
}
