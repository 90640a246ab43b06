//! File Lock - 进程间建议性排他锁
//!
//! 锁文件不存在时先创建再重试一次，首次使用的竞争不会表现为错误

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 文件锁错误
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to lock {path}: {message}")]
    Io { path: String, message: String },

    #[error("Lock task failed: {0}")]
    Join(String),
}

impl LockError {
    fn io(path: &Path, err: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// 持有期间独占锁定目标文件，drop 时释放
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// 阻塞直到获得锁
    pub fn acquire_blocking(path: &Path) -> Result<Self, LockError> {
        let file = match Self::lock_existing(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Self::bootstrap(path).map_err(|e| LockError::io(path, e))?;
                tracing::debug!(path = %path.display(), "Lock file created");
                Self::lock_existing(path).map_err(|e| LockError::io(path, e))?
            }
            Err(e) => return Err(LockError::io(path, e)),
        };

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    /// 在阻塞线程池上等待锁
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&path))
            .await
            .map_err(|e| LockError::Join(e.to_string()))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 被锁定文件的句柄
    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    fn lock_existing(path: &Path) -> io::Result<File> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn bootstrap(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to release file lock");
            }
        }
    }
}
