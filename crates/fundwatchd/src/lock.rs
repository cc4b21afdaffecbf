use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Exclusive advisory lock guarding one snapshot path across processes.
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn lock_path(snapshot_path: &Path) -> PathBuf {
        let mut name = snapshot_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".lock");
        snapshot_path.with_file_name(name)
    }

    /// `Ok(None)` when another holder already has the lock.
    pub fn try_acquire(snapshot_path: &Path) -> io::Result<Option<Self>> {
        let path = Self::lock_path(snapshot_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}
