use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fundwatch_core::Snapshot;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot {path} is not a valid snapshot document: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write backup {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sole writer of the durable snapshot and its backups.
#[derive(Debug, Clone)]
pub struct Persistor {
    snapshot_path: PathBuf,
}

impl Persistor {
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn read_current_bytes(&self) -> Result<Option<Vec<u8>>, PersistError> {
        match fs::read(&self.snapshot_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Read {
                path: self.snapshot_path.clone(),
                source,
            }),
        }
    }

    pub fn load_current(&self) -> Result<Option<Snapshot>, PersistError> {
        let Some(bytes) = self.read_current_bytes()? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Decode {
                path: self.snapshot_path.clone(),
                source,
            })
    }

    /// Archives the current snapshot verbatim, then atomically replaces it.
    ///
    /// Returns the backup path when there was a snapshot to archive.
    pub fn persist(&self, snapshot: &Snapshot) -> Result<Option<PathBuf>, PersistError> {
        let body = snapshot.to_pretty_json()?;

        let backup = match self.read_current_bytes()? {
            Some(previous) => Some(self.write_backup(&previous)?),
            None => None,
        };
        if let Some(path) = &backup {
            tracing::info!(backup = %path.display(), "archived previous snapshot");
        }

        self.write_atomically(body.as_bytes())?;
        tracing::info!(
            path = %self.snapshot_path.display(),
            regions = snapshot.region_count,
            records = snapshot.record_count,
            "snapshot written"
        );
        Ok(backup)
    }

    /// Backups sitting next to the snapshot, oldest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>, PersistError> {
        let dir = self.snapshot_dir();
        let prefix = format!("{}.backup.", self.snapshot_stem());

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(PersistError::Read { path: dir, source }),
        };

        let mut backups: Vec<(u128, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let millis = name.strip_prefix(&prefix)?.strip_suffix(".json")?.parse().ok()?;
                Some((millis, entry.path()))
            })
            .collect();
        backups.sort();
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }

    /// Stages the backup in a temp file, then links it under a fresh name.
    ///
    /// A failed write leaves no file that `backups` would list.
    fn write_backup(&self, previous: &[u8]) -> Result<PathBuf, PersistError> {
        let dir = self.snapshot_dir();
        let stem = self.snapshot_stem();
        let mut millis = Utc::now().timestamp_millis();

        let staging_err = |source| PersistError::Backup {
            path: dir.clone(),
            source,
        };
        let mut staged = NamedTempFile::new_in(&dir).map_err(staging_err)?;
        staged
            .write_all(previous)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(staging_err)?;

        loop {
            let path = dir.join(format!("{stem}.backup.{millis}.json"));
            match staged.persist_noclobber(&path) {
                Ok(_) => return Ok(path),
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                    staged = err.file;
                    millis += 1;
                }
                Err(err) => {
                    return Err(PersistError::Backup {
                        path,
                        source: err.error,
                    });
                }
            }
        }
    }

    fn write_atomically(&self, bytes: &[u8]) -> Result<(), PersistError> {
        let write_err = |source| PersistError::Write {
            path: self.snapshot_path.clone(),
            source,
        };

        let dir = self.snapshot_dir();
        fs::create_dir_all(&dir).map_err(write_err)?;

        let tmp_path = dir.join(format!(
            ".{}.tmp.{}",
            self.snapshot_file_name(),
            std::process::id()
        ));
        let result = fs::File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp_path, &self.snapshot_path));

        if let Err(source) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_err(source));
        }
        Ok(())
    }

    fn snapshot_dir(&self) -> PathBuf {
        match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn snapshot_stem(&self) -> String {
        self.snapshot_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_owned())
    }

    fn snapshot_file_name(&self) -> String {
        self.snapshot_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.json".to_owned())
    }
}
