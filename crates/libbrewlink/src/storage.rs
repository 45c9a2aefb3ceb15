//! Durable session records.
//!
//! Layout under the data directory:
//!
//! ```text
//! sessions/live/<session_id>.json        non-terminal (and not yet archived) records
//! sessions/live/.<session_id>.json.tmp   in-flight writes, never read as records
//! sessions/archive/<session_id>.json     terminal records, read-only
//! sessions/quarantine/<name>.<ms>.bad    records recovery could not parse
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use brewlink_protocol::SessionId;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::{Session, now_ms};

const RECORD_EXT: &str = ".json";
const TEMP_EXT: &str = ".json.tmp";
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed session record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session id")]
    InvalidId,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Where session records live. Every write must be atomic: a reader sees the
/// previous record or the new one, never a mix.
pub trait RecordStorage: Send + Sync {
    fn write_live(&self, session: &Session) -> Result<(), StorageError>;
    fn read_live(&self, session_id: &str) -> Result<Session, StorageError>;
    /// File names of live records, sorted. Temp files are excluded.
    fn list_live(&self) -> Result<Vec<String>, StorageError>;
    fn live_exists(&self, session_id: &str) -> bool;
    /// Move a live record into the archive with a single rename.
    fn archive(&self, session_id: &str) -> Result<(), StorageError>;
    fn read_archived(&self, session_id: &str) -> Result<Session, StorageError>;
    fn list_archived(&self) -> Result<Vec<SessionId>, StorageError>;
    fn archived_exists(&self, session_id: &str) -> bool;
    /// Move a live file aside. Returns the quarantined file name.
    fn quarantine(&self, file_name: &str) -> Result<String, StorageError>;
    /// Delete leftover temp files from interrupted writes. An entry that
    /// cannot be removed is counted and skipped.
    fn remove_stale_temp(&self) -> Result<TempSweep, StorageError>;
}

/// Outcome of a stale temp file sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TempSweep {
    pub removed: usize,
    pub failed: usize,
}

pub fn validate_session_id(session_id: &str) -> Result<(), StorageError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId)
    }
}

pub struct FsStorage {
    live: PathBuf,
    archive: PathBuf,
    quarantine: PathBuf,
}

impl FsStorage {
    /// Open (creating if needed) the session directories under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = data_dir.as_ref().join("sessions");
        let storage = Self {
            live: root.join("live"),
            archive: root.join("archive"),
            quarantine: root.join("quarantine"),
        };
        for dir in [&storage.live, &storage.archive, &storage.quarantine] {
            fs::create_dir_all(dir)?;
        }
        Ok(storage)
    }

    pub fn live_dir(&self) -> &Path {
        &self.live
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine
    }

    fn record_path(dir: &Path, session_id: &str) -> Result<PathBuf, StorageError> {
        validate_session_id(session_id)?;
        Ok(dir.join(format!("{session_id}{RECORD_EXT}")))
    }

    fn temp_path(&self, session_id: &str) -> PathBuf {
        self.live.join(format!(".{session_id}{TEMP_EXT}"))
    }

    fn read_record(path: &Path) -> Result<Session, StorageError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl RecordStorage for FsStorage {
    fn write_live(&self, session: &Session) -> Result<(), StorageError> {
        let dest = Self::record_path(&self.live, &session.session_id)?;
        let temp = self.temp_path(&session.session_id);
        let json = serde_json::to_vec_pretty(session)?;

        if let Err(e) = write_file_synced(&temp, &json) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &dest) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        sync_dir(&self.live);
        Ok(())
    }

    fn read_live(&self, session_id: &str) -> Result<Session, StorageError> {
        Self::read_record(&Self::record_path(&self.live, session_id)?)
    }

    fn list_live(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.live)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(RECORD_EXT) && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn live_exists(&self, session_id: &str) -> bool {
        Self::record_path(&self.live, session_id)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    fn archive(&self, session_id: &str) -> Result<(), StorageError> {
        let from = Self::record_path(&self.live, session_id)?;
        let to = Self::record_path(&self.archive, session_id)?;
        fs::rename(&from, &to)?;
        sync_dir(&self.archive);
        sync_dir(&self.live);
        Ok(())
    }

    fn read_archived(&self, session_id: &str) -> Result<Session, StorageError> {
        Self::read_record(&Self::record_path(&self.archive, session_id)?)
    }

    fn list_archived(&self) -> Result<Vec<SessionId>, StorageError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.archive)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(RECORD_EXT) {
                if validate_session_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn archived_exists(&self, session_id: &str) -> bool {
        Self::record_path(&self.archive, session_id)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    fn quarantine(&self, file_name: &str) -> Result<String, StorageError> {
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name == "."
            || file_name == ".."
        {
            return Err(StorageError::InvalidId);
        }
        let target = format!("{file_name}.{}.bad", now_ms());
        fs::rename(self.live.join(file_name), self.quarantine.join(&target))?;
        sync_dir(&self.quarantine);
        sync_dir(&self.live);
        Ok(target)
    }

    fn remove_stale_temp(&self) -> Result<TempSweep, StorageError> {
        let mut sweep = TempSweep::default();
        for entry in fs::read_dir(&self.live)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read live directory entry");
                    sweep.failed += 1;
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with('.') && name.ends_with(TEMP_EXT)) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(file = %name, "removed stale temp file");
                    sweep.removed += 1;
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "failed to remove stale temp file");
                    sweep.failed += 1;
                }
            }
        }
        Ok(sweep)
    }
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Commit a rename to disk. Not every platform can fsync a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
