use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::BrewError;
use crate::redact::DeviceId;
use crate::session::Session;
use crate::storage::{RecordStorage, StorageError};
use crate::store::SessionStore;

/// What startup recovery found under `sessions/live/`.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal sessions put back into the live set.
    pub restored: usize,
    /// Terminal records whose archival had not finished.
    pub archived: usize,
    pub quarantined: usize,
    pub stale_temp_removed: usize,
    /// Older non-terminal records for a device that had a newer one.
    pub duplicates: usize,
    /// Records left in place because they could not be read or moved.
    pub failed: usize,
}

/// Rebuild the live set from durable records.
///
/// Must run before the store serves requests. A single unreadable record is
/// quarantined and never stops the rest from loading; only an unreadable
/// live directory is an error.
pub async fn recover(store: &SessionStore) -> Result<RecoveryReport, BrewError> {
    let storage = store.storage().clone();
    let mut report = RecoveryReport::default();
    match storage.remove_stale_temp() {
        Ok(sweep) => {
            report.stale_temp_removed = sweep.removed;
            report.failed += sweep.failed;
        }
        Err(e) => {
            warn!(error = %e, "stale temp sweep failed");
            report.failed += 1;
        }
    }

    let mut open: HashMap<DeviceId, Vec<Session>> = HashMap::new();
    let mut terminal = Vec::new();

    for name in storage.list_live()? {
        let stem = name.strip_suffix(".json").unwrap_or(&name);
        match storage.read_live(stem) {
            Ok(session) if session.session_id != stem => {
                warn!(file = %name, "record name does not match its session id");
                quarantine(storage.as_ref(), &name, &mut report);
            }
            Ok(session) if session.is_terminal() => terminal.push(session),
            Ok(session) => open
                .entry(session.device_id.clone())
                .or_default()
                .push(session),
            Err(StorageError::Json(e)) => {
                warn!(file = %name, error = %e, "unreadable session record");
                quarantine(storage.as_ref(), &name, &mut report);
            }
            Err(StorageError::InvalidId) => {
                warn!(file = %name, "record name is not a session id");
                quarantine(storage.as_ref(), &name, &mut report);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "failed to read session record");
                report.failed += 1;
            }
        }
    }

    for session in terminal {
        let mut slot = store.lock(&session.device_id).await?;
        match store.archival().archive_record(&mut slot, &session) {
            Ok(()) => report.archived += 1,
            Err(_) => report.failed += 1,
        }
    }

    for (device_id, mut sessions) in open {
        sessions.sort_by_key(|s| Reverse(s.updated_at_ms));
        let mut slot = store.lock(&device_id).await?;
        let mut sessions = sessions.into_iter();
        if let Some(newest) = sessions.next() {
            store.restore(&mut slot, newest);
            report.restored += 1;
        }
        for stale in sessions {
            warn!(
                device = %device_id,
                session_id = %stale.session_id,
                "closing duplicate open session"
            );
            match store.close_duplicate(&mut slot, stale) {
                Ok(()) => report.duplicates += 1,
                Err(_) => report.failed += 1,
            }
        }
    }

    info!(
        restored = report.restored,
        archived = report.archived,
        quarantined = report.quarantined,
        stale_temp_removed = report.stale_temp_removed,
        duplicates = report.duplicates,
        failed = report.failed,
        "recovery complete"
    );
    Ok(report)
}

fn quarantine(
    storage: &dyn RecordStorage,
    name: &str,
    report: &mut RecoveryReport,
) {
    match storage.quarantine(name) {
        Ok(target) => {
            warn!(file = %name, quarantined_as = %target, "record quarantined");
            report.quarantined += 1;
        }
        Err(e) => {
            warn!(file = %name, error = %e, "failed to quarantine record");
            report.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use brewlink_protocol::{DeviceFamily, SessionState};
    use tempfile::TempDir;

    use crate::broker::SessionEvents;
    use crate::storage::FsStorage;

    fn open(dir: &TempDir) -> (Arc<FsStorage>, SessionStore) {
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let store = SessionStore::new(
            storage.clone(),
            Duration::from_millis(200),
            SessionEvents::new(16),
        );
        (storage, store)
    }

    fn record(id: &str, device: &str, updated_at_ms: u64) -> Session {
        let mut session = Session::new(
            id.to_string(),
            DeviceId::new(device),
            DeviceFamily::Pico,
            None,
            "PAK1".to_string(),
            updated_at_ms,
        );
        session.updated_at_ms = updated_at_ms;
        session
    }

    #[tokio::test]
    async fn newest_duplicate_wins() {
        let dir = TempDir::new().unwrap();
        let (storage, store) = open(&dir);
        storage.write_live(&record("old", "dev-1", 10)).unwrap();
        storage.write_live(&record("new", "dev-1", 20)).unwrap();

        let report = recover(&store).await.unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(
            store.get(&DeviceId::new("dev-1")).unwrap().session_id,
            "new"
        );
        let old = storage.read_archived("old").unwrap();
        assert_eq!(old.state, SessionState::Errored);
    }

    #[tokio::test]
    async fn mismatched_name_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let (storage, store) = open(&dir);
        let body = serde_json::to_vec(&record("inner", "dev-2", 1)).unwrap();
        fs::write(storage.live_dir().join("outer.json"), body).unwrap();

        let report = recover(&store).await.unwrap();
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.restored, 0);
        assert!(storage.list_live().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_directory_is_clean() {
        let dir = TempDir::new().unwrap();
        let (_storage, store) = open(&dir);
        assert_eq!(recover(&store).await.unwrap(), RecoveryReport::default());
    }
}
