use std::sync::Arc;

use tracing::{info, warn};

use crate::error::BrewError;
use crate::locks::DeviceSlot;
use crate::session::Session;
use crate::storage::RecordStorage;

/// Moves terminal sessions out of the live set and their records into the
/// archive. Callers hold the device lock (they pass its slot).
///
/// The slot forgets the session before the rename is attempted, so even a
/// failed rename leaves the session closed to mutation. The record is then
/// terminal in `live/` and the next recovery finishes the move.
pub struct ArchivalManager {
    storage: Arc<dyn RecordStorage>,
}

impl ArchivalManager {
    pub fn new(storage: Arc<dyn RecordStorage>) -> Self {
        Self { storage }
    }

    /// Archive the slot's live session `session_id`, which must be terminal.
    pub fn archive(&self, slot: &mut DeviceSlot, session_id: &str) -> Result<Session, BrewError> {
        let session = match slot.live.take() {
            Some(session) if session.session_id == session_id && session.is_terminal() => session,
            other => {
                slot.live = other;
                return Err(BrewError::InvalidState(format!(
                    "session {session_id} is not a terminal live session"
                )));
            }
        };
        self.archive_record(slot, &session)?;
        Ok(session)
    }

    /// Archive a terminal record that is on disk but not in the slot.
    pub fn archive_record(&self, slot: &mut DeviceSlot, session: &Session) -> Result<(), BrewError> {
        slot.retired.insert(session.session_id.clone());
        if let Err(e) = self.storage.archive(&session.session_id) {
            warn!(
                device = %slot.device_id(),
                session_id = %session.session_id,
                error = %e,
                "archival rename failed; record stays in live until recovery"
            );
            return Err(e.into());
        }
        info!(
            device = %slot.device_id(),
            session_id = %session.session_id,
            state = session.state.as_str(),
            "session archived"
        );
        Ok(())
    }
}
