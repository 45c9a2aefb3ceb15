//! In-memory live set plus crash-safe persistence.
//!
//! Mutators take the `DeviceSlot` of a held device lock. Each one clones the
//! session, applies the change to the clone, persists it and only then swaps
//! it into the slot; a failed write leaves memory exactly as it was.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use brewlink_protocol::{
    DeviceFamily, Outcome, SensorReading, SessionEvent, SessionId,
};
use tracing::{debug, info};

use crate::archive::ArchivalManager;
use crate::broker::SessionEvents;
use crate::error::BrewError;
use crate::locks::{DeviceGuard, DeviceSlot, LockRegistry};
use crate::redact::DeviceId;
use crate::session::{LogEvent, Session, now_ms};
use crate::storage::RecordStorage;

pub struct SessionStore {
    locks: LockRegistry,
    storage: Arc<dyn RecordStorage>,
    archival: ArchivalManager,
    events: SessionEvents,
    /// Committed copies of live sessions for lock-free advisory reads.
    /// Written only by the holder of the matching device lock.
    published: RwLock<HashMap<DeviceId, Session>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn RecordStorage>, lock_timeout: Duration, events: SessionEvents) -> Self {
        Self {
            locks: LockRegistry::new(lock_timeout),
            archival: ArchivalManager::new(storage.clone()),
            storage,
            events,
            published: RwLock::new(HashMap::new()),
        }
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn storage(&self) -> &Arc<dyn RecordStorage> {
        &self.storage
    }

    pub fn archival(&self) -> &ArchivalManager {
        &self.archival
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Lock a device for mutation, failing with `Busy` after the timeout.
    pub async fn lock(&self, device_id: &DeviceId) -> Result<DeviceGuard, BrewError> {
        self.locks.acquire(device_id).await
    }

    /// Current session of a device, as last committed. No device lock needed.
    pub fn get(&self, device_id: &DeviceId) -> Option<Session> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    pub fn live_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        sessions
    }

    pub fn live_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// A record from the archive.
    pub fn archived(&self, session_id: &str) -> Result<Session, BrewError> {
        if !self.storage.archived_exists(session_id) {
            return Err(BrewError::NotFound(format!("archived session {session_id}")));
        }
        Ok(self.storage.read_archived(session_id)?)
    }

    pub fn archived_ids(&self) -> Result<Vec<SessionId>, BrewError> {
        Ok(self.storage.list_archived()?)
    }

    /// Start a new `Pending` session. Fails with `Conflict` if the device
    /// already has a non-terminal one.
    pub fn create(
        &self,
        slot: &mut DeviceSlot,
        family: DeviceFamily,
        firmware_version: Option<String>,
        recipe_reference: String,
    ) -> Result<Session, BrewError> {
        if let Some(existing) = slot.live.as_ref().filter(|s| !s.is_terminal()) {
            return Err(BrewError::Conflict(existing.session_id.clone()));
        }

        let session = Session::new(
            uuid::Uuid::new_v4().to_string(),
            slot.device_id().clone(),
            family,
            firmware_version,
            recipe_reference,
            now_ms(),
        );
        self.storage.write_live(&session)?;

        info!(
            device = %slot.device_id(),
            session_id = %session.session_id,
            family = %family,
            "session created"
        );
        self.events.publish(SessionEvent::Created {
            session_id: session.session_id.clone(),
            device: slot.device_id().redacted(),
            family,
        });
        self.commit(slot, session.clone());
        Ok(session)
    }

    pub fn append_log(
        &self,
        slot: &mut DeviceSlot,
        session_id: &str,
        text: String,
    ) -> Result<u64, BrewError> {
        self.mutate(slot, session_id, |session, now| {
            Ok(session.push(LogEvent::Message { text }, now))
        })
    }

    pub fn record_sensor(
        &self,
        slot: &mut DeviceSlot,
        session_id: &str,
        reading: SensorReading,
    ) -> Result<u64, BrewError> {
        reading.validate()?;
        self.mutate(slot, session_id, |session, now| {
            Ok(session.push(LogEvent::Sensor { reading }, now))
        })
    }

    /// Move the step counter to `step_index`. Lower values are rejected; an
    /// equal value is recorded again.
    pub fn advance_step(
        &self,
        slot: &mut DeviceSlot,
        session_id: &str,
        step_index: u32,
        name: Option<String>,
    ) -> Result<u64, BrewError> {
        self.mutate(slot, session_id, |session, now| {
            if step_index < session.step_index {
                return Err(BrewError::InvalidState(format!(
                    "step index {step_index} is behind {}",
                    session.step_index
                )));
            }
            session.step_index = step_index;
            Ok(session.push(LogEvent::Step { step_index, name }, now))
        })
    }

    pub fn record_fault(
        &self,
        slot: &mut DeviceSlot,
        session_id: &str,
        code: u32,
        message: Option<String>,
        fatal: bool,
    ) -> Result<u64, BrewError> {
        self.mutate(slot, session_id, |session, now| {
            Ok(session.push(
                LogEvent::Fault {
                    code,
                    message,
                    fatal,
                },
                now,
            ))
        })
    }

    /// Close a session and hand it to the archival manager.
    ///
    /// The terminal record is persisted in `live/` before the archival
    /// rename. If that rename fails the session is still closed and the
    /// error is returned as `Persistence`.
    pub fn complete(
        &self,
        slot: &mut DeviceSlot,
        session_id: &str,
        outcome: Outcome,
        reason: Option<String>,
    ) -> Result<Session, BrewError> {
        let mut next = self.resolve(slot, session_id)?.clone();
        next.finish(outcome, reason, now_ms());
        self.storage.write_live(&next)?;

        let state = next.state;
        slot.live = Some(next);
        self.unpublish(slot.device_id());
        info!(
            device = %slot.device_id(),
            session_id = %session_id,
            state = state.as_str(),
            "session completed"
        );
        self.events.publish(SessionEvent::Completed {
            session_id: session_id.to_string(),
            state,
        });

        let archived = self.archival.archive(slot, session_id)?;
        self.events.publish(SessionEvent::Archived {
            session_id: session_id.to_string(),
        });
        Ok(archived)
    }

    /// Put a recovered record back into the live set.
    pub(crate) fn restore(&self, slot: &mut DeviceSlot, session: Session) {
        debug!(
            device = %slot.device_id(),
            session_id = %session.session_id,
            "session restored"
        );
        self.publish(slot.device_id(), &session);
        slot.live = Some(session);
    }

    /// Close a recovered record that lost to a newer one for the same device.
    pub(crate) fn close_duplicate(
        &self,
        slot: &mut DeviceSlot,
        mut session: Session,
    ) -> Result<(), BrewError> {
        session.finish(Outcome::Failure, Some("duplicate".to_string()), now_ms());
        self.storage.write_live(&session)?;
        self.archival.archive_record(slot, &session)
    }

    /// The slot's live session `session_id`, if it may still be mutated.
    pub fn resolve<'a>(
        &self,
        slot: &'a DeviceSlot,
        session_id: &str,
    ) -> Result<&'a Session, BrewError> {
        match slot.live.as_ref() {
            Some(session) if session.session_id == session_id => {
                if session.is_terminal() {
                    Err(BrewError::InvalidState(format!(
                        "session {session_id} is {}",
                        session.state.as_str()
                    )))
                } else {
                    Ok(session)
                }
            }
            _ if slot.retired.contains(session_id) || self.archived_here(slot, session_id) => {
                Err(BrewError::InvalidState(format!(
                    "session {session_id} is closed"
                )))
            }
            _ => Err(BrewError::NotFound(format!("session {session_id}"))),
        }
    }

    /// Whether `session_id` is an archived session of this slot's device.
    /// Another device's archived id reads as unknown.
    fn archived_here(&self, slot: &DeviceSlot, session_id: &str) -> bool {
        self.storage
            .read_archived(session_id)
            .is_ok_and(|record| record.device_id == *slot.device_id())
    }

    fn mutate<T>(
        &self,
        slot: &mut DeviceSlot,
        session_id: &str,
        apply: impl FnOnce(&mut Session, u64) -> Result<T, BrewError>,
    ) -> Result<T, BrewError> {
        let mut next = self.resolve(slot, session_id)?.clone();
        let out = apply(&mut next, now_ms())?;
        self.storage.write_live(&next)?;
        self.commit(slot, next);
        Ok(out)
    }

    fn commit(&self, slot: &mut DeviceSlot, session: Session) {
        self.publish(slot.device_id(), &session);
        self.events.publish(SessionEvent::Updated {
            session_id: session.session_id.clone(),
            state: session.state,
            step_index: session.step_index,
            log_len: session.log.len(),
        });
        slot.live = Some(session);
    }

    fn publish(&self, device_id: &DeviceId, session: &Session) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.clone(), session.clone());
    }

    fn unpublish(&self, device_id: &DeviceId) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id);
    }
}
