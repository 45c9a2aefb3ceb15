use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use brewlink_protocol::{Command, DeviceFamily, FirmwareQuery, Outcome, Reply, SessionId, Verb};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BrewError;
use crate::firmware::{FirmwareCatalog, update_available};
use crate::locks::DeviceSlot;
use crate::recipe::RecipeBook;
use crate::redact::DeviceId;
use crate::session::now_ms;
use crate::store::SessionStore;

/// What `register` does when the device already has an open session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegisterPolicy {
    /// Hand back the open session unchanged.
    #[default]
    Resume,
    /// Refuse with `Conflict`.
    Reject,
    /// End the open session as `superseded` and start a new one.
    Restart,
}

impl RegisterPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RegisterPolicy::Resume => "resume",
            RegisterPolicy::Reject => "reject",
            RegisterPolicy::Restart => "restart",
        }
    }
}

impl fmt::Display for RegisterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(RegisterPolicy::Resume),
            "reject" => Ok(RegisterPolicy::Reject),
            "restart" => Ok(RegisterPolicy::Restart),
            other => Err(format!(
                "unknown register policy `{other}` (expected resume, reject or restart)"
            )),
        }
    }
}

/// Routes normalized device commands to store operations under the device
/// lock. The guard is dropped on every return path, errors included.
pub struct Dispatcher {
    store: Arc<SessionStore>,
    recipes: Arc<dyn RecipeBook>,
    firmware: Arc<dyn FirmwareCatalog>,
    policy: RegisterPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        recipes: Arc<dyn RecipeBook>,
        firmware: Arc<dyn FirmwareCatalog>,
        policy: RegisterPolicy,
    ) -> Self {
        Self {
            store,
            recipes,
            firmware,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn policy(&self) -> RegisterPolicy {
        self.policy
    }

    pub async fn dispatch(&self, command: Command) -> Result<Reply, BrewError> {
        let Command {
            device_id,
            family,
            firmware_version,
            session_id,
            verb,
        } = command;
        let device_id = DeviceId::new(device_id);
        let kind = verb.kind();

        let mut slot = self.store.lock(&device_id).await?;
        slot.touch(now_ms(), firmware_version.as_deref());
        debug!(device = %device_id, family = %family, verb = %kind, "dispatching");

        let result = self.execute(&mut slot, family, firmware_version, session_id, verb);
        if let Err(e) = &result {
            warn!(
                device = %device_id,
                verb = %kind,
                code = e.code().as_str(),
                error = %e,
                "device request failed"
            );
        }
        result
    }

    /// Answer a firmware check. Takes no device lock and reads no session.
    pub fn check_firmware(&self, query: &FirmwareQuery) -> Reply {
        let latest = self.firmware.latest(query.family);
        let update = update_available(latest.as_deref(), query.version.as_deref());
        info!(
            device = %DeviceId::new(query.device_id.as_str()),
            family = %query.family,
            update_available = update,
            "firmware check"
        );
        Reply::Firmware {
            update_available: update,
            latest: if update { latest } else { None },
        }
    }

    fn execute(
        &self,
        slot: &mut DeviceSlot,
        family: DeviceFamily,
        firmware_version: Option<String>,
        session_id: Option<SessionId>,
        verb: Verb,
    ) -> Result<Reply, BrewError> {
        let session_id = session_id.as_deref();
        match verb {
            Verb::Register { recipe, force } => {
                self.register(slot, family, firmware_version, recipe, force)
            }
            Verb::NextStep => self.next_step(slot, session_id),
            Verb::Log { message } => {
                let id = target(slot, session_id)?;
                let seq = self.store.append_log(slot, &id, message)?;
                Ok(Reply::Ack { session_id: id, seq })
            }
            Verb::Sensor { reading } => {
                let id = target(slot, session_id)?;
                let seq = self.store.record_sensor(slot, &id, reading)?;
                Ok(Reply::Ack { session_id: id, seq })
            }
            Verb::Complete { outcome, reason } => {
                let id = target(slot, session_id)?;
                let session = self.store.complete(slot, &id, outcome, reason)?;
                Ok(Reply::Closed {
                    session_id: id,
                    state: session.state,
                })
            }
            Verb::Fault {
                code,
                message,
                fatal,
            } => self.fault(slot, session_id, code, message, fatal),
        }
    }

    fn register(
        &self,
        slot: &mut DeviceSlot,
        family: DeviceFamily,
        firmware_version: Option<String>,
        recipe: String,
        force: bool,
    ) -> Result<Reply, BrewError> {
        let open = slot
            .live()
            .filter(|s| !s.is_terminal())
            .map(|s| (s.session_id.clone(), s.state, s.step_index));

        if let Some((session_id, state, step_index)) = open {
            let policy = if force {
                RegisterPolicy::Restart
            } else {
                self.policy
            };
            match policy {
                RegisterPolicy::Resume => {
                    debug!(
                        device = %slot.device_id(),
                        session_id = %session_id,
                        "register resumed open session"
                    );
                    return Ok(Reply::Session {
                        session_id,
                        state,
                        step_index,
                        resumed: true,
                    });
                }
                RegisterPolicy::Reject => return Err(BrewError::Conflict(session_id)),
                RegisterPolicy::Restart => {
                    self.store.complete(
                        slot,
                        &session_id,
                        Outcome::Failure,
                        Some("superseded".to_string()),
                    )?;
                }
            }
        }

        let session = self.store.create(slot, family, firmware_version, recipe)?;
        Ok(Reply::Session {
            session_id: session.session_id,
            state: session.state,
            step_index: session.step_index,
            resumed: false,
        })
    }

    fn next_step(
        &self,
        slot: &mut DeviceSlot,
        session_id: Option<&str>,
    ) -> Result<Reply, BrewError> {
        let id = target(slot, session_id)?;
        let (recipe, index) = {
            let session = self.store.resolve(slot, &id)?;
            (session.recipe_reference.clone(), session.step_index)
        };

        let steps = self.recipes.steps(&recipe)?;
        match steps.into_iter().nth(index as usize) {
            Some(step) => {
                self.store
                    .advance_step(slot, &id, index + 1, Some(step.name.clone()))?;
                Ok(Reply::Step {
                    session_id: id,
                    step_index: index,
                    step,
                })
            }
            None => Ok(Reply::Finished {
                session_id: id,
                step_index: index,
            }),
        }
    }

    fn fault(
        &self,
        slot: &mut DeviceSlot,
        session_id: Option<&str>,
        code: u32,
        message: Option<String>,
        fatal: bool,
    ) -> Result<Reply, BrewError> {
        let id = target(slot, session_id)?;
        let seq = self.store.record_fault(slot, &id, code, message, fatal)?;
        if !fatal {
            return Ok(Reply::Ack { session_id: id, seq });
        }
        let session =
            self.store
                .complete(slot, &id, Outcome::Failure, Some(format!("fault {code}")))?;
        Ok(Reply::Closed {
            session_id: id,
            state: session.state,
        })
    }
}

/// The session a request addresses: the one it names, or the device's
/// current session when it names none.
fn target(slot: &DeviceSlot, session_id: Option<&str>) -> Result<SessionId, BrewError> {
    match session_id {
        Some(id) => Ok(id.to_string()),
        None => slot
            .live()
            .map(|s| s.session_id.clone())
            .ok_or_else(|| BrewError::NotFound("no open session for device".to_string())),
    }
}
