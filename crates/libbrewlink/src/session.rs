use brewlink_protocol::{DeviceFamily, Outcome, SensorReading, SessionId, SessionState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::redact::DeviceId;

/// Version written into every durable record.
pub const SCHEMA_VERSION: u32 = 1;

/// One brewing, fermenting or monitoring run, exactly as persisted.
///
/// `step_index` counts recipe steps handed out so far; the next poll is
/// served `steps[step_index]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub schema_version: u32,
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub family: DeviceFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    pub recipe_reference: String,
    pub state: SessionState,
    pub step_index: u32,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    /// Fields written by newer versions; carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub at_ms: u64,
    pub event: LogEvent,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    Message {
        text: String,
    },
    Sensor {
        reading: SensorReading,
    },
    /// The step counter after an advance, with the name of the step served.
    Step {
        step_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Fault {
        code: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        fatal: bool,
    },
    Outcome {
        outcome: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// An event written by a newer build, kept verbatim.
    #[serde(untagged)]
    Other(Value),
}

impl Session {
    pub fn new(
        session_id: SessionId,
        device_id: DeviceId,
        family: DeviceFamily,
        firmware_version: Option<String>,
        recipe_reference: String,
        now_ms: u64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id,
            device_id,
            family,
            firmware_version,
            recipe_reference,
            state: SessionState::Pending,
            step_index: 0,
            log: Vec::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            completed_at_ms: None,
            extra: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Append an event and promote `Pending` to `Active`. Returns its `seq`.
    pub fn push(&mut self, event: LogEvent, now_ms: u64) -> u64 {
        let seq = self.log.len() as u64;
        self.log.push(LogEntry {
            seq,
            at_ms: now_ms,
            event,
        });
        self.updated_at_ms = now_ms;
        if self.state == SessionState::Pending {
            self.state = SessionState::Active;
        }
        seq
    }

    /// Record the outcome and move to the matching terminal state.
    pub fn finish(&mut self, outcome: Outcome, reason: Option<String>, now_ms: u64) {
        self.push(LogEvent::Outcome { outcome, reason }, now_ms);
        self.state = outcome.terminal_state();
        self.completed_at_ms = Some(now_ms);
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
