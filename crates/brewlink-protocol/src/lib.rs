pub mod family;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use family::{
    ISpindelParams, PicoFermParams, PicoParams, ReplyBody, ZSeriesParams, ZymaticParams,
};

/// Unique identifier for a brewing/fermenting/monitoring session.
pub type SessionId = String;

/// Hardware families that talk to the control plane.
///
/// Adding a family is a compile-time change: every `match` over this enum
/// (request parsing, reply rendering, routing) must cover it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    Pico,
    Zymatic,
    #[serde(rename = "zseries")]
    ZSeries,
    #[serde(rename = "picoferm")]
    PicoFerm,
    #[serde(rename = "ispindel")]
    ISpindel,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 5] = [
        DeviceFamily::Pico,
        DeviceFamily::Zymatic,
        DeviceFamily::ZSeries,
        DeviceFamily::PicoFerm,
        DeviceFamily::ISpindel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::Pico => "pico",
            DeviceFamily::Zymatic => "zymatic",
            DeviceFamily::ZSeries => "zseries",
            DeviceFamily::PicoFerm => "picoferm",
            DeviceFamily::ISpindel => "ispindel",
        }
    }

    /// Whether this family can issue the given verb at all.
    pub fn supports(self, verb: VerbKind) -> bool {
        match self {
            DeviceFamily::Pico | DeviceFamily::Zymatic | DeviceFamily::ZSeries => true,
            DeviceFamily::PicoFerm => !matches!(verb, VerbKind::Log | VerbKind::Fault),
            DeviceFamily::ISpindel => matches!(
                verb,
                VerbKind::Register | VerbKind::Sensor | VerbKind::Complete
            ),
        }
    }

    /// Render a reply in this family's wire shape.
    pub fn render(self, reply: &Reply) -> ReplyBody {
        match self {
            DeviceFamily::Pico | DeviceFamily::Zymatic | DeviceFamily::PicoFerm => {
                ReplyBody::Text(family::text_reply(reply))
            }
            DeviceFamily::ZSeries => ReplyBody::Json(family::zseries::render(reply)),
            DeviceFamily::ISpindel => {
                ReplyBody::Json(serde_json::to_value(reply).unwrap_or_default())
            }
        }
    }

    /// Render an error in this family's wire shape.
    pub fn render_error(self, body: &ErrorBody) -> ReplyBody {
        match self {
            DeviceFamily::Pico | DeviceFamily::Zymatic | DeviceFamily::PicoFerm => {
                ReplyBody::Text(format!("#E#{}#", body.code.as_str()))
            }
            DeviceFamily::ZSeries => ReplyBody::Json(family::zseries::render_error(body)),
            DeviceFamily::ISpindel => {
                ReplyBody::Json(serde_json::to_value(body).unwrap_or_default())
            }
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        DeviceFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| ProtocolError::UnknownFamily(s.to_string()))
    }
}

/// The verb named in a device request path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerbKind {
    Register,
    NextStep,
    Log,
    Sensor,
    Complete,
    Fault,
}

impl VerbKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VerbKind::Register => "register",
            VerbKind::NextStep => "next_step",
            VerbKind::Log => "log",
            VerbKind::Sensor => "sensor",
            VerbKind::Complete => "complete",
            VerbKind::Fault => "fault",
        }
    }
}

impl fmt::Display for VerbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device endpoint: either a session verb or the firmware check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Verb(VerbKind),
    Firmware,
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let endpoint = match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "register" => Endpoint::Verb(VerbKind::Register),
            "next_step" | "nextstep" => Endpoint::Verb(VerbKind::NextStep),
            "log" => Endpoint::Verb(VerbKind::Log),
            "sensor" => Endpoint::Verb(VerbKind::Sensor),
            "complete" => Endpoint::Verb(VerbKind::Complete),
            "fault" => Endpoint::Verb(VerbKind::Fault),
            "firmware" => Endpoint::Firmware,
            _ => return Err(ProtocolError::UnknownVerb(s.to_string())),
        };
        Ok(endpoint)
    }
}

/// Lifecycle state of a session. `Completed` and `Errored` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Active,
    Completed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn from_ok(ok: Option<bool>) -> Self {
        if ok.unwrap_or(true) {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    pub fn terminal_state(self) -> SessionState {
        match self {
            Outcome::Success => SessionState::Completed,
            Outcome::Failure => SessionState::Errored,
        }
    }
}

/// A sensor report. Each family produces exactly one shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorReading {
    Brew {
        wort_c: f64,
        therm_c: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_left_s: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<u32>,
    },
    Ferment {
        temp_c: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pressure_psi: Option<f64>,
    },
    Hydrometer {
        angle: f64,
        temp_c: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        battery_v: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gravity: Option<f64>,
    },
    /// A reading kind this build does not know, kept as written.
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl SensorReading {
    /// Reject values JSON cannot carry. `NaN` and infinities serialize as
    /// `null`, and a record holding them no longer parses.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let fields: Vec<(&'static str, Option<f64>)> = match self {
            SensorReading::Brew {
                wort_c, therm_c, ..
            } => vec![("wort_c", Some(*wort_c)), ("therm_c", Some(*therm_c))],
            SensorReading::Ferment {
                temp_c,
                pressure_psi,
            } => vec![("temp_c", Some(*temp_c)), ("pressure_psi", *pressure_psi)],
            SensorReading::Hydrometer {
                angle,
                temp_c,
                battery_v,
                gravity,
            } => vec![
                ("angle", Some(*angle)),
                ("temp_c", Some(*temp_c)),
                ("battery_v", *battery_v),
                ("gravity", *gravity),
            ],
            SensorReading::Other(_) => Vec::new(),
        };
        for (field, value) in fields {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(ProtocolError::InvalidField {
                    field,
                    reason: "not a finite number".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// One step of a recipe as served by the recipe collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecipeStep {
    pub name: String,
    pub temp_c: f64,
    pub minutes: u32,
    #[serde(default)]
    pub drain: bool,
}

/// Normalized operation the dispatcher executes, independent of family.
#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    Register {
        recipe: String,
        force: bool,
    },
    NextStep,
    Log {
        message: String,
    },
    Sensor {
        reading: SensorReading,
    },
    Complete {
        outcome: Outcome,
        reason: Option<String>,
    },
    Fault {
        code: u32,
        message: Option<String>,
        fatal: bool,
    },
}

impl Verb {
    pub fn kind(&self) -> VerbKind {
        match self {
            Verb::Register { .. } => VerbKind::Register,
            Verb::NextStep => VerbKind::NextStep,
            Verb::Log { .. } => VerbKind::Log,
            Verb::Sensor { .. } => VerbKind::Sensor,
            Verb::Complete { .. } => VerbKind::Complete,
            Verb::Fault { .. } => VerbKind::Fault,
        }
    }
}

/// A family request after parsing: who is asking and what for.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_id: String,
    pub family: DeviceFamily,
    pub firmware_version: Option<String>,
    pub session_id: Option<SessionId>,
    pub verb: Verb,
}

/// A firmware check request. Never touches session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareQuery {
    pub device_id: String,
    pub family: DeviceFamily,
    pub version: Option<String>,
}

/// Family-independent reply produced by the dispatcher.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Session {
        session_id: SessionId,
        state: SessionState,
        step_index: u32,
        resumed: bool,
    },
    Step {
        session_id: SessionId,
        step_index: u32,
        step: RecipeStep,
    },
    Finished {
        session_id: SessionId,
        step_index: u32,
    },
    Ack {
        session_id: SessionId,
        seq: u64,
    },
    Closed {
        session_id: SessionId,
        state: SessionState,
    },
    Firmware {
        update_available: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latest: Option<String>,
    },
}

/// Lifecycle notifications for dashboards. Device ids are pre-redacted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        session_id: SessionId,
        device: String,
        family: DeviceFamily,
    },
    Updated {
        session_id: SessionId,
        state: SessionState,
        step_index: u32,
        log_len: usize,
    },
    Completed {
        session_id: SessionId,
        state: SessionState,
    },
    Archived {
        session_id: SessionId,
    },
}

/// Error codes for structured error handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Conflict,
    NotFound,
    InvalidState,
    Busy,
    Persistence,
    InvalidRequest,
    RecipeUnavailable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Conflict => "conflict",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::Busy => "busy",
            ErrorCode::Persistence => "persistence",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::RecipeUnavailable => "recipe_unavailable",
        }
    }

    /// Whether the caller should retry the same request later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Busy)
    }
}

/// JSON error body returned to devices and operators.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Malformed or unsupported device requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown device family `{0}`")]
    UnknownFamily(String),

    #[error("unknown verb `{0}`")]
    UnknownVerb(String),

    #[error("{family} devices do not support `{verb}`")]
    UnsupportedVerb {
        family: DeviceFamily,
        verb: VerbKind,
    },
}
