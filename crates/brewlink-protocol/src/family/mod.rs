//! Per-family request shapes and reply rendering.
//!
//! Every family converts its own parameter struct into a normalized
//! [`Command`](crate::Command). Query-string families (Pico, Zymatic,
//! PicoFerm) speak `#`-delimited text; JSON families (ZSeries, iSpindel)
//! speak JSON.

pub mod ispindel;
pub mod pico;
pub mod picoferm;
pub mod zseries;
pub mod zymatic;

use serde::Deserialize;

use crate::{DeviceFamily, FirmwareQuery, ProtocolError, Reply, VerbKind};

pub use ispindel::ISpindelParams;
pub use pico::PicoParams;
pub use picoferm::PicoFermParams;
pub use zseries::ZSeriesParams;
pub use zymatic::ZymaticParams;

/// Longest device identifier accepted from the wire.
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Wire body of a rendered reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Text(String),
    Json(serde_json::Value),
}

/// Identifier fields that some firmware sends as numbers and some as strings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FlexId {
    Text(String),
    Number(u64),
}

impl FlexId {
    pub fn into_string(self) -> String {
        match self {
            FlexId::Text(s) => s,
            FlexId::Number(n) => n.to_string(),
        }
    }
}

/// Query parameters for the firmware check on JSON families.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FirmwareParams {
    pub uid: Option<String>,
    pub fw: Option<String>,
}

impl FirmwareParams {
    pub fn into_query(self, family: DeviceFamily) -> Result<FirmwareQuery, ProtocolError> {
        Ok(FirmwareQuery {
            device_id: device_id(self.uid, "uid")?,
            family,
            version: non_empty(self.fw),
        })
    }
}

pub(crate) fn ensure_supported(family: DeviceFamily, verb: VerbKind) -> Result<(), ProtocolError> {
    if family.supports(verb) {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedVerb { family, verb })
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn required(value: Option<String>, field: &'static str) -> Result<String, ProtocolError> {
    non_empty(value).ok_or(ProtocolError::MissingField(field))
}

pub(crate) fn required_num<T>(value: Option<T>, field: &'static str) -> Result<T, ProtocolError> {
    value.ok_or(ProtocolError::MissingField(field))
}

/// A required reading. `nan` and `inf` parse as `f64` but cannot be stored.
pub(crate) fn finite(value: Option<f64>, field: &'static str) -> Result<f64, ProtocolError> {
    check_finite(required_num(value, field)?, field)
}

pub(crate) fn optional_finite(
    value: Option<f64>,
    field: &'static str,
) -> Result<Option<f64>, ProtocolError> {
    value.map(|v| check_finite(v, field)).transpose()
}

fn check_finite(value: f64, field: &'static str) -> Result<f64, ProtocolError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProtocolError::InvalidField {
            field,
            reason: "not a finite number".to_string(),
        })
    }
}

pub(crate) fn device_id(value: Option<String>, field: &'static str) -> Result<String, ProtocolError> {
    let id = required(value, field)?;
    if id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(ProtocolError::InvalidField {
            field,
            reason: format!("longer than {MAX_DEVICE_ID_LEN} characters"),
        });
    }
    if id.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "contains control characters".to_string(),
        });
    }
    Ok(id)
}

/// `#`-delimited reply used by the query-string families.
pub(crate) fn text_reply(reply: &Reply) -> String {
    match reply {
        Reply::Session {
            session_id,
            state,
            step_index,
            ..
        } => format!("#{session_id}#{step_index}#{}#", state.as_str()),
        Reply::Step {
            step_index, step, ..
        } => format!(
            "#{step_index}#{}#{:.1}#{}#{}#",
            step.name.replace('#', " "),
            step.temp_c,
            step.minutes,
            u8::from(step.drain)
        ),
        Reply::Finished { step_index, .. } => format!("#{step_index}#DONE#"),
        Reply::Ack { .. } => "#T#".to_string(),
        Reply::Closed { state, .. } => format!("#{}#", state.as_str()),
        Reply::Firmware {
            update_available, ..
        } => {
            if *update_available {
                "#T#".to_string()
            } else {
                "#F#".to_string()
            }
        }
    }
}
