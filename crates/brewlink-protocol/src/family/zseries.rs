use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    FlexId, device_id, ensure_supported, finite, non_empty, required, required_num,
};
use crate::{
    Command, DeviceFamily, ErrorBody, Outcome, ProtocolError, Reply, SensorReading, Verb,
    VerbKind,
};

/// JSON body posted by Z-series units.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ZSeriesParams {
    #[serde(rename = "ZSeriesID")]
    pub zseries_id: Option<FlexId>,
    #[serde(rename = "ProgramID")]
    pub program_id: Option<FlexId>,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
    pub wort_temp: Option<f64>,
    pub thermo_block_temp: Option<f64>,
    pub step_name: Option<String>,
    pub time_left: Option<u32>,
    pub error_code: Option<u32>,
    pub message: Option<String>,
    pub success: Option<bool>,
    pub fatal: Option<bool>,
    pub force: Option<bool>,
    pub firmware_version: Option<String>,
}

impl ZSeriesParams {
    pub fn into_command(self, verb: VerbKind) -> Result<Command, ProtocolError> {
        ensure_supported(DeviceFamily::ZSeries, verb)?;
        let device_id = device_id(self.zseries_id.map(FlexId::into_string), "ZSeriesID")?;

        let verb = match verb {
            VerbKind::Register => Verb::Register {
                recipe: required(self.program_id.map(FlexId::into_string), "ProgramID")?,
                force: self.force.unwrap_or(false),
            },
            VerbKind::NextStep => Verb::NextStep,
            VerbKind::Log => Verb::Log {
                message: required(self.message, "Message")?,
            },
            VerbKind::Sensor => Verb::Sensor {
                reading: SensorReading::Brew {
                    wort_c: finite(self.wort_temp, "WortTemp")?,
                    therm_c: finite(self.thermo_block_temp, "ThermoBlockTemp")?,
                    step: non_empty(self.step_name),
                    time_left_s: self.time_left,
                    error_code: self.error_code.filter(|code| *code != 0),
                },
            },
            VerbKind::Complete => Verb::Complete {
                outcome: Outcome::from_ok(self.success),
                reason: non_empty(self.message),
            },
            VerbKind::Fault => Verb::Fault {
                code: required_num(self.error_code, "ErrorCode")?,
                message: non_empty(self.message),
                fatal: self.fatal.unwrap_or(false),
            },
        };

        Ok(Command {
            device_id,
            family: DeviceFamily::ZSeries,
            firmware_version: non_empty(self.firmware_version),
            session_id: non_empty(self.session_id),
            verb,
        })
    }
}

pub(crate) fn render(reply: &Reply) -> Value {
    match reply {
        Reply::Session {
            session_id,
            state,
            step_index,
            resumed,
        } => json!({
            "SessionID": session_id,
            "State": state.as_str(),
            "StepIndex": step_index,
            "Resumed": resumed,
        }),
        Reply::Step {
            session_id,
            step_index,
            step,
        } => json!({
            "SessionID": session_id,
            "StepIndex": step_index,
            "Step": {
                "Name": step.name,
                "TempC": step.temp_c,
                "Minutes": step.minutes,
                "Drain": step.drain,
            },
        }),
        Reply::Finished {
            session_id,
            step_index,
        } => json!({
            "SessionID": session_id,
            "StepIndex": step_index,
            "Finished": true,
        }),
        Reply::Ack { session_id, seq } => json!({
            "SessionID": session_id,
            "Seq": seq,
        }),
        Reply::Closed { session_id, state } => json!({
            "SessionID": session_id,
            "State": state.as_str(),
        }),
        Reply::Firmware {
            update_available,
            latest,
        } => json!({
            "UpdateAvailable": update_available,
            "Latest": latest,
        }),
    }
}

pub(crate) fn render_error(body: &ErrorBody) -> Value {
    json!({
        "Error": {
            "Code": body.code.as_str(),
            "Message": body.message,
            "RetryAfterMs": body.retry_after_ms,
        }
    })
}
