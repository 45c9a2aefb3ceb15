use serde::Deserialize;

use super::{device_id, ensure_supported, finite, non_empty, required, required_num};
use crate::{
    Command, DeviceFamily, FirmwareQuery, Outcome, ProtocolError, SensorReading, Verb, VerbKind,
};

/// Query string sent by Zymatic units. `heat1` is the heat-loop temperature.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ZymaticParams {
    pub uid: Option<String>,
    #[serde(rename = "sesId")]
    pub ses_id: Option<String>,
    pub recipe: Option<String>,
    pub wort: Option<f64>,
    pub heat1: Option<f64>,
    pub step: Option<String>,
    #[serde(rename = "timeLeft")]
    pub time_left: Option<u32>,
    pub error: Option<u32>,
    pub event: Option<String>,
    pub code: Option<u32>,
    pub fatal: Option<bool>,
    pub ok: Option<bool>,
    pub force: Option<bool>,
    pub fw: Option<String>,
}

impl ZymaticParams {
    pub fn into_command(self, verb: VerbKind) -> Result<Command, ProtocolError> {
        ensure_supported(DeviceFamily::Zymatic, verb)?;
        let device_id = device_id(self.uid, "uid")?;

        let verb = match verb {
            VerbKind::Register => Verb::Register {
                recipe: required(self.recipe, "recipe")?,
                force: self.force.unwrap_or(false),
            },
            VerbKind::NextStep => Verb::NextStep,
            VerbKind::Log => Verb::Log {
                message: required(self.event, "event")?,
            },
            VerbKind::Sensor => Verb::Sensor {
                reading: SensorReading::Brew {
                    wort_c: finite(self.wort, "wort")?,
                    therm_c: finite(self.heat1, "heat1")?,
                    step: non_empty(self.step),
                    time_left_s: self.time_left,
                    error_code: self.error.filter(|code| *code != 0),
                },
            },
            VerbKind::Complete => Verb::Complete {
                outcome: Outcome::from_ok(self.ok),
                reason: non_empty(self.event),
            },
            VerbKind::Fault => Verb::Fault {
                code: required_num(self.code.or(self.error), "code")?,
                message: non_empty(self.event),
                fatal: self.fatal.unwrap_or(false),
            },
        };

        Ok(Command {
            device_id,
            family: DeviceFamily::Zymatic,
            firmware_version: non_empty(self.fw),
            session_id: non_empty(self.ses_id),
            verb,
        })
    }

    pub fn firmware_query(self) -> Result<FirmwareQuery, ProtocolError> {
        Ok(FirmwareQuery {
            device_id: device_id(self.uid, "uid")?,
            family: DeviceFamily::Zymatic,
            version: non_empty(self.fw),
        })
    }
}
