use serde::Deserialize;

use super::{device_id, ensure_supported, finite, non_empty, required, required_num};
use crate::{
    Command, DeviceFamily, FirmwareQuery, Outcome, ProtocolError, SensorReading, Verb, VerbKind,
};

/// Query string sent by Pico S/C/Pro units.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PicoParams {
    pub uid: Option<String>,
    #[serde(rename = "sesId")]
    pub ses_id: Option<String>,
    /// PicoPak RFID, used as the recipe reference.
    pub rfid: Option<String>,
    pub wort: Option<f64>,
    pub therm: Option<f64>,
    pub step: Option<String>,
    pub error: Option<u32>,
    #[serde(rename = "timeLeft")]
    pub time_left: Option<u32>,
    pub msg: Option<String>,
    pub code: Option<u32>,
    pub fatal: Option<bool>,
    pub ok: Option<bool>,
    pub force: Option<bool>,
    pub fw: Option<String>,
}

impl PicoParams {
    pub fn into_command(self, verb: VerbKind) -> Result<Command, ProtocolError> {
        ensure_supported(DeviceFamily::Pico, verb)?;
        let device_id = device_id(self.uid, "uid")?;

        let verb = match verb {
            VerbKind::Register => Verb::Register {
                recipe: required(self.rfid, "rfid")?,
                force: self.force.unwrap_or(false),
            },
            VerbKind::NextStep => Verb::NextStep,
            VerbKind::Log => Verb::Log {
                message: required(self.msg, "msg")?,
            },
            VerbKind::Sensor => Verb::Sensor {
                reading: SensorReading::Brew {
                    wort_c: finite(self.wort, "wort")?,
                    therm_c: finite(self.therm, "therm")?,
                    step: non_empty(self.step),
                    time_left_s: self.time_left,
                    error_code: self.error.filter(|code| *code != 0),
                },
            },
            VerbKind::Complete => Verb::Complete {
                outcome: Outcome::from_ok(self.ok),
                reason: non_empty(self.msg),
            },
            VerbKind::Fault => Verb::Fault {
                code: required_num(self.code.or(self.error), "code")?,
                message: non_empty(self.msg),
                fatal: self.fatal.unwrap_or(false),
            },
        };

        Ok(Command {
            device_id,
            family: DeviceFamily::Pico,
            firmware_version: non_empty(self.fw),
            session_id: non_empty(self.ses_id),
            verb,
        })
    }

    pub fn firmware_query(self) -> Result<FirmwareQuery, ProtocolError> {
        Ok(FirmwareQuery {
            device_id: device_id(self.uid, "uid")?,
            family: DeviceFamily::Pico,
            version: non_empty(self.fw),
        })
    }
}
